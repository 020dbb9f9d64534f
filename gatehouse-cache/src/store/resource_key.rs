//! Namespaced keys for the durable store.
//!
//! There is exactly one stored entry per resource kind. The owning subject is
//! recorded inside the entry, not in the key, so a sign-in by a different
//! subject overwrites rather than accumulates entries.

use gatehouse_core::ResourceKind;

/// Prefix shared by every Gatehouse key.
const NAMESPACE: &str = "gatehouse";

/// Bumped when the stored entry layout changes; old keys are then ignored.
const LAYOUT_VERSION: &str = "v1";

const SEPARATOR: char = ':';

/// Durable store key for one resource kind.
///
/// # Format
///
/// `gatehouse:v1:<kind>`, for example `gatehouse:v1:role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    kind: ResourceKind,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Encode to the UTF-8 bytes stored in the backend.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if the bytes are not UTF-8, belong to another
    /// namespace or layout version, or name an unknown kind.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        let mut parts = text.split(SEPARATOR);

        if parts.next()? != NAMESPACE || parts.next()? != LAYOUT_VERSION {
            return None;
        }

        let kind = ResourceKind::parse(parts.next()?)?;

        if parts.next().is_some() {
            return None;
        }

        Some(Self { kind })
    }

    /// Prefix covering every key of the current layout.
    pub fn namespace_prefix() -> Vec<u8> {
        format!("{NAMESPACE}{SEPARATOR}{LAYOUT_VERSION}{SEPARATOR}").into_bytes()
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{NAMESPACE}{SEPARATOR}{LAYOUT_VERSION}{SEPARATOR}{}",
            self.kind
        )
    }
}
