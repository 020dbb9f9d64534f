//! Cached resource payloads.
//!
//! The cache engine is generic over [`CachedResource`]. Each payload type
//! supplies its kind (used for store namespacing, coordination slots and
//! log fields) and the value published while nobody is signed in.

use crate::identity::IdentitySnapshot;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resource type discriminator. One cache entry and one in-flight slot per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Role,
    Credits,
    Workflow,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [Self::Role, Self::Credits, Self::Workflow];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Credits => "credits",
            Self::Workflow => "workflow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "role" => Some(Self::Role),
            "credits" => Some(Self::Credits),
            "workflow" => Some(Self::Workflow),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker trait for payloads the cache can hold.
///
/// # Implementation Requirements
///
/// - `resource_kind()` must return the same value for every instance
/// - `unauthenticated()` is what subscribers see after sign-out
pub trait CachedResource:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn resource_kind() -> ResourceKind;

    fn unauthenticated() -> Self;
}

// ============================================================================
// ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Role descriptor returned by the role endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserRole {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl UserRole {
    /// Value served when the role endpoint fails and nothing is cached.
    pub fn fallback_user() -> Self {
        Self {
            role: Some(Role::User),
            ..Self::default()
        }
    }

    pub fn with_role(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: Some(role),
            ..Self::default()
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }

    pub fn is_user(&self) -> bool {
        self.role == Some(Role::User)
    }

    pub fn has_role(&self) -> bool {
        self.role.is_some()
    }
}

impl CachedResource for UserRole {
    fn resource_kind() -> ResourceKind {
        ResourceKind::Role
    }

    fn unauthenticated() -> Self {
        Self::default()
    }
}

// ============================================================================
// CREDITS
// ============================================================================

/// Credit balance returned by the balance endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreditBalance {
    pub credits: i64,
}

impl CreditBalance {
    pub const METADATA_KEY: &'static str = "credits";

    pub fn new(credits: i64) -> Self {
        Self { credits }
    }

    /// Balance mirrored into the identity provider's public metadata, or zero.
    ///
    /// Any JSON number is accepted; fractional balances are truncated toward
    /// zero. Non-numeric values read as zero.
    pub fn from_identity(identity: &IdentitySnapshot) -> Self {
        let credits = identity
            .metadata
            .get(Self::METADATA_KEY)
            .and_then(|value| {
                value
                    .as_i64()
                    .or_else(|| value.as_f64().map(|credits| credits.trunc() as i64))
            })
            .unwrap_or(0);
        Self { credits }
    }
}

impl CachedResource for CreditBalance {
    fn resource_kind() -> ResourceKind {
        ResourceKind::Credits
    }

    fn unauthenticated() -> Self {
        Self::default()
    }
}

// ============================================================================
// WORKFLOW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStepDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt_components: Vec<String>,
    #[serde(default)]
    pub output_type: String,
    #[serde(default)]
    pub output_variable: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowGroupConfig {
    #[serde(default)]
    pub steps: Vec<WorkflowStepDefinition>,
    #[serde(default)]
    pub base_instructions: Option<String>,
}

/// A workflow group as listed by `/api/v1/workflow/groups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub config: Option<WorkflowGroupConfig>,
    #[serde(default)]
    pub prompts: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AvailableModels {
    #[serde(default)]
    pub available_models: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub default_model: String,
}

/// Step summary; the config endpoint's extra step fields are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStepSummary {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub steps: Vec<WorkflowStepSummary>,
}

/// Groups, models and step config, fetched and cached as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkflowBundle {
    pub groups: Vec<WorkflowGroup>,
    pub models: Option<AvailableModels>,
    pub config: Option<WorkflowConfig>,
}

impl WorkflowBundle {
    pub fn active_groups(&self) -> impl Iterator<Item = &WorkflowGroup> {
        self.groups.iter().filter(|group| group.is_active)
    }

    pub fn default_group(&self) -> Option<&WorkflowGroup> {
        self.groups.iter().find(|group| group.is_default)
    }
}

impl CachedResource for WorkflowBundle {
    fn resource_kind() -> ResourceKind {
        ResourceKind::Workflow
    }

    fn unauthenticated() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_kind_round_trips_through_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::parse("billing"), None);
    }

    #[test]
    fn test_user_role_helpers() {
        let admin = UserRole::with_role("user_1", Role::Admin);
        assert!(admin.is_admin());
        assert!(!admin.is_user());
        assert!(admin.has_role());

        let anonymous = UserRole::unauthenticated();
        assert!(!anonymous.has_role());
        assert!(UserRole::fallback_user().is_user());
    }

    #[test]
    fn test_user_role_parses_api_body() {
        let role: UserRole = serde_json::from_value(json!({
            "user_id": "user_1",
            "role": "admin",
            "first_name": "Ada",
            "last_name": null
        }))
        .unwrap();
        assert!(role.is_admin());
        assert_eq!(role.first_name.as_deref(), Some("Ada"));
        assert_eq!(role.last_name, None);
    }

    #[test]
    fn test_credit_balance_from_identity_metadata() {
        let identity = IdentitySnapshot::signed_in("user_1").with_metadata("credits", json!(42));
        assert_eq!(CreditBalance::from_identity(&identity).credits, 42);

        let bare = IdentitySnapshot::signed_in("user_1");
        assert_eq!(CreditBalance::from_identity(&bare).credits, 0);

        let wrong_type =
            IdentitySnapshot::signed_in("user_1").with_metadata("credits", json!("lots"));
        assert_eq!(CreditBalance::from_identity(&wrong_type).credits, 0);
    }

    #[test]
    fn test_credit_balance_from_fractional_metadata() {
        let identity =
            IdentitySnapshot::signed_in("user_1").with_metadata("credits", json!(12.75));
        assert_eq!(CreditBalance::from_identity(&identity).credits, 12);

        let negative =
            IdentitySnapshot::signed_in("user_1").with_metadata("credits", json!(-3.5));
        assert_eq!(CreditBalance::from_identity(&negative).credits, -3);
    }

    #[test]
    fn test_workflow_group_parses_snake_case_body() {
        let group: WorkflowGroup = serde_json::from_value(json!({
            "id": "g1",
            "name": "Default",
            "is_active": true,
            "is_default": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z",
            "config": {
                "steps": [{
                    "id": "s1",
                    "name": "Draft",
                    "description": "write a draft",
                    "prompt_components": ["base"],
                    "output_type": "text",
                    "model": "gpt-4o"
                }]
            }
        }))
        .unwrap();
        assert!(group.is_active);
        assert!(group.is_default);
        let config = group.config.unwrap();
        assert_eq!(config.steps.len(), 1);
        assert_eq!(config.steps[0].enabled, None);
    }

    #[test]
    fn test_workflow_config_drops_extra_step_fields() {
        let config: WorkflowConfig = serde_json::from_value(json!({
            "steps": [{"name": "Draft", "description": "d", "model": "gpt-4o", "prompt": "x"}]
        }))
        .unwrap();
        assert_eq!(
            config.steps,
            vec![WorkflowStepSummary {
                name: "Draft".to_string(),
                description: "d".to_string()
            }]
        );
    }

    #[test]
    fn test_workflow_bundle_queries() {
        let group = |id: &str, active: bool, default: bool| WorkflowGroup {
            id: id.to_string(),
            name: id.to_string(),
            is_active: active,
            is_default: default,
            created_at: String::new(),
            updated_at: String::new(),
            config: None,
            prompts: None,
        };
        let bundle = WorkflowBundle {
            groups: vec![group("a", true, false), group("b", false, true)],
            models: None,
            config: None,
        };
        assert_eq!(bundle.active_groups().count(), 1);
        assert_eq!(bundle.default_group().map(|g| g.id.as_str()), Some("b"));
    }
}
