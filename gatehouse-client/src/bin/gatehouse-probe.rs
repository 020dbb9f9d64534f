//! Sign in, resolve every cached resource once and print the result as JSON.
//!
//! Reads `GATEHOUSE_SUBJECT` and `GATEHOUSE_TOKEN` for the identity, and the
//! config file from `--config` or `GATEHOUSE_CONFIG`.

use std::process::ExitCode;

use gatehouse_cache::{IdentityProvider, Published, ValueSource};
use gatehouse_client::{init_tracing, ClientConfigError, ClientResult, Gatehouse, GatehouseConfig};
use gatehouse_core::Timestamp;
use serde::Serialize;

#[derive(Serialize)]
struct ResourceReport<'a, T: Serialize> {
    value: &'a T,
    source: ValueSource,
    fetched_at: Option<Timestamp>,
    advisory: Option<String>,
}

impl<'a, T: Serialize> ResourceReport<'a, T> {
    fn new(published: &'a Published<T>) -> Self {
        Self {
            value: &published.value,
            source: published.source,
            fetched_at: published.fetched_at,
            advisory: published.advisory.as_ref().map(|e| e.to_string()),
        }
    }
}

fn required_env(field: &'static str) -> Result<String, ClientConfigError> {
    std::env::var(field).map_err(|_| ClientConfigError::InvalidValue {
        field,
        reason: "must be set".to_string(),
    })
}

async fn run() -> ClientResult<()> {
    init_tracing()?;
    let config = GatehouseConfig::load()?;
    let subject = required_env("GATEHOUSE_SUBJECT")?;
    let token = required_env("GATEHOUSE_TOKEN")?;

    let gatehouse = Gatehouse::open(&config)?;
    gatehouse.identity().sign_in(subject, token);
    gatehouse.sync(gatehouse.identity().snapshot()).await;

    let role = gatehouse.roles().snapshot();
    let credits = gatehouse.credits().snapshot();
    let workflow = gatehouse.workflow().snapshot();
    let stats: serde_json::Map<String, serde_json::Value> = gatehouse
        .stats()
        .into_iter()
        .map(|(kind, stats)| {
            (
                kind.to_string(),
                serde_json::json!({
                    "remote_calls": stats.remote_calls,
                    "hits": stats.hits,
                    "misses": stats.misses,
                    "hit_rate": stats.hit_rate(),
                    "fallbacks": stats.fallbacks,
                }),
            )
        })
        .collect();

    let report = serde_json::json!({
        "role": ResourceReport::new(&role),
        "credits": ResourceReport::new(&credits),
        "workflow": ResourceReport::new(&workflow),
        "stats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gatehouse-probe: {}", e);
            ExitCode::FAILURE
        }
    }
}
