//! HTTP source and end-to-end cache tests against a mock resource service.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_cache::{
    CacheRegistry, IdentityHandle, IdentityProvider, InMemoryStore, ResourceCache, ResourceSource,
    ValueSource,
};
use gatehouse_client::{
    sources::{
        AVAILABLE_MODELS_PATH, CREDITS_PATH, ROLE_PATH, WORKFLOW_CONFIG_PATH, WORKFLOW_GROUPS_PATH,
    },
    ClientConfigError, ClientError, CreditSource, Gatehouse, GatehouseConfig, RestClient,
    RoleSource, WorkflowSource,
};
use gatehouse_core::{
    FetchError, IdentitySnapshot, ResourceKind, ResourcePolicy, SubjectId, UserRole,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn signed_in_identity() -> IdentityHandle {
    let identity = IdentityHandle::new();
    identity.sign_in("user_1", "token-1");
    identity
}

fn rest_client(server: &MockServer, identity: &IdentityHandle) -> RestClient {
    RestClient::with_base_url(&server.uri(), Duration::from_secs(5), Arc::new(identity.clone()))
        .unwrap()
}

fn config_for(server: &MockServer, role_timeout_ms: u64) -> GatehouseConfig {
    let contents = format!(
        r#"
api_base_url = "{uri}"
request_timeout_ms = 5000

[store]
max_size_mb = 8

[role]
ttl_secs = 300
fetch_timeout_ms = {role_timeout_ms}
max_retries = 1
retry_backoff_ms = 10

[credits]
ttl_secs = 60
fetch_timeout_ms = 5000
max_retries = 0
retry_backoff_ms = 10

[workflow]
ttl_secs = 300
fetch_timeout_ms = 5000
max_retries = 0
retry_backoff_ms = 10
"#,
        uri = server.uri(),
        role_timeout_ms = role_timeout_ms,
    );
    let config = GatehouseConfig::from_toml(&contents).unwrap();
    config.validate().unwrap();
    config
}

async fn mount_workflow(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(WORKFLOW_GROUPS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "g1",
                "name": "Default",
                "is_active": true,
                "is_default": true,
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-02T00:00:00Z",
                "config": {"steps": []}
            },
            {"id": "g2", "name": "Archived", "is_active": false, "is_default": false}
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(AVAILABLE_MODELS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "available_models": {"openai": ["gpt-4o"]},
            "default_model": "gpt-4o"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(WORKFLOW_CONFIG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "steps": [
                {"name": "outline", "description": "Draft an outline", "model": "gpt-4o"},
                {"name": "write", "description": "Write the draft"}
            ]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn role_source_sends_bearer_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ROLE_PATH))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_id": "user_1",
            "role": "admin",
            "first_name": "Ada",
            "last_name": "Lovelace"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = signed_in_identity();
    let source = RoleSource::new(rest_client(&server, &identity));
    let role = source.fetch(&SubjectId::new("user_1")).await.unwrap();

    assert!(role.is_admin());
    assert_eq!(role.first_name.as_deref(), Some("Ada"));
}

#[tokio::test]
async fn non_success_status_is_rejected_with_detail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CREDITS_PATH))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({"detail": "billing disabled"})))
        .mount(&server)
        .await;

    let identity = signed_in_identity();
    let source = CreditSource::new(rest_client(&server, &identity));
    let err = source.fetch(&SubjectId::new("user_1")).await.unwrap_err();

    assert_eq!(
        err,
        FetchError::Rejected {
            kind: ResourceKind::Credits,
            status: 402,
            message: "billing disabled".to_string(),
        }
    );
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CREDITS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let identity = signed_in_identity();
    let source = CreditSource::new(rest_client(&server, &identity));
    let err = source.fetch(&SubjectId::new("user_1")).await.unwrap_err();

    assert!(matches!(err, FetchError::Decode { kind: ResourceKind::Credits, .. }));
}

#[tokio::test]
async fn missing_credential_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ROLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"role": "user"})))
        .expect(0)
        .mount(&server)
        .await;

    let identity = IdentityHandle::new();
    let source = RoleSource::new(rest_client(&server, &identity));
    let err = source.fetch(&SubjectId::new("user_1")).await.unwrap_err();

    assert!(matches!(err, FetchError::Credential { .. }));
}

#[tokio::test]
async fn workflow_bundle_combines_three_endpoints() {
    let server = MockServer::start().await;
    mount_workflow(&server).await;

    let identity = signed_in_identity();
    let source = WorkflowSource::new(rest_client(&server, &identity));
    let bundle = source.fetch(&SubjectId::new("user_1")).await.unwrap();

    assert_eq!(bundle.groups.len(), 2);
    assert_eq!(bundle.active_groups().count(), 1);
    assert_eq!(bundle.default_group().map(|g| g.id.as_str()), Some("g1"));
    assert_eq!(bundle.models.as_ref().unwrap().default_model, "gpt-4o");
    let steps = &bundle.config.as_ref().unwrap().steps;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].name, "outline");
    assert_eq!(steps[1].description, "Write the draft");
}

#[tokio::test]
async fn workflow_bundle_fails_as_a_unit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WORKFLOW_GROUPS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(AVAILABLE_MODELS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(WORKFLOW_CONFIG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"steps": []})))
        .mount(&server)
        .await;

    let identity = signed_in_identity();
    let source = WorkflowSource::new(rest_client(&server, &identity));
    let err = source.fetch(&SubjectId::new("user_1")).await.unwrap_err();

    assert!(matches!(err, FetchError::Rejected { status: 503, .. }));
}

#[tokio::test]
async fn concurrent_caches_issue_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ROLE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"user_id": "user_1", "role": "user"}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let identity = signed_in_identity();
    let registry = CacheRegistry::in_memory();
    let source = Arc::new(RoleSource::new(rest_client(&server, &identity)));

    let caches: Vec<ResourceCache<UserRole>> = (0..4)
        .map(|_| {
            ResourceCache::<UserRole>::builder(&registry, source.clone())
                .build()
                .unwrap()
        })
        .collect();

    let snapshot = identity.snapshot();
    futures_util::future::join_all(
        caches
            .iter()
            .map(|cache| cache.sync_identity(snapshot.clone())),
    )
    .await;

    for cache in &caches {
        let published = cache.snapshot();
        assert_eq!(published.source, ValueSource::Remote);
        assert!(published.value.is_user());
    }
    assert_eq!(registry.stats(ResourceKind::Role).remote_calls, 1);
    assert_eq!(registry.stats(ResourceKind::Role).joined_requests, 3);
}

#[tokio::test]
async fn gatehouse_resolves_all_resources() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ROLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"role": "admin"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CREDITS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"credits": 120})))
        .mount(&server)
        .await;
    mount_workflow(&server).await;

    let gatehouse = Gatehouse::open(&config_for(&server, 5000)).unwrap();
    gatehouse.identity().sign_in("user_1", "token-1");
    gatehouse.sync(gatehouse.identity().snapshot()).await;

    assert!(gatehouse.roles().value().is_admin());
    assert_eq!(gatehouse.credits().value().credits, 120);
    assert_eq!(gatehouse.workflow().value().groups.len(), 2);

    gatehouse.sign_out();
    assert!(!gatehouse.roles().value().has_role());
    assert_eq!(gatehouse.credits().value().credits, 0);
    assert!(gatehouse.workflow().value().groups.is_empty());
}

#[tokio::test]
async fn failing_service_falls_back_per_resource() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ROLE_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "db down"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CREDITS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let gatehouse = Gatehouse::open(&config_for(&server, 5000)).unwrap();
    let identity = IdentitySnapshot::signed_in("user_1").with_metadata("credits", json!(33));
    gatehouse.identity().sign_in_with(identity.clone(), "token-1");
    gatehouse.sync(identity).await;

    let role = gatehouse.roles().snapshot();
    assert_eq!(role.source, ValueSource::DefaultFallback);
    assert!(role.value.is_user());

    let credits = gatehouse.credits().snapshot();
    assert_eq!(credits.source, ValueSource::DefaultFallback);
    assert_eq!(credits.value.credits, 33);
}

#[tokio::test]
async fn slow_service_is_retried_then_defaulted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ROLE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"role": "admin"}))
                .set_delay(Duration::from_secs(2)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let gatehouse = Gatehouse::open(&config_for(&server, 100)).unwrap();
    gatehouse.identity().sign_in("user_1", "token-1");
    gatehouse
        .roles()
        .sync_identity(gatehouse.identity().snapshot())
        .await;

    let role = gatehouse.roles().snapshot();
    assert_eq!(role.source, ValueSource::DefaultFallback);
    assert!(matches!(
        role.advisory,
        Some(FetchError::RetriesExhausted { attempts: 2, .. })
    ));
    assert_eq!(gatehouse.stats()[0].1.timeouts, 2);
}

#[tokio::test]
async fn retry_after_subject_switch_never_uses_the_new_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ROLE_PATH))
        .and(header("authorization", "Bearer token-a"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"user_id": "alice", "role": "user"}))
                .set_delay(Duration::from_secs(2)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ROLE_PATH))
        .and(header("authorization", "Bearer token-b"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"user_id": "bob", "role": "admin"})),
        )
        .expect(0)
        .mount(&server)
        .await;

    let identity = IdentityHandle::new();
    identity.sign_in("alice", "token-a");
    let registry = CacheRegistry::in_memory();
    let policy = ResourcePolicy::role_defaults()
        .with_fetch_timeout(Duration::from_millis(200))
        .with_max_retries(1)
        .with_retry_backoff(Duration::from_millis(300));
    let cache = Arc::new(
        ResourceCache::<UserRole>::builder(
            &registry,
            Arc::new(RoleSource::new(rest_client(&server, &identity))),
        )
        .policy(policy.clone())
        .build()
        .unwrap(),
    );

    let alice = SubjectId::new("alice");
    let for_alice = tokio::spawn({
        let cache = Arc::clone(&cache);
        let snapshot = identity.snapshot();
        async move { cache.sync_identity(snapshot).await }
    });

    // First race has timed out; the retry is still waiting out its backoff.
    tokio::time::sleep(Duration::from_millis(300)).await;
    identity.sign_in("bob", "token-b");
    for_alice.await.unwrap();

    let published = cache.snapshot();
    assert!(published.is_for(&alice));
    assert!(!published.value.is_admin());
    assert_eq!(published.source, ValueSource::DefaultFallback);
    assert!(matches!(published.advisory, Some(FetchError::Credential { .. })));

    let stored = registry.persistent::<UserRole>(policy.ttl).read_stale(&alice);
    assert!(stored.is_none());
}

#[tokio::test]
async fn gatehouse_rejects_zero_request_timeout() {
    let server = MockServer::start().await;
    let mut config = config_for(&server, 5000);
    config.request_timeout_ms = 0;

    let opened = Gatehouse::with_store(&config, Arc::new(InMemoryStore::new()));

    assert!(matches!(
        opened,
        Err(ClientError::Config(ClientConfigError::InvalidValue {
            field: "request_timeout_ms",
            ..
        }))
    ));
}
