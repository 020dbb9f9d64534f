//! Remote sources for the three cached resources.

use async_trait::async_trait;
use futures_util::future::try_join3;
use gatehouse_cache::ResourceSource;
use gatehouse_core::{
    AvailableModels, CreditBalance, FetchError, ResourceKind, SubjectId, UserRole, WorkflowBundle,
    WorkflowConfig, WorkflowGroup,
};

use crate::rest::RestClient;

pub const ROLE_PATH: &str = "/api/v1/user/role";
pub const CREDITS_PATH: &str = "/api/v1/credits/balance";
pub const WORKFLOW_GROUPS_PATH: &str = "/api/v1/workflow/groups";
pub const AVAILABLE_MODELS_PATH: &str = "/api/v1/models/available";
pub const WORKFLOW_CONFIG_PATH: &str = "/api/v1/workflow/config";

/// The subject's role. The service resolves it from the bearer credential.
#[derive(Debug, Clone)]
pub struct RoleSource {
    rest: RestClient,
}

impl RoleSource {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl ResourceSource<UserRole> for RoleSource {
    async fn fetch(&self, subject: &SubjectId) -> Result<UserRole, FetchError> {
        self.rest.get_json(ResourceKind::Role, subject, ROLE_PATH).await
    }
}

#[derive(Debug, Clone)]
pub struct CreditSource {
    rest: RestClient,
}

impl CreditSource {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl ResourceSource<CreditBalance> for CreditSource {
    async fn fetch(&self, subject: &SubjectId) -> Result<CreditBalance, FetchError> {
        self.rest
            .get_json(ResourceKind::Credits, subject, CREDITS_PATH)
            .await
    }
}

/// Groups, models and step config in one fetch.
///
/// The three requests run concurrently and fail as a unit: the first error
/// drops the other two.
#[derive(Debug, Clone)]
pub struct WorkflowSource {
    rest: RestClient,
}

impl WorkflowSource {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl ResourceSource<WorkflowBundle> for WorkflowSource {
    async fn fetch(&self, subject: &SubjectId) -> Result<WorkflowBundle, FetchError> {
        let kind = ResourceKind::Workflow;
        let (groups, models, config) = try_join3(
            self.rest
                .get_json::<Vec<WorkflowGroup>>(kind, subject, WORKFLOW_GROUPS_PATH),
            self.rest
                .get_json::<AvailableModels>(kind, subject, AVAILABLE_MODELS_PATH),
            self.rest
                .get_json::<WorkflowConfig>(kind, subject, WORKFLOW_CONFIG_PATH),
        )
        .await?;

        Ok(WorkflowBundle {
            groups,
            models: Some(models),
            config: Some(config),
        })
    }
}
