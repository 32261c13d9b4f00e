use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::workflow::{NewWorkflow, WorkflowData};

/// Workflow storage owned by the host application.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Persists a new workflow under `project_id` and returns it with its id.
    async fn save(&self, workflow: NewWorkflow, project_id: &str) -> Result<WorkflowData>;

    /// Finds a workflow the user may execute.
    async fn find_for_user(&self, workflow_id: &str, user_id: Uuid) -> Result<Option<WorkflowData>>;

    async fn delete(&self, workflow_id: &str) -> Result<()>;
}
