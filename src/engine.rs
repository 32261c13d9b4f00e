//! Boundary to the workflow execution engine.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::models::execution::{ExecutionSummary, ManualExecutionRequest, RunResult};
use crate::models::users::AuthenticatedUser;
use crate::services::chat_hub::interceptor::OutputSink;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The execution was stopped before it completed.
    #[error("Execution was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// Runs workflows on behalf of the chat hub.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Starts a manual execution, streaming node output into `output`.
    ///
    /// Returns the execution id, or `None` when the engine did not start one.
    async fn execute_manually(
        &self,
        request: ManualExecutionRequest,
        user: &AuthenticatedUser,
        output: Arc<dyn OutputSink>,
    ) -> Result<Option<String>, EngineError>;

    /// Waits for the execution to finish and returns its result.
    async fn post_execute(&self, execution_id: &str) -> Result<Option<RunResult>, EngineError>;

    async fn find_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionSummary>, EngineError>;

    /// Requests cancellation of a running execution.
    async fn stop(&self, execution_id: &str, workflow_ids: &[String]) -> Result<(), EngineError>;
}
