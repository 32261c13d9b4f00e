use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

use crate::models::workflow::{TriggerToStartFrom, WorkflowData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionStatus {
    New,
    Running,
    Waiting,
    Success,
    Error,
    Canceled,
    Crashed,
}

/// How an execution was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    Manual,
}

/// Everything the engine needs to run a chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualExecutionRequest {
    pub workflow_data: WorkflowData,
    pub trigger_to_start_from: TriggerToStartFrom,
    pub mode: ExecutionMode,
    /// Whether node output is streamed to the output sink while running.
    pub streaming: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionErrorInfo {
    pub message: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One item on a node output branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeItem {
    pub json: serde_json::Value,
}

/// Data produced by one run of one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRun {
    /// Main output branches; a branch is `None` when nothing was emitted on it.
    #[serde(default)]
    pub main: Vec<Option<Vec<NodeItem>>>,
}

/// Terminal result of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error: Option<ExecutionErrorInfo>,
    /// Runs per node name, oldest first.
    #[serde(default)]
    pub run_data: HashMap<String, Vec<NodeRun>>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Best-effort human readable failure text.
    pub fn error_message(&self) -> Option<String> {
        self.error
            .as_ref()
            .map(|e| e.description.clone().unwrap_or_else(|| e.message.clone()))
    }

    /// Text `output` of the last run of `node_name`, taken from the first
    /// main branch that carries one.
    pub fn text_output(&self, node_name: &str) -> Option<String> {
        let last_run = self.run_data.get(node_name)?.last()?;

        last_run.main.iter().flatten().find_map(|branch| {
            branch
                .first()
                .and_then(|item| item.json.get("output"))
                .and_then(|output| output.as_str())
                .map(str::to_string)
        })
    }
}

/// What the engine knows about an execution, used when stopping it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
}
