//! Scripted execution engine
//!
//! Each call to `execute_manually` consumes the next queued [`Script`]: its
//! steps are written to the output sink from a background task, and
//! `post_execute` reports the scripted outcome once they have run.

use async_trait::async_trait;
use chathub::engine::{EngineError, ExecutionEngine};
use chathub::models::execution::{
    ExecutionErrorInfo, ExecutionStatus, ExecutionSummary, ManualExecutionRequest, NodeItem,
    NodeRun, RunResult,
};
use chathub::models::users::AuthenticatedUser;
use chathub::services::chat_hub::constants::{REPLY_AGENT_NODE, TITLE_GENERATOR_AGENT_NODE};
use chathub::services::chat_hub::interceptor::{OutputSink, WriteChunk};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub enum Step {
    /// Raw text handed to the output sink.
    Write(String),
    /// Pauses until the notify fires or the execution is stopped.
    WaitFor(Arc<Notify>),
}

pub enum Outcome {
    Success { title: Option<String> },
    Failure(String),
    /// `execute_manually` returns no execution id.
    NotStarted,
    /// `post_execute` returns no result.
    NoResult,
}

pub struct Script {
    pub steps: Vec<Step>,
    pub outcome: Outcome,
}

impl Script {
    pub fn new(steps: Vec<Step>, outcome: Outcome) -> Self {
        Self { steps, outcome }
    }

    /// The reply agent streams `text` as one message and the run succeeds.
    pub fn reply(text: &str) -> Self {
        Self::new(reply_steps(REPLY_AGENT_NODE, text), Outcome::Success { title: None })
    }

    pub fn reply_with_title(text: &str, title: &str) -> Self {
        Self::new(
            reply_steps(REPLY_AGENT_NODE, text),
            Outcome::Success {
                title: Some(title.to_string()),
            },
        )
    }
}

/// One JSON line of engine output for `node`.
pub fn chunk(kind: &str, node: &str, content: Option<&str>) -> String {
    let mut value = serde_json::json!({
        "type": kind,
        "metadata": {
            "nodeId": format!("{}-id", node),
            "nodeName": node,
            "runIndex": 0,
            "itemIndex": 0,
        }
    });
    if let Some(content) = content {
        value["content"] = serde_json::json!(content);
    }
    format!("{}\n", value)
}

pub fn reply_steps(node: &str, text: &str) -> Vec<Step> {
    vec![
        Step::Write(chunk("begin", node, None)),
        Step::Write(chunk("item", node, Some(text))),
        Step::Write(chunk("end", node, None)),
    ]
}

struct Execution {
    workflow_id: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<bool>>,
    outcome: Option<Outcome>,
    status: ExecutionStatus,
}

#[derive(Default)]
pub struct ScriptedEngine {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ManualExecutionRequest>>,
    executions: Mutex<HashMap<String, Execution>>,
    stopped: Mutex<Vec<(String, Vec<String>)>>,
    next_id: AtomicUsize,
}

impl ScriptedEngine {
    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn requests(&self) -> Vec<ManualExecutionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<(String, Vec<String>)> {
        self.stopped.lock().unwrap().clone()
    }

    /// Pretends an execution exists and is still running.
    pub fn register_running(&self, execution_id: &str, workflow_id: &str) {
        self.executions.lock().unwrap().insert(
            execution_id.to_string(),
            Execution {
                workflow_id: workflow_id.to_string(),
                cancel: CancellationToken::new(),
                task: None,
                outcome: None,
                status: ExecutionStatus::Running,
            },
        );
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn execute_manually(
        &self,
        request: ManualExecutionRequest,
        _user: &AuthenticatedUser,
        output: Arc<dyn OutputSink>,
    ) -> Result<Option<String>, EngineError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("no script queued for execution");
        let workflow_id = request.workflow_data.id.clone();
        self.requests.lock().unwrap().push(request);

        if matches!(script.outcome, Outcome::NotStarted) {
            return Ok(None);
        }

        let id = format!("exec-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let steps = script.steps;
        let task = tokio::spawn(async move {
            for step in steps {
                if token.is_cancelled() {
                    return false;
                }
                match step {
                    Step::Write(text) => {
                        let _ = output.write(WriteChunk::Text(text));
                    }
                    Step::WaitFor(notify) => {
                        tokio::select! {
                            _ = notify.notified() => {}
                            _ = token.cancelled() => return false,
                        }
                    }
                }
            }
            true
        });

        self.executions.lock().unwrap().insert(
            id.clone(),
            Execution {
                workflow_id,
                cancel,
                task: Some(task),
                outcome: Some(script.outcome),
                status: ExecutionStatus::Running,
            },
        );
        Ok(Some(id))
    }

    async fn post_execute(&self, execution_id: &str) -> Result<Option<RunResult>, EngineError> {
        let (task, outcome) = {
            let mut executions = self.executions.lock().unwrap();
            let execution = executions
                .get_mut(execution_id)
                .ok_or_else(|| EngineError::Failed(format!("unknown execution {}", execution_id)))?;
            (execution.task.take(), execution.outcome.take())
        };

        let completed = match task {
            Some(task) => task.await.unwrap_or(false),
            None => false,
        };

        let set_status = |status| {
            if let Some(execution) = self.executions.lock().unwrap().get_mut(execution_id) {
                execution.status = status;
            }
        };

        if !completed {
            set_status(ExecutionStatus::Canceled);
            return Err(EngineError::Cancelled);
        }

        match outcome {
            Some(Outcome::Success { title }) => {
                set_status(ExecutionStatus::Success);
                let mut run_data = HashMap::new();
                if let Some(title) = title {
                    run_data.insert(
                        TITLE_GENERATOR_AGENT_NODE.to_string(),
                        vec![NodeRun {
                            main: vec![Some(vec![NodeItem {
                                json: serde_json::json!({ "output": title }),
                            }])],
                        }],
                    );
                }
                Ok(Some(RunResult {
                    status: ExecutionStatus::Success,
                    error: None,
                    run_data,
                }))
            }
            Some(Outcome::Failure(message)) => {
                set_status(ExecutionStatus::Error);
                Ok(Some(RunResult {
                    status: ExecutionStatus::Error,
                    error: Some(ExecutionErrorInfo {
                        message,
                        description: None,
                    }),
                    run_data: HashMap::new(),
                }))
            }
            Some(Outcome::NoResult) | Some(Outcome::NotStarted) | None => Ok(None),
        }
    }

    async fn find_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionSummary>, EngineError> {
        let executions = self.executions.lock().unwrap();
        Ok(executions.get(execution_id).map(|execution| ExecutionSummary {
            id: execution_id.to_string(),
            workflow_id: execution.workflow_id.clone(),
            status: execution.status,
        }))
    }

    async fn stop(&self, execution_id: &str, workflow_ids: &[String]) -> Result<(), EngineError> {
        self.stopped
            .lock()
            .unwrap()
            .push((execution_id.to_string(), workflow_ids.to_vec()));
        if let Some(execution) = self.executions.lock().unwrap().get(execution_id) {
            execution.cancel.cancel();
        }
        Ok(())
    }
}
