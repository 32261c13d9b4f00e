//! Ordered persistence of streamed AI messages.
//!
//! Aggregator callbacks run synchronously inside the response stream, so they
//! only enqueue commands. A single writer task per turn applies them in the
//! order they were enqueued.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::aggregator::{AggregatedMessage, AggregatorHandler};
use crate::error::Result;
use crate::models::chat_hub::{
    AI_MESSAGE_NAME, ChatHubMessageStatus, ChatHubMessageType, FinalizeOutcome, ModelColumns,
    NewChatHubMessage,
};
use crate::store::ChatHubStore;

#[derive(Debug)]
pub enum WriterCommand {
    Begin {
        id: Uuid,
        previous_message_id: Option<Uuid>,
        retry_of_message_id: Option<Uuid>,
    },
    End {
        id: Uuid,
        status: ChatHubMessageStatus,
        content: String,
    },
    Error {
        id: Uuid,
        content: String,
    },
    ExecutionStarted(String),
    Flush(oneshot::Sender<()>),
    /// Applied after everything queued before it; later commands are dropped.
    Stop,
}

/// Handle to the per-turn writer task.
pub struct MessageWriter {
    tx: mpsc::UnboundedSender<WriterCommand>,
    task: JoinHandle<()>,
}

impl MessageWriter {
    pub fn spawn(store: Arc<dyn ChatHubStore>, session_id: Uuid, model: ModelColumns) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = WriterTask {
            store,
            session_id,
            model,
            execution_id: None,
            inserted: Vec::new(),
        };
        let task = tokio::spawn(worker.run(rx));
        Self { tx, task }
    }

    /// Aggregator handler that feeds this writer.
    pub fn handler(&self) -> PersistingHandler {
        PersistingHandler {
            tx: self.tx.clone(),
        }
    }

    pub fn execution_started(&self, execution_id: &str) {
        self.send(WriterCommand::ExecutionStarted(execution_id.to_string()));
    }

    /// Waits until every command enqueued so far has been applied.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(WriterCommand::Flush(ack_tx));
        let _ = ack_rx.await;
    }

    /// Applies outstanding commands and joins the task.
    ///
    /// Handlers still held elsewhere keep the channel open, so the task is
    /// stopped explicitly rather than by closing it.
    pub async fn shutdown(self) {
        self.send(WriterCommand::Stop);
        if let Err(e) = self.task.await {
            error!(error = %e, "[ChatHub] Message writer task failed");
        }
    }

    fn send(&self, command: WriterCommand) {
        if self.tx.send(command).is_err() {
            warn!("[ChatHub] Message writer is gone, dropping command");
        }
    }
}

/// [`AggregatorHandler`] that turns lifecycle events into writer commands.
#[derive(Clone)]
pub struct PersistingHandler {
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl PersistingHandler {
    fn send(&self, command: WriterCommand) {
        if self.tx.send(command).is_err() {
            debug!("[ChatHub] Message writer closed before stream ended");
        }
    }
}

impl AggregatorHandler for PersistingHandler {
    fn on_begin(&mut self, message: &AggregatedMessage) {
        self.send(WriterCommand::Begin {
            id: message.id,
            previous_message_id: message.previous_message_id,
            retry_of_message_id: message.retry_of_message_id,
        });
    }

    fn on_item(&mut self, _message: &AggregatedMessage, _chunk: &str) {}

    fn on_end(&mut self, message: &AggregatedMessage) {
        self.send(WriterCommand::End {
            id: message.id,
            status: message.status,
            content: message.content.clone(),
        });
    }

    fn on_error(&mut self, message: &AggregatedMessage, error: &str) {
        debug!(message_id = %message.id, error, "[ChatHub] Streamed message failed");
        self.send(WriterCommand::Error {
            id: message.id,
            content: message.content.clone(),
        });
    }
}

struct WriterTask {
    store: Arc<dyn ChatHubStore>,
    session_id: Uuid,
    model: ModelColumns,
    execution_id: Option<String>,
    /// Rows inserted before the execution id was known.
    inserted: Vec<Uuid>,
}

impl WriterTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
        while let Some(command) = rx.recv().await {
            if matches!(command, WriterCommand::Stop) {
                break;
            }
            if let Err(e) = self.apply(command).await {
                error!(session_id = %self.session_id, error = %e, "[ChatHub] Failed to persist streamed message");
            }
        }
    }

    async fn apply(&mut self, command: WriterCommand) -> Result<()> {
        match command {
            WriterCommand::Begin {
                id,
                previous_message_id,
                retry_of_message_id,
            } => {
                self.store
                    .insert_message(NewChatHubMessage {
                        id,
                        session_id: self.session_id,
                        message_type: ChatHubMessageType::Ai,
                        name: AI_MESSAGE_NAME.to_string(),
                        content: String::new(),
                        status: ChatHubMessageStatus::Running,
                        model: self.model.clone(),
                        execution_id: self.execution_id.clone(),
                        previous_message_id,
                        retry_of_message_id,
                        revision_of_message_id: None,
                    })
                    .await?;
                if self.execution_id.is_none() {
                    self.inserted.push(id);
                }
            }
            WriterCommand::End { id, status, content } => {
                self.finalize(id, status, content).await?;
            }
            WriterCommand::Error { id, content } => {
                self.finalize(id, ChatHubMessageStatus::Error, content).await?;
            }
            WriterCommand::ExecutionStarted(execution_id) => {
                let pending = std::mem::take(&mut self.inserted);
                self.store
                    .set_message_execution_id(self.session_id, &pending, &execution_id)
                    .await?;
                self.execution_id = Some(execution_id);
            }
            WriterCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            WriterCommand::Stop => {}
        }
        Ok(())
    }

    async fn finalize(&self, id: Uuid, status: ChatHubMessageStatus, content: String) -> Result<()> {
        let outcome = self
            .store
            .finalize_message(self.session_id, id, status, Some(content.clone()))
            .await?;

        match outcome {
            FinalizeOutcome::Applied => {}
            FinalizeOutcome::AlreadyTerminal(ChatHubMessageStatus::Cancelled) => {
                // Stopped by the user first; keep what was streamed until then.
                self.store
                    .update_message_content(self.session_id, id, &content)
                    .await?;
            }
            FinalizeOutcome::AlreadyTerminal(existing) => {
                debug!(message_id = %id, %existing, requested = %status, "[ChatHub] Message already finalized");
            }
        }
        Ok(())
    }
}
