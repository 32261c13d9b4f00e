//! Chat hub turn orchestration
//!
//! A chat turn answers one human message by running a workflow through the
//! execution engine and relaying its streamed output to the client.
//!
//! # Flow
//!
//! 1. **Prepare** (one transaction): load or create the session, write the
//!    human message, resolve the conversation branch it continues, and pick the
//!    workflow to run: a generated base chat workflow, a custom agent's base
//!    chat workflow, or the user's own chat workflow.
//! 2. **Execute**: save the generated workflow, write the JSON-lines headers,
//!    and start the execution with an [`InterceptedSink`] as its output.
//! 3. **Stream**: every output line goes through the [`ChunkAggregator`],
//!    which assigns message ids, enriches the line, and enqueues persistence
//!    commands for the per-turn [`MessageWriter`].
//! 4. **Finalize**: end the stream, flush the writer, resolve the turn state.
//!    A message cancelled by the user or by a client disconnect turns any
//!    failure into a cancelled turn.
//!
//! Generated workflows are handed to the [`WorkflowCleanupQueue`] afterwards.

pub mod aggregator;
pub mod constants;
pub mod history;
pub mod interceptor;
pub mod locks;
pub mod persistence;
pub mod providers;
pub mod turn;
pub mod workflow_builder;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ChatHubConfig;
use crate::engine::{EngineError, ExecutionEngine};
use crate::error::{Error, Result};
use crate::models::chat_hub::{
    ChatHubConversation, ChatHubConversationResponse, ChatHubMessage, ChatHubMessageStatus,
    ChatHubMessageType, ChatHubSessionDto, ConversationModel, FinalizeOutcome, LlmProvider,
    NewChatHubMessage, NewChatHubSession, NodeCredential, NodeCredentials, SelectedModel,
};
use crate::models::execution::{ExecutionMode, ExecutionStatus, ManualExecutionRequest};
use crate::models::requests::{EditMessagePayload, HumanMessagePayload, RegenerateMessagePayload};
use crate::models::users::AuthenticatedUser;
use crate::models::workflow::{
    CHAT_TRIGGER_NODE_TYPE, NewWorkflow, RESPOND_TO_CHAT_NODE_TYPE, TriggerToStartFrom,
    WorkflowData,
};
use crate::services::agents::ChatAgentRepository;
use crate::services::credentials::{self, CredentialsFinder};
use crate::services::workflows::WorkflowRepository;
use crate::store::{ChatHubStore, ChatHubTransaction};
use crate::workers::WorkflowCleanupQueue;

use aggregator::{ChunkAggregator, enrich_lines};
use constants::{GENERIC_FAILURE_MESSAGE, JSONL_STREAM_HEADERS, TITLE_GENERATOR_AGENT_NODE};
use interceptor::{InterceptedSink, OutputSink, ResponseChannel, Transform};
use locks::SessionLocks;
use persistence::MessageWriter;
use turn::{TurnEvent, TurnState, TurnStateMachine};
use workflow_builder::{ChatWorkflowInput, EphemeralWorkflowBuilder};

/// Result of a chat turn that ran an execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub session_id: Uuid,
    pub state: TurnState,
    pub execution_id: Option<String>,
    /// AI messages produced by the turn, in stream order.
    pub message_ids: Vec<Uuid>,
    /// New session title, when the turn generated one.
    pub title: Option<String>,
}

pub struct ChatHubServiceArgs {
    pub store: Arc<dyn ChatHubStore>,
    pub engine: Arc<dyn ExecutionEngine>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub credentials: Arc<dyn CredentialsFinder>,
    pub agents: Arc<dyn ChatAgentRepository>,
    pub cleanup: WorkflowCleanupQueue,
    pub config: ChatHubConfig,
}

pub struct ChatHubService {
    store: Arc<dyn ChatHubStore>,
    engine: Arc<dyn ExecutionEngine>,
    workflows: Arc<dyn WorkflowRepository>,
    credentials: Arc<dyn CredentialsFinder>,
    agents: Arc<dyn ChatAgentRepository>,
    builder: EphemeralWorkflowBuilder,
    cleanup: WorkflowCleanupQueue,
    locks: SessionLocks,
    config: ChatHubConfig,
}

/// The workflow a turn runs.
enum PreparedWorkflow {
    /// Generated for this turn; saved under the credential's project, deleted afterwards.
    Ephemeral {
        workflow: NewWorkflow,
        trigger: TriggerToStartFrom,
        project_id: String,
    },
    /// The user's own chat workflow, run as is.
    UserOwned {
        workflow: WorkflowData,
        trigger: TriggerToStartFrom,
    },
}

struct PreparedTurn {
    session_id: Uuid,
    /// The human message the streamed replies answer.
    reply_to: Uuid,
    retry_of_message_id: Option<Uuid>,
    selected: SelectedModel,
    workflow: PreparedWorkflow,
    generate_title: bool,
}

/// A base chat workflow to generate: one model, one credential, optional system prompt.
struct BaseChat<'a> {
    provider: LlmProvider,
    model: &'a str,
    credential_id: String,
    system_prompt: Option<&'a str>,
}

enum RunOutcome {
    Succeeded { title: Option<String> },
    Cancelled,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn jsonl_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in JSONL_STREAM_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    headers
}

impl ChatHubService {
    pub fn new(args: ChatHubServiceArgs) -> Self {
        Self {
            builder: EphemeralWorkflowBuilder::new(args.config.providers.clone()),
            store: args.store,
            engine: args.engine,
            workflows: args.workflows,
            credentials: args.credentials,
            agents: args.agents,
            cleanup: args.cleanup,
            locks: SessionLocks::new(),
            config: args.config,
        }
    }

    // ========================================================================
    // TURNS
    // ========================================================================

    /// Sends a human message and streams the reply into `response`.
    pub async fn send_human_message(
        &self,
        user: &AuthenticatedUser,
        payload: HumanMessagePayload,
        response: ResponseChannel,
    ) -> Result<TurnOutcome> {
        if payload.message.trim().is_empty() {
            return Err(Error::validation("message", "Message cannot be empty"));
        }

        self.locks
            .run_exclusive(payload.session_id, async {
                let prepared = self.prepare_human_message(user, &payload).await?;
                self.run_turn(user, prepared, response).await
            })
            .await
    }

    /// Edits a message.
    ///
    /// AI messages are overwritten in place and `None` is returned. A human
    /// message gets a new revision that is answered like a fresh message.
    pub async fn edit_message(
        &self,
        user: &AuthenticatedUser,
        payload: EditMessagePayload,
        response: ResponseChannel,
    ) -> Result<Option<TurnOutcome>> {
        self.locks
            .run_exclusive(payload.session_id, async {
                match self.prepare_edit(user, &payload).await? {
                    Some(prepared) => self.run_turn(user, prepared, response).await.map(Some),
                    None => Ok(None),
                }
            })
            .await
    }

    /// Generates a new answer to the human message an AI message replied to.
    pub async fn regenerate_message(
        &self,
        user: &AuthenticatedUser,
        payload: RegenerateMessagePayload,
        response: ResponseChannel,
    ) -> Result<TurnOutcome> {
        self.locks
            .run_exclusive(payload.session_id, async {
                let prepared = self.prepare_regenerate(user, &payload).await?;
                self.run_turn(user, prepared, response).await
            })
            .await
    }

    /// Stops the execution behind a running AI message and marks it cancelled.
    pub async fn stop_generation(
        &self,
        user: &AuthenticatedUser,
        session_id: Uuid,
        message_id: Uuid,
    ) -> Result<()> {
        self.store
            .get_session(session_id, user.id)
            .await?
            .ok_or_else(|| Error::NotFound("Chat session not found".into()))?;

        let message = self
            .store
            .get_message(session_id, message_id)
            .await?
            .ok_or_else(|| Error::NotFound("Chat message not found".into()))?;

        if message.message_type != ChatHubMessageType::Ai {
            return Err(Error::validation("messageId", "Can only stop AI messages"));
        }
        if message.status != ChatHubMessageStatus::Running {
            return Err(Error::validation(
                "messageId",
                "Can only stop messages that are currently running",
            ));
        }

        let not_associated =
            || Error::validation("messageId", "Message is not associated with a workflow execution");
        let execution_id = message.execution_id.as_deref().ok_or_else(not_associated)?;
        let execution = self
            .engine
            .find_execution(execution_id)
            .await?
            .ok_or_else(not_associated)?;

        info!(
            session_id = %session_id,
            message_id = %message_id,
            execution_id = %execution.id,
            "[ChatHub] Stopping generation"
        );
        self.engine
            .stop(&execution.id, std::slice::from_ref(&execution.workflow_id))
            .await?;

        let outcome = self
            .store
            .finalize_message(session_id, message_id, ChatHubMessageStatus::Cancelled, None)
            .await?;
        if let FinalizeOutcome::AlreadyTerminal(status) = outcome {
            debug!(message_id = %message_id, %status, "[ChatHub] Message finished before stop applied");
        }

        Ok(())
    }

    // ========================================================================
    // SESSIONS
    // ========================================================================

    pub async fn get_conversations(&self, user: &AuthenticatedUser) -> Result<Vec<ChatHubSessionDto>> {
        let sessions = self.store.list_sessions(user.id).await?;
        Ok(sessions.into_iter().map(ChatHubSessionDto::from).collect())
    }

    pub async fn get_conversation(
        &self,
        user: &AuthenticatedUser,
        session_id: Uuid,
    ) -> Result<ChatHubConversationResponse> {
        let session = self
            .store
            .get_session(session_id, user.id)
            .await?
            .ok_or_else(|| Error::NotFound("Chat session not found".into()))?;

        let messages = self
            .store
            .list_messages(session_id)
            .await?
            .into_iter()
            .map(|m| (m.id, m.into()))
            .collect();

        Ok(ChatHubConversationResponse {
            session: session.into(),
            conversation: ChatHubConversation { messages },
        })
    }

    pub async fn update_session_title(
        &self,
        user: &AuthenticatedUser,
        session_id: Uuid,
        title: &str,
    ) -> Result<ChatHubSessionDto> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation("title", "Title cannot be empty"));
        }

        if !self.store.update_session_title(session_id, user.id, title).await? {
            return Err(Error::NotFound("Session not found".into()));
        }

        let session = self
            .store
            .get_session(session_id, user.id)
            .await?
            .ok_or_else(|| Error::NotFound("Session not found".into()))?;
        Ok(session.into())
    }

    pub async fn delete_session(&self, user: &AuthenticatedUser, session_id: Uuid) -> Result<()> {
        if !self.store.delete_session(session_id, user.id).await? {
            return Err(Error::NotFound("Session not found".into()));
        }
        info!(session_id = %session_id, user_id = %user.id, "[ChatHub] Session deleted");
        Ok(())
    }

    // ========================================================================
    // PREPARATION
    // ========================================================================

    fn select_model(&self, model: &ConversationModel, credentials: &NodeCredentials) -> SelectedModel {
        let credential_id = model
            .llm()
            .and_then(|(provider, _)| self.builder.templates().pick_credential_id(provider, credentials));
        SelectedModel {
            model: model.clone(),
            credential_id,
        }
    }

    async fn prepare_human_message(
        &self,
        user: &AuthenticatedUser,
        payload: &HumanMessagePayload,
    ) -> Result<PreparedTurn> {
        let session_id = payload.session_id;
        let selected = self.select_model(&payload.model, &payload.credentials);

        let mut tx = self.store.begin().await?;

        if tx.get_session(session_id, user.id).await?.is_none() {
            tx.create_session(NewChatHubSession {
                id: session_id,
                owner_id: user.id,
                title: self.config.default_session_title.clone(),
                model: selected.columns(),
            })
            .await?;
            info!(session_id = %session_id, user_id = %user.id, "[ChatHub] Session created");
        }

        if let Some(previous_id) = payload.previous_message_id {
            if tx.get_message(session_id, previous_id).await?.is_none() {
                return Err(Error::NotFound(
                    "The previous message does not exist in the session".into(),
                ));
            }
        }

        let messages = history::index_by_id(tx.list_messages(session_id).await?);
        let history = history::resolve(&messages, payload.previous_message_id);

        self.insert_human_message(
            &mut *tx,
            user,
            HumanMessage {
                id: payload.message_id,
                session_id,
                content: &payload.message,
                previous_message_id: payload.previous_message_id,
                revision_of_message_id: None,
            },
            &selected,
        )
        .await?;

        let generate_title = payload.previous_message_id.is_none();
        let workflow = self
            .prepare_workflow(
                user,
                session_id,
                &payload.model,
                &payload.credentials,
                &history,
                &payload.message,
                generate_title,
            )
            .await?;

        tx.commit().await?;

        // User-owned graphs have no title branch to read from.
        let generate_title =
            generate_title && matches!(workflow, PreparedWorkflow::Ephemeral { .. });

        Ok(PreparedTurn {
            session_id,
            reply_to: payload.message_id,
            retry_of_message_id: None,
            selected,
            workflow,
            generate_title,
        })
    }

    async fn prepare_edit(
        &self,
        user: &AuthenticatedUser,
        payload: &EditMessagePayload,
    ) -> Result<Option<PreparedTurn>> {
        let session_id = payload.session_id;
        let selected = self.select_model(&payload.model, &payload.credentials);

        let mut tx = self.store.begin().await?;
        let message = load_session_message(&mut *tx, user, session_id, payload.edit_id).await?;

        match message.message_type {
            ChatHubMessageType::Ai => {
                tx.update_message_content(session_id, message.id, &payload.message)
                    .await?;
                tx.commit().await?;
                info!(session_id = %session_id, message_id = %message.id, "[ChatHub] AI message edited");
                Ok(None)
            }
            ChatHubMessageType::Human => {
                if payload.message.trim().is_empty() {
                    return Err(Error::validation("message", "Message cannot be empty"));
                }

                let messages = history::index_by_id(tx.list_messages(session_id).await?);
                let history = history::resolve(&messages, message.previous_message_id);
                let revision_of = message.revision_of_message_id.unwrap_or(message.id);

                self.insert_human_message(
                    &mut *tx,
                    user,
                    HumanMessage {
                        id: payload.message_id,
                        session_id,
                        content: &payload.message,
                        previous_message_id: message.previous_message_id,
                        revision_of_message_id: Some(revision_of),
                    },
                    &selected,
                )
                .await?;

                let workflow = self
                    .prepare_workflow(
                        user,
                        session_id,
                        &payload.model,
                        &payload.credentials,
                        &history,
                        &payload.message,
                        false,
                    )
                    .await?;

                tx.commit().await?;

                Ok(Some(PreparedTurn {
                    session_id,
                    reply_to: payload.message_id,
                    retry_of_message_id: None,
                    selected,
                    workflow,
                    generate_title: false,
                }))
            }
            ChatHubMessageType::System => Err(Error::validation(
                "messageId",
                "Only human and AI messages can be edited",
            )),
        }
    }

    async fn prepare_regenerate(
        &self,
        user: &AuthenticatedUser,
        payload: &RegenerateMessagePayload,
    ) -> Result<PreparedTurn> {
        let session_id = payload.session_id;
        let selected = self.select_model(&payload.model, &payload.credentials);

        let mut tx = self.store.begin().await?;
        let message = load_session_message(&mut *tx, user, session_id, payload.retry_id).await?;

        if message.message_type != ChatHubMessageType::Ai {
            return Err(Error::validation("messageId", "Can only retry AI messages"));
        }

        let messages = history::index_by_id(tx.list_messages(session_id).await?);
        let mut history = history::resolve(&messages, message.previous_message_id);

        let replay_index = history
            .iter()
            .rposition(|m| m.message_type == ChatHubMessageType::Human)
            .ok_or_else(|| {
                Error::validation("messageId", "No human message found to base the retry on")
            })?;
        history.truncate(replay_index + 1);
        let replayed = history[replay_index].clone();

        let retry_of = message.retry_of_message_id.unwrap_or(message.id);
        let workflow = self
            .prepare_workflow(
                user,
                session_id,
                &payload.model,
                &payload.credentials,
                &history,
                &replayed.content,
                false,
            )
            .await?;

        // Nothing was written, but the transaction keeps the reads consistent.
        tx.commit().await?;

        Ok(PreparedTurn {
            session_id,
            reply_to: replayed.id,
            retry_of_message_id: Some(retry_of),
            selected,
            workflow,
            generate_title: false,
        })
    }

    async fn insert_human_message(
        &self,
        tx: &mut dyn ChatHubTransaction,
        user: &AuthenticatedUser,
        message: HumanMessage<'_>,
        selected: &SelectedModel,
    ) -> Result<ChatHubMessage> {
        tx.insert_message(NewChatHubMessage {
            id: message.id,
            session_id: message.session_id,
            message_type: ChatHubMessageType::Human,
            name: user.display_name(),
            content: message.content.to_string(),
            status: ChatHubMessageStatus::Success,
            model: selected.columns(),
            execution_id: None,
            previous_message_id: message.previous_message_id,
            retry_of_message_id: None,
            revision_of_message_id: message.revision_of_message_id,
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn prepare_workflow(
        &self,
        user: &AuthenticatedUser,
        session_id: Uuid,
        model: &ConversationModel,
        credentials: &NodeCredentials,
        history: &[ChatHubMessage],
        message: &str,
        generate_title: bool,
    ) -> Result<PreparedWorkflow> {
        let base = match model {
            ConversationModel::N8n { workflow_id } => {
                return self
                    .prepare_user_workflow(user, session_id, workflow_id, message)
                    .await;
            }
            ConversationModel::CustomAgent { agent_id } => {
                let agent = self
                    .agents
                    .find_for_user(*agent_id, user.id)
                    .await?
                    .ok_or_else(|| Error::NotFound("Chat agent not found".into()))?;

                let credential_id = agent
                    .credential_id
                    .clone()
                    .or_else(|| {
                        self.builder
                            .templates()
                            .pick_credential_id(agent.provider, credentials)
                    })
                    .ok_or_else(missing_credentials)?;

                return self
                    .prepare_base_chat(
                        user,
                        session_id,
                        BaseChat {
                            provider: agent.provider,
                            model: &agent.model,
                            credential_id,
                            system_prompt: agent.system_prompt.as_deref(),
                        },
                        history,
                        message,
                        generate_title,
                    )
                    .await;
            }
            ConversationModel::Openai { model }
            | ConversationModel::Anthropic { model }
            | ConversationModel::Google { model } => model,
        };

        let (provider, _) = model
            .llm()
            .ok_or_else(|| Error::Internal("Model selection has no provider".into()))?;
        let credential_id = self
            .builder
            .templates()
            .pick_credential_id(provider, credentials)
            .ok_or_else(missing_credentials)?;

        self.prepare_base_chat(
            user,
            session_id,
            BaseChat {
                provider,
                model: base,
                credential_id,
                system_prompt: None,
            },
            history,
            message,
            generate_title,
        )
        .await
    }

    async fn prepare_base_chat(
        &self,
        user: &AuthenticatedUser,
        session_id: Uuid,
        chat: BaseChat<'_>,
        history: &[ChatHubMessage],
        message: &str,
        generate_title: bool,
    ) -> Result<PreparedWorkflow> {
        let credential =
            credentials::ensure_readable(self.credentials.as_ref(), user.id, &chat.credential_id)
                .await?;

        let template = self.builder.templates().get(chat.provider)?;
        let node_credentials = NodeCredentials::from([(
            template.credential_type.clone(),
            NodeCredential {
                id: credential.id.clone(),
                name: credential.name.clone(),
            },
        )]);

        let built = self.builder.build(&ChatWorkflowInput {
            session_id,
            history,
            human_message: message,
            credentials: &node_credentials,
            provider: chat.provider,
            model: chat.model,
            system_prompt: chat.system_prompt,
            generate_title,
        })?;
        let (workflow, trigger) = built.into_new_workflow(session_id);

        Ok(PreparedWorkflow::Ephemeral {
            workflow,
            trigger,
            project_id: credential.project_id,
        })
    }

    async fn prepare_user_workflow(
        &self,
        user: &AuthenticatedUser,
        session_id: Uuid,
        workflow_id: &str,
        message: &str,
    ) -> Result<PreparedWorkflow> {
        let mut workflow = self
            .workflows
            .find_for_user(workflow_id, user.id)
            .await?
            .ok_or_else(|| Error::NotFound("Workflow not found".into()))?;

        let trigger_name = {
            let mut triggers = workflow
                .nodes_of_type(CHAT_TRIGGER_NODE_TYPE)
                .filter(|node| !node.disabled);
            match (triggers.next(), triggers.next()) {
                (Some(trigger), None) => trigger.name.clone(),
                _ => {
                    return Err(Error::validation(
                        "workflowId",
                        "Workflow must have exactly one chat trigger",
                    ));
                }
            }
        };

        if workflow.nodes_of_type(RESPOND_TO_CHAT_NODE_TYPE).next().is_some() {
            return Err(Error::validation(
                "workflowId",
                "Respond to Chat nodes are not supported in custom agent workflows",
            ));
        }

        // Runs as a one-off manual execution, so pinned data must not short-circuit nodes.
        workflow.pin_data.clear();

        Ok(PreparedWorkflow::UserOwned {
            trigger: TriggerToStartFrom::chat_message(&trigger_name, session_id, message),
            workflow,
        })
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    async fn run_turn(
        &self,
        user: &AuthenticatedUser,
        prepared: PreparedTurn,
        response: ResponseChannel,
    ) -> Result<TurnOutcome> {
        let PreparedTurn {
            session_id,
            reply_to,
            retry_of_message_id,
            selected,
            workflow,
            generate_title,
        } = prepared;

        let (workflow_data, trigger, ephemeral) = match workflow {
            PreparedWorkflow::Ephemeral {
                workflow,
                trigger,
                project_id,
            } => (self.workflows.save(workflow, &project_id).await?, trigger, true),
            PreparedWorkflow::UserOwned { workflow, trigger } => (workflow, trigger, false),
        };

        let workflow_id = workflow_data.id.clone();
        let result = self
            .execute_chat_workflow(
                user,
                ChatExecution {
                    session_id,
                    reply_to,
                    retry_of_message_id,
                    selected,
                    workflow_data,
                    trigger,
                    generate_title,
                },
                response,
            )
            .await;

        if ephemeral {
            self.cleanup.schedule(workflow_id);
        }

        result
    }

    async fn execute_chat_workflow(
        &self,
        user: &AuthenticatedUser,
        execution: ChatExecution,
        response: ResponseChannel,
    ) -> Result<TurnOutcome> {
        let ChatExecution {
            session_id,
            reply_to,
            retry_of_message_id,
            selected,
            workflow_data,
            trigger,
            generate_title,
        } = execution;

        let mut machine = TurnStateMachine::new();
        machine.advance(TurnEvent::Prepared);

        info!(
            session_id = %session_id,
            workflow_id = %workflow_data.id,
            workflow_name = %workflow_data.name,
            "[ChatHub] Starting chat execution"
        );

        let writer = MessageWriter::spawn(self.store.clone(), session_id, selected.columns());
        let aggregator = Arc::new(Mutex::new(
            ChunkAggregator::new(
                Some(reply_to),
                retry_of_message_id,
                Box::new(writer.handler()),
            )
            .ignore_node(TITLE_GENERATOR_AGENT_NODE),
        ));

        let transform_aggregator = aggregator.clone();
        let transform: Transform = Box::new(move |text| {
            let mut aggregator = lock(&transform_aggregator);
            Ok(enrich_lines(&mut aggregator, text)?)
        });

        let watcher_channel = response.clone();
        let stream = Arc::new(InterceptedSink::wrap(response, transform));
        // Whichever fires first closes the open messages; later calls find none.
        let finish_aggregator = aggregator.clone();
        stream.on_finish(move || lock(&finish_aggregator).finalize_all());
        let close_aggregator = aggregator.clone();
        stream.on_close(move || lock(&close_aggregator).finalize_all());

        if let Err(e) = stream.write_head(StatusCode::OK, jsonl_headers()) {
            warn!(session_id = %session_id, error = %e, "[ChatHub] Client went away before headers were written");
        }
        machine.advance(TurnEvent::StreamOpened);

        let watcher_stream = stream.clone();
        let watcher = tokio::spawn(async move {
            watcher_channel.closed().await;
            watcher_stream.close();
        });

        let request = ManualExecutionRequest {
            workflow_data,
            trigger_to_start_from: trigger,
            mode: ExecutionMode::Manual,
            streaming: true,
        };
        let output: Arc<dyn OutputSink> = stream.clone();
        let mut execution_id = None;
        let run = self
            .run_execution(user, request, output, &writer, &mut execution_id, generate_title)
            .await;
        machine.advance(TurnEvent::RunReturned);

        let mut title = None;
        if let Ok(RunOutcome::Succeeded {
            title: Some(generated),
        }) = &run
        {
            let generated = generated.trim();
            if !generated.is_empty() {
                match self
                    .store
                    .update_session_title(session_id, user.id, generated)
                    .await
                {
                    Ok(_) => title = Some(generated.to_string()),
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "[ChatHub] Failed to store generated title")
                    }
                }
            }
        }

        // Decided before ending the stream: ending closes leftover open
        // messages as cancelled, which is not a user cancellation.
        watcher.abort();
        let disconnected = stream.is_disconnected();
        writer.flush().await;
        let opened = lock(&aggregator).message_ids();
        let cancelled = disconnected || self.any_cancelled(session_id, &opened).await;

        if let Err(e) = stream.end() {
            debug!(session_id = %session_id, error = %e, "[ChatHub] Failed to end response stream");
        }
        writer.shutdown().await;
        let message_ids = lock(&aggregator).message_ids();

        let state = match run {
            Ok(RunOutcome::Succeeded { .. }) if !cancelled => machine.advance(TurnEvent::Completed),
            Ok(_) => machine.advance(TurnEvent::Cancelled),
            Err(e) if cancelled => {
                info!(session_id = %session_id, error = %e, "[ChatHub] Execution failed after cancellation, treating as cancelled");
                machine.advance(TurnEvent::Cancelled)
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "[ChatHub] Error during chat workflow execution");
                machine.advance(TurnEvent::Failed(e.to_string()));
                return Err(e);
            }
        };

        info!(
            session_id = %session_id,
            state = %state,
            messages = message_ids.len(),
            "[ChatHub] Chat turn finished"
        );

        Ok(TurnOutcome {
            session_id,
            state,
            execution_id,
            message_ids,
            title,
        })
    }

    async fn run_execution(
        &self,
        user: &AuthenticatedUser,
        request: ManualExecutionRequest,
        output: Arc<dyn OutputSink>,
        writer: &MessageWriter,
        execution_id: &mut Option<String>,
        generate_title: bool,
    ) -> Result<RunOutcome> {
        let started = match self.engine.execute_manually(request, user, output).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                return Err(Error::Operational(
                    "There was a problem starting the chat execution.".into(),
                ));
            }
            Err(EngineError::Cancelled) => return Ok(RunOutcome::Cancelled),
            Err(e) => return Err(e.into()),
        };
        writer.execution_started(&started);
        *execution_id = Some(started.clone());

        let result = match self.engine.post_execute(&started).await {
            Ok(Some(result)) => result,
            Ok(None) => {
                return Err(Error::Operational(
                    "There was a problem executing the chat workflow.".into(),
                ));
            }
            Err(EngineError::Cancelled) => return Ok(RunOutcome::Cancelled),
            Err(e) => return Err(e.into()),
        };

        if result.status == ExecutionStatus::Canceled {
            return Ok(RunOutcome::Cancelled);
        }
        if !result.is_success() {
            let message = result
                .error_message()
                .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
            return Err(Error::Operational(message));
        }

        let title = if generate_title {
            result.text_output(TITLE_GENERATOR_AGENT_NODE)
        } else {
            None
        };

        Ok(RunOutcome::Succeeded { title })
    }

    async fn any_cancelled(&self, session_id: Uuid, message_ids: &[Uuid]) -> bool {
        for id in message_ids {
            match self.store.get_message(session_id, *id).await {
                Ok(Some(message)) if message.status == ChatHubMessageStatus::Cancelled => return true,
                Ok(_) => {}
                Err(e) => {
                    warn!(message_id = %id, error = %e, "[ChatHub] Failed to read message status");
                }
            }
        }
        false
    }
}

struct HumanMessage<'a> {
    id: Uuid,
    session_id: Uuid,
    content: &'a str,
    previous_message_id: Option<Uuid>,
    revision_of_message_id: Option<Uuid>,
}

struct ChatExecution {
    session_id: Uuid,
    reply_to: Uuid,
    retry_of_message_id: Option<Uuid>,
    selected: SelectedModel,
    workflow_data: WorkflowData,
    trigger: TriggerToStartFrom,
    generate_title: bool,
}

fn missing_credentials() -> Error {
    Error::validation(
        "credentials",
        "No credentials provided for the selected model provider",
    )
}

async fn load_session_message(
    tx: &mut dyn ChatHubTransaction,
    user: &AuthenticatedUser,
    session_id: Uuid,
    message_id: Uuid,
) -> Result<ChatHubMessage> {
    tx.get_session(session_id, user.id)
        .await?
        .ok_or_else(|| Error::NotFound("Chat session not found".into()))?;

    tx.get_message(session_id, message_id)
        .await?
        .ok_or_else(|| Error::NotFound("Chat message not found".into()))
}
