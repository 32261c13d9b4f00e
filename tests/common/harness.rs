use chathub::config::ChatHubConfig;
use chathub::error::Result;
use chathub::models::chat_hub::{
    ChatHubMessage, ConversationModel, NodeCredential, NodeCredentials,
};
use chathub::models::requests::HumanMessagePayload;
use chathub::models::users::AuthenticatedUser;
use chathub::services::chat_hub::interceptor::{ResponseReceiver, response_channel};
use chathub::services::chat_hub::{ChatHubService, ChatHubServiceArgs, TurnOutcome};
use chathub::services::credentials::CredentialSummary;
use chathub::store::{ChatHubStore, MemoryChatHubStore};
use chathub::workers::{WorkflowCleanupQueue, workflow_cleanup_worker};
use chathub::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::collaborators::{InMemoryAgents, InMemoryCredentials, InMemoryWorkflows};
use super::engine::ScriptedEngine;

pub const OPENAI_CREDENTIAL_ID: &str = "cred-openai";
pub const PROJECT_ID: &str = "project-1";

/// Chat hub service wired to in-memory collaborators and a scripted engine.
pub struct TestHarness {
    pub store: Arc<MemoryChatHubStore>,
    pub engine: Arc<ScriptedEngine>,
    pub workflows: Arc<InMemoryWorkflows>,
    pub credentials: Arc<InMemoryCredentials>,
    pub agents: Arc<InMemoryAgents>,
    pub cleanup: WorkflowCleanupQueue,
    pub service: Arc<ChatHubService>,
    pub user: AuthenticatedUser,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl TestHarness {
    pub async fn new() -> Self {
        chathub::logging::init_tracing();

        let store = Arc::new(MemoryChatHubStore::new());
        let engine = Arc::new(ScriptedEngine::default());
        let workflows = Arc::new(InMemoryWorkflows::default());
        let credentials = Arc::new(InMemoryCredentials::default());
        let agents = Arc::new(InMemoryAgents::default());

        let config = ChatHubConfig {
            workflow_cleanup_grace_ms: 0,
            ..ChatHubConfig::default()
        };
        let (cleanup, receiver) = WorkflowCleanupQueue::new(config.workflow_cleanup_grace());
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(workflow_cleanup_worker(
            workflows.clone(),
            receiver,
            shutdown.clone(),
        ));

        let service = Arc::new(ChatHubService::new(ChatHubServiceArgs {
            store: store.clone(),
            engine: engine.clone(),
            workflows: workflows.clone(),
            credentials: credentials.clone(),
            agents: agents.clone(),
            cleanup: cleanup.clone(),
            config,
        }));

        let user = AuthenticatedUser {
            id: Uuid::now_v7(),
            email: "ada@example.com".to_string(),
            first_name: Some("Ada".to_string()),
        };
        credentials.grant(
            user.id,
            CredentialSummary {
                id: OPENAI_CREDENTIAL_ID.to_string(),
                name: "OpenAI account".to_string(),
                credential_type: "openAiApi".to_string(),
                project_id: PROJECT_ID.to_string(),
            },
        );

        Self {
            store,
            engine,
            workflows,
            credentials,
            agents,
            cleanup,
            service,
            user,
            shutdown,
            worker: Some(worker),
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.service.clone())
    }

    pub fn openai_credentials() -> NodeCredentials {
        NodeCredentials::from([(
            "openAiApi".to_string(),
            NodeCredential {
                id: OPENAI_CREDENTIAL_ID.to_string(),
                name: "OpenAI account".to_string(),
            },
        )])
    }

    pub fn openai_model() -> ConversationModel {
        ConversationModel::Openai {
            model: "gpt-4o".to_string(),
        }
    }

    pub fn message_payload(
        session_id: Uuid,
        message: &str,
        previous_message_id: Option<Uuid>,
    ) -> HumanMessagePayload {
        HumanMessagePayload {
            session_id,
            message_id: Uuid::now_v7(),
            message: message.to_string(),
            model: Self::openai_model(),
            credentials: Self::openai_credentials(),
            previous_message_id,
        }
    }

    /// Runs a send turn to completion and returns its outcome and streamed body.
    pub async fn send(&self, payload: HumanMessagePayload) -> (Result<TurnOutcome>, String) {
        let (channel, receiver) = response_channel();
        let outcome = self
            .service
            .send_human_message(&self.user, payload, channel)
            .await;
        (outcome, receiver.read_body().await)
    }

    /// Starts a send turn in the background.
    pub fn spawn_send(
        &self,
        payload: HumanMessagePayload,
    ) -> (JoinHandle<Result<TurnOutcome>>, ResponseReceiver) {
        let (channel, receiver) = response_channel();
        let service = self.service.clone();
        let user = self.user.clone();
        let handle =
            tokio::spawn(async move { service.send_human_message(&user, payload, channel).await });
        (handle, receiver)
    }

    pub async fn message(&self, session_id: Uuid, message_id: Uuid) -> ChatHubMessage {
        self.store
            .get_message(session_id, message_id)
            .await
            .unwrap()
            .expect("message should exist")
    }

    pub async fn messages(&self, session_id: Uuid) -> Vec<ChatHubMessage> {
        self.store.list_messages(session_id).await.unwrap()
    }

    /// Polls the session until a message matches.
    pub async fn wait_for_message<F>(&self, session_id: Uuid, predicate: F) -> ChatHubMessage
    where
        F: Fn(&ChatHubMessage) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(message) = self.messages(session_id).await.into_iter().find(&predicate) {
                    return message;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for message")
    }

    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(worker) = self.worker.take() {
            worker.await.unwrap();
        }
    }
}
