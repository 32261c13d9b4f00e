//! In-memory stand-ins for the host application's repositories

use async_trait::async_trait;
use chathub::error::Result;
use chathub::models::workflow::{NewWorkflow, WorkflowData};
use chathub::services::agents::{ChatAgent, ChatAgentRepository};
use chathub::services::credentials::{CredentialSummary, CredentialsFinder};
use chathub::services::workflows::WorkflowRepository;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryWorkflows {
    /// Workflow id -> (owner, workflow). Ephemeral workflows have no owner.
    workflows: Mutex<HashMap<String, (Option<Uuid>, WorkflowData)>>,
    saved: Mutex<Vec<(WorkflowData, String)>>,
    deleted: Mutex<Vec<String>>,
}

impl InMemoryWorkflows {
    pub fn insert_user_workflow(&self, owner: Uuid, workflow: WorkflowData) {
        self.workflows
            .lock()
            .unwrap()
            .insert(workflow.id.clone(), (Some(owner), workflow));
    }

    /// Workflows saved through the repository, with the project they were saved under.
    pub fn saved(&self) -> Vec<(WorkflowData, String)> {
        self.saved.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        self.workflows.lock().unwrap().contains_key(workflow_id)
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflows {
    async fn save(&self, workflow: NewWorkflow, project_id: &str) -> Result<WorkflowData> {
        let data = WorkflowData {
            id: format!("wf-{}", Uuid::new_v4()),
            name: workflow.name,
            active: workflow.active,
            nodes: workflow.nodes,
            connections: workflow.connections,
            version_id: Uuid::new_v4(),
            pin_data: serde_json::Map::new(),
        };
        self.workflows
            .lock()
            .unwrap()
            .insert(data.id.clone(), (None, data.clone()));
        self.saved
            .lock()
            .unwrap()
            .push((data.clone(), project_id.to_string()));
        Ok(data)
    }

    async fn find_for_user(&self, workflow_id: &str, user_id: Uuid) -> Result<Option<WorkflowData>> {
        let workflows = self.workflows.lock().unwrap();
        Ok(workflows
            .get(workflow_id)
            .filter(|(owner, _)| *owner == Some(user_id))
            .map(|(_, workflow)| workflow.clone()))
    }

    async fn delete(&self, workflow_id: &str) -> Result<()> {
        self.workflows.lock().unwrap().remove(workflow_id);
        self.deleted.lock().unwrap().push(workflow_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCredentials {
    by_user: Mutex<HashMap<Uuid, Vec<CredentialSummary>>>,
}

impl InMemoryCredentials {
    pub fn grant(&self, user_id: Uuid, credential: CredentialSummary) {
        self.by_user
            .lock()
            .unwrap()
            .entry(user_id)
            .or_default()
            .push(credential);
    }
}

#[async_trait]
impl CredentialsFinder for InMemoryCredentials {
    async fn find_all_for_user(&self, user_id: Uuid) -> Result<Vec<CredentialSummary>> {
        Ok(self
            .by_user
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryAgents {
    agents: Mutex<HashMap<(Uuid, Uuid), ChatAgent>>,
}

impl InMemoryAgents {
    pub fn add(&self, owner: Uuid, agent: ChatAgent) {
        self.agents.lock().unwrap().insert((agent.id, owner), agent);
    }
}

#[async_trait]
impl ChatAgentRepository for InMemoryAgents {
    async fn find_for_user(&self, agent_id: Uuid, user_id: Uuid) -> Result<Option<ChatAgent>> {
        Ok(self.agents.lock().unwrap().get(&(agent_id, user_id)).cloned())
    }
}
