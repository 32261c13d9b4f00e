//! Builds the throwaway workflow that answers one chat turn.
//!
//! ```text
//! trigger -> Restore Chat Memory -> AI Agent -> Clear Chat Memory
//!                                \-> Title Generator Agent
//! Chat Model -(ai_languageModel)-> both agents
//! Memory -(ai_memory)-> AI Agent, Restore Chat Memory, Clear Chat Memory
//! ```

use indexmap::IndexMap;
use uuid::Uuid;

use super::constants::{
    CHAT_MODEL_NODE, CHAT_TRIGGER_NODE, CLEAR_CHAT_MEMORY_NODE,
    CONVERSATION_TITLE_GENERATION_PROMPT, MEMORY_CONTEXT_WINDOW_LENGTH, MEMORY_NODE,
    REPLY_AGENT_NODE, RESTORE_CHAT_MEMORY_NODE, TITLE_GENERATOR_AGENT_NODE,
};
use super::providers::{ModelParameters, ProviderTemplates};
use crate::error::Result;
use crate::models::chat_hub::{ChatHubMessage, ChatHubMessageType, LlmProvider, NodeCredentials};
use crate::models::workflow::{
    AGENT_NODE_TYPE, CHAT_TRIGGER_NODE_TYPE, Connection, ConnectionType, Connections,
    MEMORY_BUFFER_WINDOW_NODE_TYPE, MEMORY_MANAGER_NODE_TYPE, NewWorkflow, NodeConnections,
    TriggerToStartFrom, WorkflowNode,
};

/// Everything needed to build a base chat workflow.
#[derive(Debug, Clone)]
pub struct ChatWorkflowInput<'a> {
    pub session_id: Uuid,
    /// Conversation so far, oldest first, excluding the message being answered.
    pub history: &'a [ChatHubMessage],
    pub human_message: &'a str,
    pub credentials: &'a NodeCredentials,
    pub provider: LlmProvider,
    pub model: &'a str,
    pub system_prompt: Option<&'a str>,
    pub generate_title: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EphemeralWorkflow {
    pub nodes: Vec<WorkflowNode>,
    pub connections: Connections,
    pub trigger_to_start_from: TriggerToStartFrom,
}

impl EphemeralWorkflow {
    pub fn into_new_workflow(self, session_id: Uuid) -> (NewWorkflow, TriggerToStartFrom) {
        let workflow = NewWorkflow {
            name: format!("Chat {}", session_id),
            active: false,
            nodes: self.nodes,
            connections: self.connections,
        };
        (workflow, self.trigger_to_start_from)
    }
}

#[derive(Debug, Clone)]
pub struct EphemeralWorkflowBuilder {
    templates: ProviderTemplates,
}

impl EphemeralWorkflowBuilder {
    pub fn new(templates: ProviderTemplates) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &ProviderTemplates {
        &self.templates
    }

    pub fn build(&self, input: &ChatWorkflowInput<'_>) -> Result<EphemeralWorkflow> {
        let nodes = vec![
            chat_trigger_node(),
            reply_agent_node(input.system_prompt),
            self.model_node(input.provider, input.model, input.credentials)?,
            memory_node(),
            restore_memory_node(input.history),
            clear_memory_node(),
            title_generator_node(input.generate_title),
        ];

        Ok(EphemeralWorkflow {
            nodes,
            connections: connections(),
            trigger_to_start_from: TriggerToStartFrom::chat_message(
                CHAT_TRIGGER_NODE,
                input.session_id,
                input.human_message,
            ),
        })
    }

    fn model_node(
        &self,
        provider: LlmProvider,
        model: &str,
        credentials: &NodeCredentials,
    ) -> Result<WorkflowNode> {
        let template = self.templates.get(provider)?;

        Ok(WorkflowNode {
            credentials: Some(credentials.clone()),
            ..node(
                CHAT_MODEL_NODE,
                &template.node_type,
                template.type_version,
                [600, 500],
                ModelParameters::new(provider, model).to_value(),
            )
        })
    }
}

fn node(
    name: &str,
    node_type: &str,
    type_version: f64,
    position: [i32; 2],
    parameters: serde_json::Value,
) -> WorkflowNode {
    WorkflowNode {
        id: Uuid::new_v4(),
        name: name.to_string(),
        node_type: node_type.to_string(),
        type_version,
        position,
        parameters,
        credentials: None,
        disabled: false,
        webhook_id: None,
    }
}

fn chat_input_expression() -> String {
    format!("={{{{ $('{}').item.json.chatInput }}}}", CHAT_TRIGGER_NODE)
}

fn chat_trigger_node() -> WorkflowNode {
    WorkflowNode {
        webhook_id: Some(Uuid::new_v4()),
        ..node(
            CHAT_TRIGGER_NODE,
            CHAT_TRIGGER_NODE_TYPE,
            1.3,
            [0, 0],
            serde_json::json!({
                "public": true,
                "mode": "webhook",
                "options": { "responseMode": "streaming" },
            }),
        )
    }
}

fn reply_agent_node(system_prompt: Option<&str>) -> WorkflowNode {
    let mut options = serde_json::json!({ "enableStreaming": true });
    if let Some(prompt) = system_prompt {
        options["systemMessage"] = serde_json::Value::String(prompt.to_string());
    }

    node(
        REPLY_AGENT_NODE,
        AGENT_NODE_TYPE,
        3.0,
        [600, 0],
        serde_json::json!({
            "promptType": "define",
            "text": chat_input_expression(),
            "options": options,
        }),
    )
}

fn memory_node() -> WorkflowNode {
    node(
        MEMORY_NODE,
        MEMORY_BUFFER_WINDOW_NODE_TYPE,
        1.3,
        [480, 208],
        serde_json::json!({
            "sessionIdType": "customKey",
            "sessionKey": format!("={{{{ $('{}').item.json.sessionId }}}}", CHAT_TRIGGER_NODE),
            "contextWindowLength": MEMORY_CONTEXT_WINDOW_LENGTH,
        }),
    )
}

fn memory_role(message_type: ChatHubMessageType) -> &'static str {
    match message_type {
        ChatHubMessageType::Human => "user",
        ChatHubMessageType::Ai => "ai",
        ChatHubMessageType::System => "system",
    }
}

fn restore_memory_node(history: &[ChatHubMessage]) -> WorkflowNode {
    let message_values: Vec<serde_json::Value> = history
        .iter()
        .map(|message| {
            serde_json::json!({
                "type": memory_role(message.message_type),
                "message": message.content,
                "hideFromUI": false,
            })
        })
        .collect();

    node(
        RESTORE_CHAT_MEMORY_NODE,
        MEMORY_MANAGER_NODE_TYPE,
        1.1,
        [224, 0],
        serde_json::json!({
            "mode": "insert",
            "insertMode": "override",
            "messages": { "messageValues": message_values },
        }),
    )
}

fn clear_memory_node() -> WorkflowNode {
    node(
        CLEAR_CHAT_MEMORY_NODE,
        MEMORY_MANAGER_NODE_TYPE,
        1.1,
        [976, 0],
        serde_json::json!({ "mode": "delete", "deleteMode": "all" }),
    )
}

fn title_generator_node(generate_title: bool) -> WorkflowNode {
    WorkflowNode {
        disabled: !generate_title,
        ..node(
            TITLE_GENERATOR_AGENT_NODE,
            AGENT_NODE_TYPE,
            3.0,
            [224, 360],
            serde_json::json!({
                "promptType": "define",
                "text": chat_input_expression(),
                "options": {
                    "enableStreaming": false,
                    "systemMessage": CONVERSATION_TITLE_GENERATION_PROMPT,
                },
            }),
        )
    }
}

fn edge(target: &str, connection_type: ConnectionType) -> Connection {
    Connection {
        node: target.to_string(),
        connection_type,
        index: 0,
    }
}

fn outputs(connection_type: ConnectionType, targets: &[&str]) -> NodeConnections {
    let mut connections = NodeConnections::new();
    connections.insert(
        connection_type,
        vec![targets.iter().map(|t| edge(t, connection_type)).collect()],
    );
    connections
}

fn connections() -> Connections {
    IndexMap::from([
        (
            CHAT_TRIGGER_NODE.to_string(),
            outputs(ConnectionType::Main, &[RESTORE_CHAT_MEMORY_NODE]),
        ),
        (
            RESTORE_CHAT_MEMORY_NODE.to_string(),
            outputs(
                ConnectionType::Main,
                &[REPLY_AGENT_NODE, TITLE_GENERATOR_AGENT_NODE],
            ),
        ),
        (
            CHAT_MODEL_NODE.to_string(),
            outputs(
                ConnectionType::AiLanguageModel,
                &[REPLY_AGENT_NODE, TITLE_GENERATOR_AGENT_NODE],
            ),
        ),
        (
            MEMORY_NODE.to_string(),
            outputs(
                ConnectionType::AiMemory,
                &[REPLY_AGENT_NODE, RESTORE_CHAT_MEMORY_NODE, CLEAR_CHAT_MEMORY_NODE],
            ),
        ),
        (
            REPLY_AGENT_NODE.to_string(),
            outputs(ConnectionType::Main, &[CLEAR_CHAT_MEMORY_NODE]),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::chat_hub::{ChatHubMessageStatus, NodeCredential};
    use chrono::Utc;
    use std::collections::{BTreeMap, HashSet};

    fn message(message_type: ChatHubMessageType, content: &str) -> ChatHubMessage {
        let now = Utc::now();
        ChatHubMessage {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            message_type,
            name: String::new(),
            content: content.into(),
            status: ChatHubMessageStatus::Success,
            provider: None,
            model: None,
            workflow_id: None,
            agent_id: None,
            execution_id: None,
            previous_message_id: None,
            retry_of_message_id: None,
            revision_of_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn credentials() -> NodeCredentials {
        NodeCredentials::from([(
            "openAiApi".to_string(),
            NodeCredential {
                id: "cred-1".into(),
                name: "OpenAI".into(),
            },
        )])
    }

    fn find<'a>(workflow: &'a EphemeralWorkflow, name: &str) -> &'a WorkflowNode {
        workflow.nodes.iter().find(|n| n.name == name).unwrap()
    }

    #[test]
    fn test_builds_expected_graph() {
        let history = vec![
            message(ChatHubMessageType::Human, "Hi"),
            message(ChatHubMessageType::Ai, "Hello!"),
            message(ChatHubMessageType::System, "Be brief"),
        ];
        let creds = credentials();
        let session_id = Uuid::new_v4();
        let builder = EphemeralWorkflowBuilder::new(ProviderTemplates::default());

        let workflow = builder
            .build(&ChatWorkflowInput {
                session_id,
                history: &history,
                human_message: "What's up?",
                credentials: &creds,
                provider: LlmProvider::Openai,
                model: "gpt-4o",
                system_prompt: Some("You are a pirate"),
                generate_title: false,
            })
            .unwrap();

        assert_eq!(workflow.nodes.len(), 7);

        let restore = find(&workflow, RESTORE_CHAT_MEMORY_NODE);
        let roles: Vec<_> = restore.parameters["messages"]["messageValues"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(roles, vec!["user", "ai", "system"]);

        let model = find(&workflow, CHAT_MODEL_NODE);
        assert_eq!(model.node_type, "@n8n/n8n-nodes-langchain.lmChatOpenAi");
        assert_eq!(model.credentials.as_ref(), Some(&creds));

        let agent = find(&workflow, REPLY_AGENT_NODE);
        assert_eq!(agent.parameters["options"]["systemMessage"], "You are a pirate");
        assert_eq!(agent.parameters["options"]["enableStreaming"], true);

        assert!(find(&workflow, TITLE_GENERATOR_AGENT_NODE).disabled);
        assert!(find(&workflow, CHAT_TRIGGER_NODE).webhook_id.is_some());

        assert_eq!(workflow.trigger_to_start_from.name, CHAT_TRIGGER_NODE);
        assert_eq!(workflow.trigger_to_start_from.chat_input(), Some("What's up?"));
        assert_eq!(workflow.trigger_to_start_from.session_id(), Some(session_id));
    }

    #[test]
    fn test_connections_wire_memory_and_model() {
        let creds = credentials();
        let workflow = EphemeralWorkflowBuilder::new(ProviderTemplates::default())
            .build(&ChatWorkflowInput {
                session_id: Uuid::new_v4(),
                history: &[],
                human_message: "Hi",
                credentials: &creds,
                provider: LlmProvider::Openai,
                model: "gpt-4o",
                system_prompt: None,
                generate_title: true,
            })
            .unwrap();

        let memory_targets: Vec<_> = workflow.connections[MEMORY_NODE][&ConnectionType::AiMemory][0]
            .iter()
            .map(|c| c.node.as_str())
            .collect();
        assert_eq!(
            memory_targets,
            vec![REPLY_AGENT_NODE, RESTORE_CHAT_MEMORY_NODE, CLEAR_CHAT_MEMORY_NODE]
        );

        let model_targets = &workflow.connections[CHAT_MODEL_NODE][&ConnectionType::AiLanguageModel][0];
        assert_eq!(model_targets.len(), 2);
        assert!(!find(&workflow, TITLE_GENERATOR_AGENT_NODE).disabled);
        assert!(
            find(&workflow, REPLY_AGENT_NODE)
                .parameters["options"]
                .get("systemMessage")
                .is_none()
        );
    }

    #[test]
    fn test_ids_are_fresh_per_build() {
        let creds = credentials();
        let builder = EphemeralWorkflowBuilder::new(ProviderTemplates::default());
        let input = ChatWorkflowInput {
            session_id: Uuid::new_v4(),
            history: &[],
            human_message: "Hi",
            credentials: &creds,
            provider: LlmProvider::Openai,
            model: "gpt-4o",
            system_prompt: None,
            generate_title: true,
        };

        let first = builder.build(&input).unwrap();
        let second = builder.build(&input).unwrap();

        let ids: HashSet<Uuid> = first
            .nodes
            .iter()
            .chain(second.nodes.iter())
            .map(|n| n.id)
            .collect();
        assert_eq!(ids.len(), 14);
        assert_ne!(
            find(&first, CHAT_TRIGGER_NODE).webhook_id,
            find(&second, CHAT_TRIGGER_NODE).webhook_id
        );
    }

    #[test]
    fn test_missing_template_is_an_error() {
        let creds = credentials();
        let builder = EphemeralWorkflowBuilder::new(ProviderTemplates::new(BTreeMap::new()));
        let result = builder.build(&ChatWorkflowInput {
            session_id: Uuid::new_v4(),
            history: &[],
            human_message: "Hi",
            credentials: &creds,
            provider: LlmProvider::Google,
            model: "gemini",
            system_prompt: None,
            generate_title: false,
        });
        assert!(matches!(result, Err(Error::Internal(_))));
    }
}
