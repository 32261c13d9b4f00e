use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::models::chat_hub::{LlmProvider, NodeCredentials};

/// Node type, version and credential type used for one provider's model node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub node_type: String,
    pub type_version: f64,
    pub credential_type: String,
}

/// Provider lookup table for model nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderTemplates(BTreeMap<LlmProvider, NodeTemplate>);

impl ProviderTemplates {
    pub fn new(templates: BTreeMap<LlmProvider, NodeTemplate>) -> Self {
        Self(templates)
    }

    pub fn get(&self, provider: LlmProvider) -> Result<&NodeTemplate> {
        self.0.get(&provider).ok_or_else(|| {
            Error::Internal(format!("No model node template configured for provider '{}'", provider))
        })
    }

    /// Id of the credential picked for `provider`, looked up by its credential type.
    pub fn pick_credential_id(&self, provider: LlmProvider, credentials: &NodeCredentials) -> Option<String> {
        let template = self.0.get(&provider)?;
        credentials
            .get(&template.credential_type)
            .map(|credential| credential.id.clone())
    }
}

impl Default for ProviderTemplates {
    fn default() -> Self {
        let template = |node_type: &str, type_version: f64, credential_type: &str| NodeTemplate {
            node_type: node_type.to_string(),
            type_version,
            credential_type: credential_type.to_string(),
        };

        Self(BTreeMap::from([
            (
                LlmProvider::Openai,
                template("@n8n/n8n-nodes-langchain.lmChatOpenAi", 1.2, "openAiApi"),
            ),
            (
                LlmProvider::Anthropic,
                template("@n8n/n8n-nodes-langchain.lmChatAnthropic", 1.3, "anthropicApi"),
            ),
            (
                LlmProvider::Google,
                template("@n8n/n8n-nodes-langchain.lmChatGoogleGemini", 1.2, "googlePalmApi"),
            ),
        ]))
    }
}

/// Parameters of a model node, one shape per provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelParameters {
    OpenAi { model: String },
    Anthropic { model: String },
    Google { model: String },
}

impl ModelParameters {
    pub fn new(provider: LlmProvider, model: &str) -> Self {
        let model = model.to_string();
        match provider {
            LlmProvider::Openai => Self::OpenAi { model },
            LlmProvider::Anthropic => Self::Anthropic { model },
            LlmProvider::Google => Self::Google { model },
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::OpenAi { model } | Self::Google { model } => serde_json::json!({
                "model": { "__rl": true, "mode": "list", "value": model },
                "options": {},
            }),
            Self::Anthropic { model } => serde_json::json!({
                "model": {
                    "__rl": true,
                    "mode": "list",
                    "value": model,
                    "cachedResultName": model,
                },
                "options": {},
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat_hub::NodeCredential;

    #[test]
    fn test_missing_provider_fails_closed() {
        let templates = ProviderTemplates::new(BTreeMap::new());
        assert!(matches!(
            templates.get(LlmProvider::Anthropic),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_pick_credential_id_by_type() {
        let templates = ProviderTemplates::default();
        let mut credentials = NodeCredentials::new();
        credentials.insert(
            "anthropicApi".into(),
            NodeCredential {
                id: "cred-a".into(),
                name: "Anthropic".into(),
            },
        );

        assert_eq!(
            templates.pick_credential_id(LlmProvider::Anthropic, &credentials),
            Some("cred-a".into())
        );
        assert_eq!(templates.pick_credential_id(LlmProvider::Openai, &credentials), None);
    }

    #[test]
    fn test_anthropic_parameters_cache_model_name() {
        let params = ModelParameters::new(LlmProvider::Anthropic, "claude").to_value();
        assert_eq!(params["model"]["cachedResultName"], "claude");

        let params = ModelParameters::new(LlmProvider::Openai, "gpt-4o").to_value();
        assert_eq!(params["model"]["value"], "gpt-4o");
        assert!(params["model"].get("cachedResultName").is_none());
    }

    #[test]
    fn test_templates_deserialize_from_lowercase_keys() {
        let templates: ProviderTemplates = serde_json::from_value(serde_json::json!({
            "openai": {"node_type": "x.lmChatOpenAi", "type_version": 1.0, "credential_type": "openAiApi"}
        }))
        .unwrap();
        assert_eq!(templates.get(LlmProvider::Openai).unwrap().node_type, "x.lmChatOpenAi");
        assert!(templates.get(LlmProvider::Google).is_err());
    }
}
