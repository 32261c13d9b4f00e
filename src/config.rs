use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::time::Duration;

use crate::services::chat_hub::providers::ProviderTemplates;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chat_hub: ChatHubConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub user: String,
    #[serde(skip_serializing, default = "default_password")]
    pub password: SecretString,
    pub host: String,
    pub port: u16,
    pub database: String,
}

/// Settings for chat turn execution.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatHubConfig {
    /// Title given to a session when it is created by its first message.
    pub default_session_title: String,
    /// How long an ephemeral workflow is kept after its turn ends before deletion.
    pub workflow_cleanup_grace_ms: u64,
    /// Model node template per LLM provider.
    pub providers: ProviderTemplates,
}

impl Config {
    /// Load configuration from environment variables, with defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            // Override with environment variables using `CHATHUB__` prefix and `__` separator
            // e.g., CHATHUB__DATABASE__USER="my_user"
            .add_source(
                config::Environment::with_prefix("CHATHUB")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl DatabaseConfig {
    /// Constructs the database connection string.
    pub fn connection_string(&self) -> SecretString {
        SecretString::from(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user,
            self.password.expose_secret(),
            self.host,
            self.port,
            self.database
        ))
    }
}

impl ChatHubConfig {
    pub fn workflow_cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.workflow_cleanup_grace_ms)
    }
}

fn default_password() -> SecretString {
    "password".to_string().into()
}

// Default values for the database configuration
impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: default_password(),
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
        }
    }
}

impl Default for ChatHubConfig {
    fn default() -> Self {
        Self {
            default_session_title: "New Chat".to_string(),
            workflow_cleanup_grace_ms: 3000,
            providers: ProviderTemplates::default(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Use serde to serialize to pretty JSON
        // Password is automatically skipped due to #[serde(skip_serializing)]
        match serde_json::to_string_pretty(&self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "Error serializing config"),
        }
    }
}
