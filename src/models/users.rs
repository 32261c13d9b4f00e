use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated user placed in request extensions by the auth layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// User's unique identifier
    pub id: Uuid,
    /// User's email address
    pub email: String,
    /// User's first name (optional)
    pub first_name: Option<String>,
}

impl AuthenticatedUser {
    /// Name stored on the human messages this user sends.
    pub fn display_name(&self) -> String {
        match self.first_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => crate::models::chat_hub::DEFAULT_HUMAN_NAME.to_string(),
        }
    }
}
