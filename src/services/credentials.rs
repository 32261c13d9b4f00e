use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A credential a user can read, as reported by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    /// Project that owns the credential; ephemeral workflows are saved there.
    pub project_id: String,
}

#[async_trait]
pub trait CredentialsFinder: Send + Sync {
    async fn find_all_for_user(&self, user_id: Uuid) -> Result<Vec<CredentialSummary>>;
}

/// Returns the credential with `credential_id` if `user_id` can read it.
pub async fn ensure_readable(
    finder: &dyn CredentialsFinder,
    user_id: Uuid,
    credential_id: &str,
) -> Result<CredentialSummary> {
    finder
        .find_all_for_user(user_id)
        .await?
        .into_iter()
        .find(|c| c.id == credential_id)
        .ok_or_else(|| Error::Forbidden("You don't have access to the provided credentials".into()))
}
