use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::models::chat_hub::ChatHubMessage;

/// Resolves the conversation branch ending at `end_id`, oldest message first.
///
/// Follows `previous_message_id` pointers backwards. A pointer back to an id
/// already on the path ends the walk. Ids missing from `messages_by_id` are
/// skipped.
pub fn resolve(
    messages_by_id: &HashMap<Uuid, ChatHubMessage>,
    end_id: Option<Uuid>,
) -> Vec<ChatHubMessage> {
    let mut visited = HashSet::new();
    let mut ids = Vec::new();
    let mut current = end_id;

    while let Some(id) = current {
        if !visited.insert(id) {
            break;
        }
        ids.push(id);
        current = messages_by_id
            .get(&id)
            .and_then(|message| message.previous_message_id);
    }

    ids.into_iter()
        .rev()
        .filter_map(|id| messages_by_id.get(&id).cloned())
        .collect()
}

/// Indexes messages by id.
pub fn index_by_id(messages: Vec<ChatHubMessage>) -> HashMap<Uuid, ChatHubMessage> {
    messages.into_iter().map(|m| (m.id, m)).collect()
}
