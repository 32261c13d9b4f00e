//! Node names and wire constants for chat hub workflows

pub const CHAT_TRIGGER_NODE: &str = "When chat message received";
pub const REPLY_AGENT_NODE: &str = "AI Agent";
pub const TITLE_GENERATOR_AGENT_NODE: &str = "Title Generator Agent";
pub const CHAT_MODEL_NODE: &str = "Chat Model";
pub const MEMORY_NODE: &str = "Memory";
pub const RESTORE_CHAT_MEMORY_NODE: &str = "Restore Chat Memory";
pub const CLEAR_CHAT_MEMORY_NODE: &str = "Clear Chat Memory";

/// Messages kept by the buffer memory node
pub const MEMORY_CONTEXT_WINDOW_LENGTH: u32 = 20;

/// Fallback when a failed execution carries no error text
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to generate a response";

pub const CONVERSATION_TITLE_GENERATION_PROMPT: &str = "Generate a concise title for a conversation \
that starts with the user's message below. Respond with the title only: at most six words, \
no quotes, no trailing punctuation, in the same language as the message.";

/// Response headers of a streamed turn
pub const JSONL_STREAM_HEADERS: [(&str, &str); 4] = [
    ("content-type", "application/json-lines; charset=utf-8"),
    ("transfer-encoding", "chunked"),
    ("cache-control", "no-cache"),
    ("connection", "keep-alive"),
];
