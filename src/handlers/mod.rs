pub mod chat_hub;

pub use chat_hub::*;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Chat hub routes.
///
/// Handlers read the caller from an `AuthenticatedUser` request extension,
/// which the embedding application's auth layer is expected to provide.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat/conversations", get(list_conversations))
        .route("/chat/conversations/send", post(send_message))
        .route(
            "/chat/conversations/{session_id}",
            get(get_conversation)
                .patch(update_conversation)
                .delete(delete_conversation),
        )
        .route(
            "/chat/conversations/{session_id}/messages/{message_id}/edit",
            post(edit_message),
        )
        .route(
            "/chat/conversations/{session_id}/messages/{message_id}/regenerate",
            post(regenerate_message),
        )
        .route(
            "/chat/conversations/{session_id}/messages/{message_id}/stop",
            post(stop_message),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
