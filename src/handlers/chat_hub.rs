use crate::error::{Error, Result};
use crate::models::chat_hub::{ChatHubConversationResponse, ChatHubSessionDto};
use crate::models::requests::{
    EditMessagePayload, EditMessageRequest, HumanMessagePayload, RegenerateMessagePayload,
    RegenerateMessageRequest, UpdateSessionTitleRequest,
};
use crate::models::users::AuthenticatedUser;
use crate::services::chat_hub::interceptor::{ResponseChannel, response_channel};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::future::Future;
use uuid::Uuid;

/// Runs a turn and serves its output.
///
/// Once the turn writes response headers, the rest of its output is streamed
/// as the body and the turn finishes in the background. A turn that ends
/// before writing headers answers with its own result, or its error.
async fn serve_turn<F, Fut, T>(start: F) -> Result<Response>
where
    F: FnOnce(ResponseChannel) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: IntoResponse + Send + 'static,
{
    let (channel, mut receiver) = response_channel();
    let task = tokio::spawn(start(channel));

    if let Some((status, headers)) = receiver.recv_head().await {
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "[ChatHubHandler] Streamed turn ended with an error"),
                Err(e) => tracing::error!(error = %e, "[ChatHubHandler] Streamed turn panicked"),
            }
        });

        let mut response = Response::new(Body::from_stream(receiver.into_body_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        return Ok(response);
    }

    let result = task
        .await
        .map_err(|e| Error::Internal(format!("Chat turn task failed: {}", e)))?;
    Ok(result?.into_response())
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<HumanMessagePayload>,
) -> Result<Response> {
    tracing::info!(
        session_id = %payload.session_id,
        user_id = %user.id,
        "[ChatHubHandler] Sending message"
    );
    let service = state.chat_hub.clone();

    serve_turn(move |channel| async move {
        service
            .send_human_message(&user, payload, channel)
            .await
            .map(Json)
    })
    .await
}

pub async fn edit_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((session_id, edit_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Response> {
    tracing::info!(
        session_id = %session_id,
        message_id = %edit_id,
        "[ChatHubHandler] Editing message"
    );
    let service = state.chat_hub.clone();
    let payload = EditMessagePayload {
        session_id,
        edit_id,
        message_id: req.message_id,
        message: req.message,
        model: req.model,
        credentials: req.credentials,
    };

    serve_turn(move |channel| async move {
        let outcome = service.edit_message(&user, payload, channel).await?;
        Ok::<_, Error>(match outcome {
            Some(outcome) => Json(outcome).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        })
    })
    .await
}

pub async fn regenerate_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((session_id, retry_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<RegenerateMessageRequest>,
) -> Result<Response> {
    tracing::info!(
        session_id = %session_id,
        message_id = %retry_id,
        "[ChatHubHandler] Regenerating message"
    );
    let service = state.chat_hub.clone();
    let payload = RegenerateMessagePayload {
        session_id,
        retry_id,
        model: req.model,
        credentials: req.credentials,
    };

    serve_turn(move |channel| async move {
        service
            .regenerate_message(&user, payload, channel)
            .await
            .map(Json)
    })
    .await
}

pub async fn stop_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((session_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    state
        .chat_hub
        .stop_generation(&user, session_id, message_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<ChatHubSessionDto>>> {
    let sessions = state.chat_hub.get_conversations(&user).await?;
    Ok(Json(sessions))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ChatHubConversationResponse>> {
    let conversation = state.chat_hub.get_conversation(&user, session_id).await?;
    Ok(Json(conversation))
}

pub async fn update_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<UpdateSessionTitleRequest>,
) -> Result<Json<ChatHubSessionDto>> {
    let session = state
        .chat_hub
        .update_session_title(&user, session_id, &req.title)
        .await?;
    Ok(Json(session))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.chat_hub.delete_session(&user, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
