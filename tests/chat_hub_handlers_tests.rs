mod common;

use axum::Extension;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chathub::handlers::router;
use common::{Script, TestHarness};
use tower::ServiceExt;
use uuid::Uuid;

fn app(harness: &TestHarness) -> axum::Router {
    router(harness.app_state()).layer(Extension(harness.user.clone()))
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn send_body(session_id: Uuid, message: &str) -> serde_json::Value {
    serde_json::json!({
        "sessionId": session_id,
        "messageId": Uuid::now_v7(),
        "message": message,
        "model": { "provider": "openai", "model": "gpt-4o" },
        "credentials": { "openAiApi": { "id": common::OPENAI_CREDENTIAL_ID, "name": "OpenAI account" } },
    })
}

#[tokio::test]
async fn test_send_streams_json_lines() {
    let harness = TestHarness::new().await;
    let session_id = Uuid::now_v7();
    harness.engine.push(Script::reply("Hi there"));

    let response = app(&harness)
        .oneshot(json_request(
            "POST",
            "/chat/conversations/send",
            send_body(session_id, "Hello"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json-lines; charset=utf-8"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    let lines: Vec<serde_json::Value> = body
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0]["metadata"]["messageId"].is_string());

    harness
        .wait_for_message(session_id, |m| {
            m.status == chathub::models::chat_hub::ChatHubMessageStatus::Success
                && m.message_type == chathub::models::chat_hub::ChatHubMessageType::Ai
        })
        .await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_send_error_before_streaming_returns_json() {
    let harness = TestHarness::new().await;
    let mut body = send_body(Uuid::now_v7(), "Hello");
    body["previousMessageId"] = serde_json::json!(Uuid::now_v7());

    let response = app(&harness)
        .oneshot(json_request("POST", "/chat/conversations/send", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_empty_message_is_bad_request() {
    let harness = TestHarness::new().await;

    let response = app(&harness)
        .oneshot(json_request(
            "POST",
            "/chat/conversations/send",
            send_body(Uuid::now_v7(), "   "),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(json["fields"]["message"].is_string());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_list_get_rename_delete_conversation() {
    let harness = TestHarness::new().await;
    let session_id = Uuid::now_v7();
    harness.engine.push(Script::reply("Hi"));
    let (outcome, _) = harness
        .send(TestHarness::message_payload(session_id, "Hello", None))
        .await;
    outcome.unwrap();

    let response = app(&harness)
        .oneshot(empty_request("GET", "/chat/conversations"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let sessions = body_json(response).await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["title"], "New Chat");

    let uri = format!("/chat/conversations/{}", session_id);
    let response = app(&harness)
        .oneshot(empty_request("GET", &uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let conversation = body_json(response).await;
    assert_eq!(conversation["session"]["id"], serde_json::json!(session_id));
    assert_eq!(
        conversation["conversation"]["messages"].as_object().unwrap().len(),
        2
    );

    let response = app(&harness)
        .oneshot(json_request("PATCH", &uri, serde_json::json!({ "title": "Greetings" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["title"], "Greetings");

    let response = app(&harness)
        .oneshot(empty_request("DELETE", &uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app(&harness)
        .oneshot(empty_request("GET", &uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_stop_finished_message_is_bad_request() {
    let harness = TestHarness::new().await;
    let session_id = Uuid::now_v7();
    harness.engine.push(Script::reply("Hi"));
    let (outcome, _) = harness
        .send(TestHarness::message_payload(session_id, "Hello", None))
        .await;
    let ai_id = outcome.unwrap().message_ids[0];

    let response = app(&harness)
        .oneshot(empty_request(
            "POST",
            &format!("/chat/conversations/{}/messages/{}/stop", session_id, ai_id),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_edit_ai_message_returns_no_content() {
    let harness = TestHarness::new().await;
    let session_id = Uuid::now_v7();
    harness.engine.push(Script::reply("X"));
    let (outcome, _) = harness
        .send(TestHarness::message_payload(session_id, "Hello", None))
        .await;
    let ai_id = outcome.unwrap().message_ids[0];

    let response = app(&harness)
        .oneshot(json_request(
            "POST",
            &format!("/chat/conversations/{}/messages/{}/edit", session_id, ai_id),
            serde_json::json!({
                "messageId": Uuid::now_v7(),
                "message": "X-edited",
                "model": { "provider": "openai", "model": "gpt-4o" },
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(harness.message(session_id, ai_id).await.content, "X-edited");

    harness.shutdown().await;
}
