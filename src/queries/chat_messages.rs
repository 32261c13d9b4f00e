use crate::{
    error::{Error, Result},
    models::chat_hub::{ChatHubMessage, ChatHubMessageStatus, NewChatHubMessage},
    DbConn,
};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = r#"
    id, session_id, type, name, content, status, provider, model, workflow_id,
    agent_id, execution_id, previous_message_id, retry_of_message_id,
    revision_of_message_id, created_at, updated_at
"#;

/// Inserts a new message.
pub async fn insert_message(conn: &mut DbConn, new_msg: NewChatHubMessage) -> Result<ChatHubMessage> {
    let sql = format!(
        r#"
        INSERT INTO chat_hub_messages
            (id, session_id, type, name, content, status, provider, model, workflow_id,
             agent_id, execution_id, previous_message_id, retry_of_message_id, revision_of_message_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING {MESSAGE_COLUMNS}
        "#
    );

    let message = sqlx::query_as::<_, ChatHubMessage>(&sql)
        .bind(new_msg.id)
        .bind(new_msg.session_id)
        .bind(new_msg.message_type)
        .bind(new_msg.name)
        .bind(new_msg.content)
        .bind(new_msg.status)
        .bind(new_msg.model.provider)
        .bind(new_msg.model.model)
        .bind(new_msg.model.workflow_id)
        .bind(new_msg.model.agent_id)
        .bind(new_msg.execution_id)
        .bind(new_msg.previous_message_id)
        .bind(new_msg.retry_of_message_id)
        .bind(new_msg.revision_of_message_id)
        .fetch_one(conn)
        .await
        .map_err(Error::Sqlx)?;

    Ok(message)
}

/// Gets a message by id within a session.
pub async fn get_message(
    conn: &mut DbConn,
    session_id: Uuid,
    message_id: Uuid,
) -> Result<Option<ChatHubMessage>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_hub_messages WHERE session_id = $1 AND id = $2"
    );

    let message = sqlx::query_as::<_, ChatHubMessage>(&sql)
        .bind(session_id)
        .bind(message_id)
        .fetch_optional(conn)
        .await
        .map_err(Error::Sqlx)?;

    Ok(message)
}

/// Lists all messages of a session, oldest first.
pub async fn list_messages(conn: &mut DbConn, session_id: Uuid) -> Result<Vec<ChatHubMessage>> {
    let sql = format!(
        r#"
        SELECT {MESSAGE_COLUMNS}
        FROM chat_hub_messages
        WHERE session_id = $1
        ORDER BY created_at ASC, id ASC
        "#
    );

    let messages = sqlx::query_as::<_, ChatHubMessage>(&sql)
        .bind(session_id)
        .fetch_all(conn)
        .await
        .map_err(Error::Sqlx)?;

    Ok(messages)
}

/// Overwrites a message's content. Returns the number of rows affected.
pub async fn update_message_content(
    conn: &mut DbConn,
    session_id: Uuid,
    message_id: Uuid,
    content: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE chat_hub_messages
        SET content = $3, updated_at = NOW()
        WHERE session_id = $1 AND id = $2
        "#,
    )
    .bind(session_id)
    .bind(message_id)
    .bind(content)
    .execute(conn)
    .await
    .map_err(Error::Sqlx)?;

    Ok(result.rows_affected())
}

/// Sets the execution id on the given messages that do not have one yet.
pub async fn set_execution_id(
    conn: &mut DbConn,
    session_id: Uuid,
    message_ids: &[Uuid],
    execution_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE chat_hub_messages
        SET execution_id = $3, updated_at = NOW()
        WHERE session_id = $1 AND id = ANY($2) AND execution_id IS NULL
        "#,
    )
    .bind(session_id)
    .bind(message_ids)
    .bind(execution_id)
    .execute(conn)
    .await
    .map_err(Error::Sqlx)?;

    Ok(result.rows_affected())
}

/// Moves a running message to a terminal status, optionally replacing its content.
///
/// Only applies while the message is still `running`. Returns the updated row, or
/// `None` when the message had already been finalized.
pub async fn finalize_running_message(
    conn: &mut DbConn,
    session_id: Uuid,
    message_id: Uuid,
    status: ChatHubMessageStatus,
    content: Option<&str>,
) -> Result<Option<ChatHubMessage>> {
    let sql = format!(
        r#"
        UPDATE chat_hub_messages
        SET status = $3, content = COALESCE($4, content), updated_at = NOW()
        WHERE session_id = $1 AND id = $2 AND status = 'running'
        RETURNING {MESSAGE_COLUMNS}
        "#
    );

    let message = sqlx::query_as::<_, ChatHubMessage>(&sql)
        .bind(session_id)
        .bind(message_id)
        .bind(status)
        .bind(content)
        .fetch_optional(conn)
        .await
        .map_err(Error::Sqlx)?;

    Ok(message)
}
