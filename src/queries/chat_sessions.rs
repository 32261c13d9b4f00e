use crate::{
    error::{Error, Result},
    models::chat_hub::{ChatHubSession, NewChatHubSession},
    DbConn,
};
use uuid::Uuid;

const SESSION_COLUMNS: &str = r#"
    id, owner_id, title, last_message_at, credential_id, provider, model,
    workflow_id, agent_id, created_at, updated_at
"#;

/// Inserts a new chat session.
pub async fn create_session(conn: &mut DbConn, new_session: NewChatHubSession) -> Result<ChatHubSession> {
    let sql = format!(
        r#"
        INSERT INTO chat_hub_sessions
            (id, owner_id, title, last_message_at, credential_id, provider, model, workflow_id, agent_id)
        VALUES ($1, $2, $3, NOW(), $4, $5, $6, $7, $8)
        RETURNING {SESSION_COLUMNS}
        "#
    );

    let session = sqlx::query_as::<_, ChatHubSession>(&sql)
        .bind(new_session.id)
        .bind(new_session.owner_id)
        .bind(new_session.title)
        .bind(new_session.model.credential_id)
        .bind(new_session.model.provider)
        .bind(new_session.model.model)
        .bind(new_session.model.workflow_id)
        .bind(new_session.model.agent_id)
        .fetch_one(conn)
        .await
        .map_err(Error::Sqlx)?;

    Ok(session)
}

/// Gets a session by id, scoped to its owner.
pub async fn get_session(
    conn: &mut DbConn,
    session_id: Uuid,
    owner_id: Uuid,
) -> Result<Option<ChatHubSession>> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM chat_hub_sessions WHERE id = $1 AND owner_id = $2"
    );

    let session = sqlx::query_as::<_, ChatHubSession>(&sql)
        .bind(session_id)
        .bind(owner_id)
        .fetch_optional(conn)
        .await
        .map_err(Error::Sqlx)?;

    Ok(session)
}

/// Lists a user's sessions, most recently active first.
pub async fn list_sessions(conn: &mut DbConn, owner_id: Uuid) -> Result<Vec<ChatHubSession>> {
    let sql = format!(
        r#"
        SELECT {SESSION_COLUMNS}
        FROM chat_hub_sessions
        WHERE owner_id = $1
        ORDER BY last_message_at DESC NULLS LAST, created_at DESC
        "#
    );

    let sessions = sqlx::query_as::<_, ChatHubSession>(&sql)
        .bind(owner_id)
        .fetch_all(conn)
        .await
        .map_err(Error::Sqlx)?;

    Ok(sessions)
}

/// Updates a session's title. Returns the number of rows affected.
pub async fn update_session_title(
    conn: &mut DbConn,
    session_id: Uuid,
    owner_id: Uuid,
    title: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE chat_hub_sessions
        SET title = $3, updated_at = NOW()
        WHERE id = $1 AND owner_id = $2
        "#,
    )
    .bind(session_id)
    .bind(owner_id)
    .bind(title)
    .execute(conn)
    .await
    .map_err(Error::Sqlx)?;

    Ok(result.rows_affected())
}

/// Bumps `last_message_at` on a session.
pub async fn touch_session(conn: &mut DbConn, session_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE chat_hub_sessions
        SET last_message_at = NOW(), updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(session_id)
    .execute(conn)
    .await
    .map_err(Error::Sqlx)?;

    Ok(())
}

/// Deletes a session and, by cascade, its messages. Returns the number of rows affected.
pub async fn delete_session(conn: &mut DbConn, session_id: Uuid, owner_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM chat_hub_sessions WHERE id = $1 AND owner_id = $2")
        .bind(session_id)
        .bind(owner_id)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;

    Ok(result.rows_affected())
}
