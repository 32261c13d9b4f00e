use chathub::database;
use chathub::load_config;
use chathub::models::chat_hub::{
    ChatHubMessage, ChatHubMessageStatus, ChatHubMessageType, ChatHubSession, ModelColumns,
    NewChatHubMessage, NewChatHubSession,
};
use chathub::queries::{chat_messages, chat_sessions};
use sqlx::PgPool;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Connects to the test database and applies migrations.
pub async fn init_test_db() -> PgPool {
    INIT.call_once(|| {
        dotenvy::dotenv().ok();
    });

    let config = load_config().expect("Failed to load config");
    database::connect(&config.database)
        .await
        .expect("Failed to connect to database")
}

/// Database handle scoped to one owner id.
///
/// Every session a test creates belongs to `owner_id`, so parallel tests never
/// see each other's rows. Sessions (and their messages, by cascade) are
/// removed again on drop.
pub struct TestDb {
    pub pool: PgPool,
    pub owner_id: Uuid,
}

impl TestDb {
    pub async fn new() -> Self {
        let pool = init_test_db().await;
        Self {
            pool,
            owner_id: Uuid::now_v7(),
        }
    }

    pub async fn get_connection(&self) -> sqlx::pool::PoolConnection<sqlx::Postgres> {
        self.pool
            .acquire()
            .await
            .expect("Failed to get database connection")
    }

    pub async fn create_session(&self) -> ChatHubSession {
        let mut conn = self.get_connection().await;
        chat_sessions::create_session(
            &mut conn,
            NewChatHubSession {
                id: Uuid::now_v7(),
                owner_id: self.owner_id,
                title: "New Chat".to_string(),
                model: ModelColumns::default(),
            },
        )
        .await
        .expect("Failed to create session")
    }

    pub async fn insert_message(
        &self,
        session_id: Uuid,
        message_type: ChatHubMessageType,
        status: ChatHubMessageStatus,
        previous_message_id: Option<Uuid>,
    ) -> ChatHubMessage {
        let mut conn = self.get_connection().await;
        let new_msg = new_message(session_id, message_type, status, previous_message_id);
        chat_messages::insert_message(&mut conn, new_msg)
            .await
            .expect("Failed to insert message")
    }

    pub async fn count_messages(&self, session_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM chat_hub_messages WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count messages")
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let owner_id = self.owner_id;
        tokio::spawn(async move {
            let _ = sqlx::query("DELETE FROM chat_hub_sessions WHERE owner_id = $1")
                .bind(owner_id)
                .execute(&pool)
                .await;
        });
    }
}

pub fn new_message(
    session_id: Uuid,
    message_type: ChatHubMessageType,
    status: ChatHubMessageStatus,
    previous_message_id: Option<Uuid>,
) -> NewChatHubMessage {
    NewChatHubMessage {
        id: Uuid::now_v7(),
        session_id,
        message_type,
        name: "Test".to_string(),
        content: String::new(),
        status,
        model: ModelColumns::default(),
        execution_id: None,
        previous_message_id,
        retry_of_message_id: None,
        revision_of_message_id: None,
    }
}
