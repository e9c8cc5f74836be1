use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Error as SqlxError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::models::{ChatId, ChatMessage};

// Global archive instance
static ARCHIVE: OnceCell<Arc<ChatArchive>> = OnceCell::const_new();

/// Initialize the global chat archive
///
/// # Arguments
/// * `database_url` - PostgreSQL connection string
pub async fn init_db(database_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let archive = ChatArchive::new(database_url).await?;
    ARCHIVE.set(Arc::new(archive))
        .map_err(|_| "Chat archive already initialized")?;
    Ok(())
}

/// Get the global chat archive, if one is configured
pub fn get_db() -> Option<Arc<ChatArchive>> {
    ARCHIVE.get().cloned()
}

/// Write-behind copy of chat messages in `class_chat_message`. Nothing reads
/// it back; real-time delivery never waits on it.
pub struct ChatArchive {
    pool: PgPool,
}

impl ChatArchive {
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");
        Ok(Self { pool })
    }

    pub async fn insert_message(&self, msg: &ChatMessage) -> Result<(), SqlxError> {
        let sql = r#"
            INSERT INTO class_chat_message
                (chat_id, class_id, user_id, username, content, reply_to_chat_id, deleted, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (chat_id) DO NOTHING;
        "#;
        sqlx::query(sql)
            .bind(msg.chat_id)
            .bind(msg.class_id)
            .bind(msg.user_id)
            .bind(&msg.username)
            .bind(&msg.content)
            .bind(msg.reply_to_chat_id)
            .bind(msg.deleted)
            .bind(msg.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_deleted(&self, chat_id: ChatId) -> Result<(), SqlxError> {
        sqlx::query("UPDATE class_chat_message SET deleted = TRUE WHERE chat_id = $1;")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Queue a best-effort archive insert. No-op without a database.
pub fn archive_message(msg: &ChatMessage) {
    let Some(archive) = get_db() else { return };
    let msg = msg.clone();
    tokio::spawn(async move {
        match archive.insert_message(&msg).await {
            Ok(()) => debug!("Archived chat message {}", msg.chat_id),
            Err(e) => error!("Failed to archive chat message {}: {}", msg.chat_id, e),
        }
    });
}

/// Queue a best-effort archive tombstone. No-op without a database.
pub fn archive_delete(chat_id: ChatId) {
    let Some(archive) = get_db() else { return };
    tokio::spawn(async move {
        if let Err(e) = archive.mark_deleted(chat_id).await {
            error!("Failed to mark archived chat message {} deleted: {}", chat_id, e);
        }
    });
}
