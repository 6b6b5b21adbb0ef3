use super::Message;
use crate::{Error, Result};
use libsql::{Builder, Connection};
use std::path::Path;
use tracing::{debug, info};

/// Append-only log of conversation turns, one libSQL database per
/// session. Only the agent runtime reads or writes it.
pub struct ConversationLog {
    conn: Connection,
}

impl ConversationLog {
    /// Opens (creating if needed) the log at `path`. `":memory:"` gives a
    /// throwaway in-memory log.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let db = if path == Path::new(":memory:") {
            Builder::new_local(":memory:").build().await?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            Builder::new_local(path).build().await?
        };

        // One connection for the log's lifetime; in-memory databases
        // are per connection.
        let conn = db.connect()?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
            (),
        )
        .await?;

        info!("Conversation log opened: {}", path.display());
        Ok(Self { conn })
    }

    pub async fn append(&self, message: &Message) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
                (
                    message.session_id.as_str(),
                    message.role.as_str(),
                    message.content.as_str(),
                    message.created_at.to_rfc3339(),
                ),
            )
            .await?;
        debug!(
            "Appended {} message to conversation log: {}",
            message.role, message.session_id
        );
        Ok(())
    }

    pub async fn list(&self, session_id: &str) -> Result<Vec<Message>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, session_id, role, content, created_at FROM messages WHERE session_id = ? ORDER BY id ASC",
                [session_id],
            )
            .await?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            let created_at_str: String = row.get(4)?;
            let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
                .map_err(|e| Error::internal(format!("Failed to parse timestamp: {e}")))?
                .with_timezone(&chrono::Utc);

            messages.push(Message {
                id: Some(row.get(0)?),
                session_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                created_at,
            });
        }

        debug!(
            "Retrieved {} messages from conversation log for session: {}",
            messages.len(),
            session_id
        );
        Ok(messages)
    }
}
