use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a session's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<i64>,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: String, role: String, content: String) -> Self {
        Self {
            id: None,
            session_id,
            role,
            content,
            created_at: Utc::now(),
        }
    }

    pub fn user(session_id: String, content: String) -> Self {
        Self::new(session_id, "user".to_string(), content)
    }

    pub fn assistant(session_id: String, content: String) -> Self {
        Self::new(session_id, "assistant".to_string(), content)
    }
}
