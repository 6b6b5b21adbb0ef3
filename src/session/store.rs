use super::{SessionContext, is_valid_session_id};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONTEXT_FILE: &str = "context.json";
const CONVERSATION_LOG_FILE: &str = "chat.db";

/// File-backed store: `<root>/<session_id>/context.json` holds the
/// context document, `<root>/<session_id>/chat.db` is left to the agent
/// runtime's conversation log.
///
/// There is no locking; callers keep at most one run per session in
/// flight, and the last `save` wins.
#[derive(Debug, Clone)]
pub struct ContextStore {
    root: PathBuf,
}

impl ContextStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        validate(session_id)?;
        Ok(self.root.join(session_id))
    }

    pub fn context_path(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.session_dir(session_id)?.join(CONTEXT_FILE))
    }

    pub fn conversation_log_path(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.session_dir(session_id)?.join(CONVERSATION_LOG_FILE))
    }

    pub async fn exists(&self, session_id: &str) -> Result<bool> {
        let path = self.context_path(session_id)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Reads the session's context, or a fresh one if nothing is stored
    /// yet. Never creates anything on disk.
    pub async fn load(&self, session_id: &str) -> Result<SessionContext> {
        match self.read(session_id).await? {
            Some(context) => Ok(context),
            None => {
                debug!("No stored context for session {}, starting fresh", session_id);
                Ok(SessionContext::new(session_id))
            }
        }
    }

    /// Like [`load`](Self::load) but a missing document is an error.
    pub async fn fetch(&self, session_id: &str) -> Result<SessionContext> {
        self.read(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Writes the whole document, replacing whatever was there.
    pub async fn save(&self, context: &SessionContext) -> Result<()> {
        let dir = self.session_dir(&context.session_id)?;
        tokio::fs::create_dir_all(&dir).await?;

        let body = serde_json::to_string_pretty(context)?;
        tokio::fs::write(dir.join(CONTEXT_FILE), body).await?;

        debug!(
            "Saved context for session {} ({} metadata keys)",
            context.session_id,
            context.metadata.len()
        );
        Ok(())
    }

    /// Stores a new session's document, refusing to replace an existing one.
    pub async fn create(&self, context: &SessionContext) -> Result<()> {
        if self.exists(&context.session_id).await? {
            return Err(Error::SessionExists {
                session_id: context.session_id.clone(),
            });
        }
        self.save(context).await?;
        info!("Created session {}", context.session_id);
        Ok(())
    }

    async fn read(&self, session_id: &str) -> Result<Option<SessionContext>> {
        let path = self.context_path(session_id)?;

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut context: SessionContext =
            serde_json::from_str(&raw).map_err(|source| Error::ContextCorrupted {
                session_id: session_id.to_string(),
                source,
            })?;

        // The directory name is authoritative for the session's identity.
        if context.session_id != session_id {
            if !context.session_id.is_empty() {
                warn!(
                    "Context document at {} names session {:?}, using {:?}",
                    path.display(),
                    context.session_id,
                    session_id
                );
            }
            context.session_id = session_id.to_string();
        }

        Ok(Some(context))
    }
}

fn validate(session_id: &str) -> Result<()> {
    if is_valid_session_id(session_id) {
        Ok(())
    } else {
        Err(Error::InvalidSessionId {
            session_id: session_id.to_string(),
        })
    }
}
