mod context;
mod store;

pub use context::{DEFAULT_SESSION_ID, SessionContext, is_valid_session_id};
pub use store::ContextStore;
