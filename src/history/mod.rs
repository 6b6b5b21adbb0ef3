mod storage;
mod types;

pub use storage::ConversationLog;
pub use types::Message;
