pub mod agent;
pub mod chat;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod logging;
pub mod server;
pub mod session;

pub use error::{Error, Result};
