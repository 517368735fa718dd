//! Per-conversation state: history, active mode and mode settings.

pub mod store;
pub mod types;

pub use store::{SessionStore, DEFAULT_SESSION_TTL};
pub use types::{AiMode, Mode, SessionSettings};
