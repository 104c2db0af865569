use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not logged in (no authorized session at {path:?}); run `login` first")]
    SessionMissing { path: PathBuf },

    #[error("conversation directory unavailable: {message}")]
    DirectoryUnavailable { message: String },

    #[error("chat with ID {target_id} not found; use `list` to see available chats")]
    TargetNotFound { target_id: i64 },

    #[error("no files to send")]
    EmptyBatch,

    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walkdir error: {0}")]
    Walkdir(#[from] walkdir::Error),

    #[error("telegram error: {message}")]
    Telegram { message: String },

    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("cancelled")]
    Cancelled,
}
