mod backend;
pub mod config;
mod directory;
mod dispatch;
mod error;
mod files;
mod progress;
mod resolver;
pub mod run_log;
mod session;

pub const APP_NAME: &str = "tgdrop";

pub use backend::telegram_mtproto::{
    LoginPrompt, PendingPhoto, TelegramMtProto, TelegramMtProtoConfig,
};
pub use backend::{
    Backend, BackendFuture, InMemoryBackend, MemoryUpload, RequestNonce, SentPhoto,
};
pub use config::{Credentials, Settings, load_credentials, load_settings};
pub use directory::{
    ChannelRecord, ChatRecord, Conversation, ConversationKind, DIALOG_PAGE_LIMIT, DialogEntities,
    DialogsPage, DirectorySnapshot, GroupRecord, Identity, ListingClass, ListingEntry,
    fetch_directory,
};
pub use dispatch::{
    DEFAULT_DELAY_MS, DispatchConfig, DispatchItem, DispatchOptions, DispatchResult, FailureStage,
    ItemOutcome, dispatch, dispatch_with,
};
pub use error::{Error, Result};
pub use files::{IMAGE_EXTENSIONS, is_image_path, list_images};
pub use progress::{DispatchProgress, ProgressSink};
pub use resolver::{ResolvedPeer, resolve};
pub use session::{DEFAULT_SESSION_FILE_NAME, SessionFile};
