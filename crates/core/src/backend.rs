use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::directory::DialogsPage;
use crate::resolver::ResolvedPeer;
use crate::{Error, Result};

pub mod telegram_mtproto;

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Network side of the engine: one authorized messaging session.
///
/// Implementations are driven strictly sequentially by a single command.
pub trait Backend {
    /// Handle for content staged by [`Backend::upload_file`], consumed by one send.
    type Upload: Send;

    fn provider(&self) -> &str;

    fn fetch_dialogs(&self, limit: i32) -> BackendFuture<'_, DialogsPage>;

    fn upload_file<'a>(&'a self, filename: &'a str, bytes: Vec<u8>)
    -> BackendFuture<'a, Self::Upload>;

    fn send_photo<'a>(
        &'a self,
        peer: &'a ResolvedPeer,
        upload: Self::Upload,
        nonce: RequestNonce,
    ) -> BackendFuture<'a, ()>;
}

/// Per-request correlation value. Not an ordering guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestNonce(pub i64);

impl RequestNonce {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self(
            now.timestamp_nanos_opt()
                .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryUpload {
    pub object_id: String,
    pub filename: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPhoto {
    pub peer: ResolvedPeer,
    pub object_id: String,
    pub filename: String,
    pub nonce: RequestNonce,
}

/// Backend that keeps everything in process memory.
#[derive(Debug)]
pub struct InMemoryBackend {
    pub uploaded: AtomicUsize,
    pub dialog_fetches: AtomicUsize,
    dialogs: Option<DialogsPage>,
    sent: Mutex<Vec<SentPhoto>>,
}

impl InMemoryBackend {
    pub fn new(dialogs: DialogsPage) -> Self {
        Self {
            uploaded: AtomicUsize::new(0),
            dialog_fetches: AtomicUsize::new(0),
            dialogs: Some(dialogs),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// A backend whose dialog listing always fails.
    pub fn unavailable() -> Self {
        Self {
            dialogs: None,
            ..Self::new(DialogsPage::NotModified { total: 0 })
        }
    }

    pub async fn sent(&self) -> Vec<SentPhoto> {
        self.sent.lock().await.clone()
    }
}

impl Backend for InMemoryBackend {
    type Upload = MemoryUpload;

    fn provider(&self) -> &str {
        "test.mem"
    }

    fn fetch_dialogs(&self, _limit: i32) -> BackendFuture<'_, DialogsPage> {
        Box::pin(async move {
            self.dialog_fetches.fetch_add(1, Ordering::Relaxed);
            self.dialogs.clone().ok_or_else(|| Error::Telegram {
                message: "dialogs unavailable".to_string(),
            })
        })
    }

    fn upload_file<'a>(
        &'a self,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> BackendFuture<'a, Self::Upload> {
        Box::pin(async move {
            self.uploaded.fetch_add(1, Ordering::Relaxed);
            Ok(MemoryUpload {
                object_id: format!("mem:{}", uuid::Uuid::new_v4()),
                filename: filename.to_string(),
                size: bytes.len(),
            })
        })
    }

    fn send_photo<'a>(
        &'a self,
        peer: &'a ResolvedPeer,
        upload: Self::Upload,
        nonce: RequestNonce,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.sent.lock().await.push(SentPhoto {
                peer: *peer,
                object_id: upload.object_id,
                filename: upload.filename,
                nonce,
            });
            Ok(())
        })
    }
}
