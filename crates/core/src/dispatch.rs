use std::fs::File;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{Backend, RequestNonce};
use crate::progress::{DispatchProgress, ProgressSink};
use crate::resolver::ResolvedPeer;
use crate::{Error, Result};

pub const DEFAULT_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Open,
    Upload,
    Send,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Upload => "upload",
            Self::Send => "send",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Pending,
    Sent { nonce: RequestNonce },
    Failed { stage: FailureStage, cause: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchItem {
    pub ordinal: usize,
    pub path: PathBuf,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchResult {
    pub attempted: u64,
    pub sent: u64,
    pub failed: u64,
    pub items: Vec<DispatchItem>,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

#[derive(Default)]
pub struct DispatchOptions<'a> {
    pub cancel: Option<&'a CancellationToken>,
    pub progress: Option<&'a dyn ProgressSink>,
}

pub async fn dispatch<B: Backend + ?Sized>(
    backend: &B,
    peer: &ResolvedPeer,
    files: &[PathBuf],
    config: &DispatchConfig,
) -> Result<DispatchResult> {
    dispatch_with(backend, peer, files, config, DispatchOptions::default()).await
}

/// Sends every file in order, one at a time.
///
/// A file that cannot be opened, uploaded or sent is recorded as failed and the
/// batch moves on; only an empty batch or cancellation end it early.
pub async fn dispatch_with<B: Backend + ?Sized>(
    backend: &B,
    peer: &ResolvedPeer,
    files: &[PathBuf],
    config: &DispatchConfig,
    options: DispatchOptions<'_>,
) -> Result<DispatchResult> {
    if files.is_empty() {
        return Err(Error::EmptyBatch);
    }

    let total = files.len();
    let delay = Duration::from_millis(config.delay_ms);
    let started = Instant::now();
    info!(
        event = "dispatch.start",
        provider = backend.provider(),
        target_id = peer.id(),
        kind = ?peer.kind(),
        total,
        delay_ms = config.delay_ms,
        "dispatch.start"
    );

    let mut items: Vec<DispatchItem> = files
        .iter()
        .enumerate()
        .map(|(i, path)| DispatchItem {
            ordinal: i + 1,
            path: path.clone(),
            outcome: ItemOutcome::Pending,
        })
        .collect();
    let mut result = DispatchResult::default();

    for (index, item) in items.iter_mut().enumerate() {
        if let Some(cancel) = options.cancel
            && cancel.is_cancelled()
        {
            return Err(Error::Cancelled);
        }
        if let Some(progress) = options.progress {
            progress.on_item_start(item.ordinal, total, &item.path);
        }

        item.outcome = match send_one(backend, peer, &item.path, options.cancel).await? {
            Ok(nonce) => {
                result.sent += 1;
                info!(
                    event = "dispatch.item.sent",
                    ordinal = item.ordinal,
                    path = %item.path.display(),
                    nonce = nonce.0,
                    "dispatch.item.sent"
                );
                ItemOutcome::Sent { nonce }
            }
            Err((stage, cause)) => {
                result.failed += 1;
                warn!(
                    event = "dispatch.item.failed",
                    ordinal = item.ordinal,
                    path = %item.path.display(),
                    stage = stage.as_str(),
                    cause = %cause,
                    "dispatch.item.failed"
                );
                ItemOutcome::Failed { stage, cause }
            }
        };
        result.attempted += 1;

        if let Some(progress) = options.progress {
            progress.on_progress(DispatchProgress {
                ordinal: item.ordinal,
                total,
                path: item.path.clone(),
                outcome: item.outcome.clone(),
            });
        }

        if index + 1 < total && !delay.is_zero() {
            debug!(event = "dispatch.pace", delay_ms = config.delay_ms, "dispatch.pace");
            cancellable(options.cancel, tokio::time::sleep(delay)).await?;
        }
    }

    result.items = items;
    info!(
        event = "dispatch.finish",
        attempted = result.attempted,
        sent = result.sent,
        failed = result.failed,
        duration_ms = started.elapsed().as_millis() as u64,
        "dispatch.finish"
    );
    Ok(result)
}

type ItemAttempt = std::result::Result<RequestNonce, (FailureStage, String)>;

/// The outer `Result` only carries cancellation; item failures are the inner one.
async fn send_one<B: Backend + ?Sized>(
    backend: &B,
    peer: &ResolvedPeer,
    path: &Path,
    cancel: Option<&CancellationToken>,
) -> Result<ItemAttempt> {
    let bytes = match read_item(path) {
        Ok(bytes) => bytes,
        Err(e) => return Ok(Err((FailureStage::Open, e.to_string()))),
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let upload = match cancellable(cancel, backend.upload_file(&filename, bytes)).await? {
        Ok(upload) => upload,
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => return Ok(Err((FailureStage::Upload, e.to_string()))),
    };

    let nonce = RequestNonce::now();
    match cancellable(cancel, backend.send_photo(peer, upload, nonce)).await? {
        Ok(()) => Ok(Ok(nonce)),
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => Ok(Err((FailureStage::Send, e.to_string()))),
    }
}

fn read_item(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut bytes = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

async fn cancellable<T>(
    cancel: Option<&CancellationToken>,
    fut: impl Future<Output = T>,
) -> Result<T> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            v = fut => Ok(v),
        },
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::directory::DialogsPage;

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new(DialogsPage::NotModified { total: 0 })
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_before_anything_happens() {
        let backend = backend();
        let err = dispatch(
            &backend,
            &ResolvedPeer::Group { id: 1 },
            &[],
            &DispatchConfig { delay_ms: 0 },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::EmptyBatch));
        assert_eq!(
            backend.uploaded.load(std::sync::atomic::Ordering::Relaxed),
            0
        );
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_item() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("a.png");
        std::fs::write(&path, b"png").unwrap();

        let backend = backend();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dispatch_with(
            &backend,
            &ResolvedPeer::Group { id: 1 },
            &[path],
            &DispatchConfig { delay_ms: 0 },
            DispatchOptions {
                cancel: Some(&cancel),
                progress: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(backend.sent().await.is_empty());
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_pacing_delay() {
        let temp = tempfile::tempdir().unwrap();
        let files: Vec<PathBuf> = (0..2)
            .map(|i| {
                let p = temp.path().join(format!("{i}.png"));
                std::fs::write(&p, b"png").unwrap();
                p
            })
            .collect();

        let backend = backend();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = dispatch_with(
            &backend,
            &ResolvedPeer::Group { id: 1 },
            &files,
            &DispatchConfig { delay_ms: 60_000 },
            DispatchOptions {
                cancel: Some(&cancel),
                progress: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(backend.sent().await.len(), 1);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let v = serde_json::to_value(ItemOutcome::Failed {
            stage: FailureStage::Upload,
            cause: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["stage"], "upload");
        assert_eq!(v["cause"], "boom");
    }
}
