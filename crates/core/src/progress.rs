use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dispatch::ItemOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchProgress {
    pub ordinal: usize,
    pub total: usize,
    pub path: PathBuf,
    pub outcome: ItemOutcome,
}

pub trait ProgressSink: Send + Sync {
    /// Called before an item is attempted.
    fn on_item_start(&self, _ordinal: usize, _total: usize, _path: &std::path::Path) {}

    /// Called once per item, after its outcome is recorded.
    fn on_progress(&self, progress: DispatchProgress);
}
