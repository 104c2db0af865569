use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directory::{Conversation, ConversationKind, DirectorySnapshot};
use crate::{Error, Result};

/// Fully-qualified addressing for one conversation.
///
/// Users and channels always carry the access hash the backend requires;
/// basic groups never need one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedPeer {
    User { id: i64, access_hash: i64 },
    Group { id: i64 },
    Channel { id: i64, access_hash: i64 },
}

impl ResolvedPeer {
    pub fn id(&self) -> i64 {
        match *self {
            Self::User { id, .. } | Self::Group { id } | Self::Channel { id, .. } => id,
        }
    }

    pub fn kind(&self) -> ConversationKind {
        match self {
            Self::User { .. } => ConversationKind::User,
            Self::Group { .. } => ConversationKind::Group,
            Self::Channel { .. } => ConversationKind::Channel,
        }
    }
}

/// Completes one listed conversation against the snapshot's entity tables.
///
/// Returns `None` when the kind needs an entity (and its access hash) that the
/// snapshot does not carry.
pub fn resolve_entry(
    snapshot: &DirectorySnapshot,
    conversation: &Conversation,
) -> Option<ResolvedPeer> {
    let id = conversation.id;
    match conversation.kind {
        ConversationKind::User => {
            let access_hash = snapshot.identity(id)?.access_hash?;
            Some(ResolvedPeer::User { id, access_hash })
        }
        ConversationKind::Group => Some(ResolvedPeer::Group { id }),
        ConversationKind::Channel => {
            let access_hash = snapshot.channel(id)?.access_hash?;
            Some(ResolvedPeer::Channel { id, access_hash })
        }
    }
}

/// Scans conversations in listing order; the first fully addressable match wins.
pub fn resolve(snapshot: &DirectorySnapshot, target_id: i64) -> Result<ResolvedPeer> {
    let peer = snapshot
        .conversations
        .iter()
        .filter(|c| c.id == target_id)
        .find_map(|c| resolve_entry(snapshot, c))
        .ok_or(Error::TargetNotFound { target_id })?;

    debug!(
        event = "peer.resolved",
        target_id,
        kind = ?peer.kind(),
        "peer.resolved"
    );
    Ok(peer)
}
