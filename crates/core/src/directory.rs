use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::Backend;
use crate::resolver::{ResolvedPeer, resolve_entry};
use crate::{Error, Result};

/// Only the first backend page is read; conversations past it are not visible.
pub const DIALOG_PAGE_LIMIT: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    User,
    Group,
    Channel,
}

/// A dialog's peer reference as listed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversation {
    pub id: i64,
    pub kind: ConversationKind,
}

impl Conversation {
    pub fn user(id: i64) -> Self {
        Self {
            id,
            kind: ConversationKind::User,
        }
    }

    pub fn group(id: i64) -> Self {
        Self {
            id,
            kind: ConversationKind::Group,
        }
    }

    pub fn channel(id: i64) -> Self {
        Self {
            id,
            kind: ConversationKind::Channel,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: Option<String>,
    pub access_hash: Option<i64>,
}

impl Identity {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub id: i64,
    pub title: String,
    pub username: Option<String>,
    pub megagroup: bool,
    pub access_hash: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRecord {
    Group(GroupRecord),
    Channel(ChannelRecord),
}

/// Everything one dialogs response carries, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialogEntities {
    pub conversations: Vec<Conversation>,
    pub users: Vec<Identity>,
    pub chats: Vec<ChatRecord>,
}

/// The two shapes a dialogs response comes in, plus the cache-hit answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogsPage {
    Complete(DialogEntities),
    Slice { total: i32, entities: DialogEntities },
    NotModified { total: i32 },
}

/// One fetched listing of the conversations visible to the session.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    pub conversations: Vec<Conversation>,
    identities: HashMap<i64, Identity>,
    groups: HashMap<i64, GroupRecord>,
    channels: HashMap<i64, ChannelRecord>,
    total: Option<i32>,
}

impl DirectorySnapshot {
    pub fn from_page(page: DialogsPage) -> Result<Self> {
        let (entities, total) = match page {
            DialogsPage::Complete(entities) => (entities, None),
            DialogsPage::Slice { total, entities } => (entities, Some(total)),
            DialogsPage::NotModified { total } => {
                return Err(Error::DirectoryUnavailable {
                    message: format!("backend answered not-modified (count={total})"),
                });
            }
        };
        Ok(Self::from_entities(entities, total))
    }

    pub fn from_entities(entities: DialogEntities, total: Option<i32>) -> Self {
        let mut identities = HashMap::with_capacity(entities.users.len());
        for user in entities.users {
            identities.entry(user.id).or_insert(user);
        }

        let mut groups = HashMap::new();
        let mut channels = HashMap::new();
        for chat in entities.chats {
            match chat {
                ChatRecord::Group(g) => {
                    groups.entry(g.id).or_insert(g);
                }
                ChatRecord::Channel(c) => {
                    channels.entry(c.id).or_insert(c);
                }
            }
        }

        Self {
            conversations: entities.conversations,
            identities,
            groups,
            channels,
            total,
        }
    }

    pub fn identity(&self, id: i64) -> Option<&Identity> {
        self.identities.get(&id)
    }

    pub fn group(&self, id: i64) -> Option<&GroupRecord> {
        self.groups.get(&id)
    }

    pub fn channel(&self, id: i64) -> Option<&ChannelRecord> {
        self.channels.get(&id)
    }

    /// Number of dialogs the backend reports beyond this page, if it said so.
    pub fn hidden_count(&self) -> usize {
        match self.total {
            Some(total) => usize::try_from(total)
                .unwrap_or(0)
                .saturating_sub(self.conversations.len()),
            None => 0,
        }
    }

    /// Human-facing classification of every fully addressable conversation.
    pub fn listing(&self) -> Vec<ListingEntry> {
        self.conversations
            .iter()
            .filter_map(|conversation| {
                let peer = resolve_entry(self, conversation)?;
                self.describe(peer)
            })
            .collect()
    }

    fn describe(&self, peer: ResolvedPeer) -> Option<ListingEntry> {
        match peer {
            ResolvedPeer::User { id, .. } => {
                let identity = self.identity(id)?;
                Some(ListingEntry {
                    class: ListingClass::User,
                    id,
                    title: identity.display_name(),
                    username: identity.username.clone(),
                })
            }
            ResolvedPeer::Group { id } => {
                let group = self.group(id)?;
                Some(ListingEntry {
                    class: ListingClass::Group,
                    id,
                    title: group.title.clone(),
                    username: None,
                })
            }
            ResolvedPeer::Channel { id, .. } => {
                let channel = self.channel(id)?;
                Some(ListingEntry {
                    class: if channel.megagroup {
                        ListingClass::SuperGroup
                    } else {
                        ListingClass::Channel
                    },
                    id,
                    title: channel.title.clone(),
                    username: channel.username.clone(),
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingClass {
    User,
    Group,
    Channel,
    SuperGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub class: ListingClass,
    pub id: i64,
    pub title: String,
    pub username: Option<String>,
}

impl fmt::Display for ListingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handle = self
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(|u| format!(" (@{u})"))
            .unwrap_or_default();
        match self.class {
            ListingClass::User => write!(f, "User   | ID: {} | {}{handle}", self.id, self.title),
            ListingClass::Group => write!(f, "Group  | ID: {} | {}", self.id, self.title),
            ListingClass::Channel => {
                write!(f, "Channel | ID: {}{handle} | {}", self.id, self.title)
            }
            ListingClass::SuperGroup => {
                write!(f, "SuperGroup | ID: {}{handle} | {}", self.id, self.title)
            }
        }
    }
}

/// Fetches the first dialogs page and normalizes it. Not retried.
pub async fn fetch_directory<B: Backend + ?Sized>(backend: &B) -> Result<DirectorySnapshot> {
    debug!(
        event = "directory.fetch",
        provider = backend.provider(),
        limit = DIALOG_PAGE_LIMIT,
        "directory.fetch"
    );

    let page = backend
        .fetch_dialogs(DIALOG_PAGE_LIMIT)
        .await
        .map_err(|e| match e {
            Error::Cancelled => Error::Cancelled,
            Error::SessionMissing { path } => Error::SessionMissing { path },
            other => Error::DirectoryUnavailable {
                message: other.to_string(),
            },
        })?;
    let snapshot = DirectorySnapshot::from_page(page)?;

    debug!(
        event = "directory.fetched",
        conversations = snapshot.conversations.len(),
        identities = snapshot.identities.len(),
        groups = snapshot.groups.len(),
        channels = snapshot.channels.len(),
        hidden = snapshot.hidden_count(),
        "directory.fetched"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    fn identity(id: i64, first: &str, last: &str, username: Option<&str>) -> Identity {
        Identity {
            id,
            first_name: first.to_string(),
            last_name: last.to_string(),
            username: username.map(str::to_string),
            access_hash: Some(id * 10),
        }
    }

    fn channel(id: i64, title: &str, megagroup: bool) -> ChatRecord {
        ChatRecord::Channel(ChannelRecord {
            id,
            title: title.to_string(),
            username: None,
            megagroup,
            access_hash: Some(id * 100),
        })
    }

    fn entities() -> DialogEntities {
        DialogEntities {
            conversations: vec![
                Conversation::user(42),
                Conversation::group(5),
                Conversation::channel(7),
                Conversation::channel(8),
                Conversation::user(99),
            ],
            users: vec![identity(42, "Ada", "Lovelace", Some("ada"))],
            chats: vec![
                ChatRecord::Group(GroupRecord {
                    id: 5,
                    title: "Family".to_string(),
                }),
                channel(7, "News", false),
                channel(8, "Rustaceans", true),
            ],
        }
    }

    #[test]
    fn slice_and_complete_normalize_to_the_same_snapshot() {
        let complete = DirectorySnapshot::from_page(DialogsPage::Complete(entities())).unwrap();
        let slice = DirectorySnapshot::from_page(DialogsPage::Slice {
            total: 250,
            entities: entities(),
        })
        .unwrap();

        assert_eq!(complete.conversations, slice.conversations);
        assert_eq!(complete.identity(42), slice.identity(42));
        assert_eq!(complete.channel(8), slice.channel(8));
        assert_eq!(complete.hidden_count(), 0);
        assert_eq!(slice.hidden_count(), 245);
    }

    #[test]
    fn not_modified_is_unavailable() {
        let err = DirectorySnapshot::from_page(DialogsPage::NotModified { total: 3 }).unwrap_err();
        assert!(matches!(err, Error::DirectoryUnavailable { .. }));
    }

    #[test]
    fn first_user_entry_wins_on_duplicate_ids() {
        let mut e = entities();
        e.users.push(identity(42, "Other", "Person", None));
        let snapshot = DirectorySnapshot::from_entities(e, None);
        assert_eq!(snapshot.identity(42).unwrap().first_name, "Ada");
    }

    #[test]
    fn listing_classifies_and_skips_unaddressable_entries() {
        let snapshot = DirectorySnapshot::from_entities(entities(), None);
        let lines: Vec<String> = snapshot.listing().iter().map(|e| e.to_string()).collect();
        assert_eq!(
            lines,
            vec![
                "User   | ID: 42 | Ada Lovelace (@ada)".to_string(),
                "Group  | ID: 5 | Family".to_string(),
                "Channel | ID: 7 | News".to_string(),
                "SuperGroup | ID: 8 | Rustaceans".to_string(),
            ]
        );
    }

    #[test]
    fn channel_handle_is_rendered_before_title() {
        let entry = ListingEntry {
            class: ListingClass::Channel,
            id: 3,
            title: "Releases".to_string(),
            username: Some("rel".to_string()),
        };
        assert_eq!(entry.to_string(), "Channel | ID: 3 (@rel) | Releases");
    }

    #[tokio::test]
    async fn backend_failure_maps_to_directory_unavailable() {
        let backend = InMemoryBackend::unavailable();
        let err = fetch_directory(&backend).await.unwrap_err();
        assert!(matches!(err, Error::DirectoryUnavailable { .. }));
    }
}
