use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use grammers_client::grammers_tl_types as tl;
use grammers_client::session::defs::{PeerAuth, PeerId, PeerRef};
use grammers_client::session::storages::TlSession;
use grammers_client::{Client, SignInError};
use grammers_mtsender::SenderPool;
use tokio::task::AbortHandle;
use tokio::time::{Duration, timeout};
use tracing::{debug, info};

use super::{Backend, BackendFuture, RequestNonce};
use crate::config::Credentials;
use crate::directory::{
    ChannelRecord, ChatRecord, Conversation, DialogEntities, DialogsPage, GroupRecord, Identity,
};
use crate::resolver::ResolvedPeer;
use crate::session::SessionFile;
use crate::{Error, Result};

const IS_AUTHORIZED_TIMEOUT_SECS: u64 = 120;
const LOGIN_STEP_TIMEOUT_SECS: u64 = 120;
const GET_DIALOGS_TIMEOUT_SECS: u64 = 60;
const SEND_MEDIA_TIMEOUT_SECS: u64 = 60;

fn upload_stream_timeout_secs(size: usize) -> u64 {
    // ~32KiB/s floor plus a fixed minute, capped at half an hour.
    let min = 60u64;
    let max = 30 * 60;
    min.saturating_add(size as u64 / (32 * 1024)).clamp(min, max)
}

#[derive(Debug, Clone)]
pub struct TelegramMtProtoConfig {
    pub credentials: Credentials,
    pub session_path: PathBuf,
}

/// Interactive answers the login flow needs. Implemented by the CLI.
pub trait LoginPrompt {
    fn code(&self) -> Result<String>;

    fn password(&self, hint: Option<&str>) -> Result<String>;
}

/// Uploaded file parts waiting to be referenced by one send.
pub struct PendingPhoto {
    pub filename: String,
    file: tl::enums::InputFile,
}

impl std::fmt::Debug for PendingPhoto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingPhoto")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

pub struct TelegramMtProto {
    api_hash: String,
    session_file: SessionFile,
    session: Arc<TlSession>,
    client: Client,
    runner: AbortHandle,
}

impl TelegramMtProto {
    /// Opens the persisted session, or a blank one if there is none yet.
    pub async fn connect(config: TelegramMtProtoConfig) -> Result<Self> {
        let session_file = SessionFile::new(config.session_path);
        let session = match session_file.load()? {
            Some(bytes) => TlSession::load(&bytes).map_err(|e| Error::InvalidConfig {
                message: format!(
                    "session load failed ({}): {e}",
                    session_file.path().display()
                ),
            })?,
            None => TlSession::new(),
        };
        let session = Arc::new(session);

        let pool = SenderPool::new(Arc::clone(&session), config.credentials.api_id);
        let client = Client::new(&pool);
        let SenderPool { runner, .. } = pool;
        let runner = tokio::spawn(runner.run()).abort_handle();

        debug!(
            event = "telegram.connect",
            session = %session_file.path().display(),
            "telegram.connect"
        );

        Ok(Self {
            api_hash: config.credentials.api_hash,
            session_file,
            session,
            client,
            runner,
        })
    }

    /// Like [`Self::connect`], but only for a session an earlier `login` authorized.
    pub async fn connect_authorized(config: TelegramMtProtoConfig) -> Result<Self> {
        let session_file = SessionFile::new(config.session_path.clone());
        session_file.require()?;

        let backend = Self::connect(config).await?;
        if !backend.is_authorized().await? {
            return Err(Error::SessionMissing {
                path: backend.session_file.path().to_path_buf(),
            });
        }
        Ok(backend)
    }

    pub async fn is_authorized(&self) -> Result<bool> {
        timeout(
            Duration::from_secs(IS_AUTHORIZED_TIMEOUT_SECS),
            self.client.is_authorized(),
        )
        .await
        .map_err(|_| Error::Telegram {
            message: format!(
                "is_authorized timed out after {IS_AUTHORIZED_TIMEOUT_SECS}s (check network / MTProto reachability)"
            ),
        })?
        .map_err(|e| Error::Telegram {
            message: format!("is_authorized failed: {e}"),
        })
    }

    /// Phone-code login with an optional 2FA password step. Returns the account's name.
    pub async fn login(&self, phone: &str, prompt: &dyn LoginPrompt) -> Result<String> {
        if self.is_authorized().await? {
            let me = self.client.get_me().await.map_err(|e| Error::Auth {
                message: format!("get_me failed: {e}"),
            })?;
            self.save_session()?;
            return Ok(me.full_name());
        }

        let token = timeout(
            Duration::from_secs(LOGIN_STEP_TIMEOUT_SECS),
            self.client.request_login_code(phone, &self.api_hash),
        )
        .await
        .map_err(|_| Error::Auth {
            message: format!("request_login_code timed out after {LOGIN_STEP_TIMEOUT_SECS}s"),
        })?
        .map_err(|e| Error::Auth {
            message: format!("request_login_code failed: {e}"),
        })?;

        let code = prompt.code()?;
        let user = match self.client.sign_in(&token, code.trim()).await {
            Ok(user) => user,
            Err(SignInError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().map(str::to_string);
                let password = prompt.password(hint.as_deref())?;
                self.client
                    .check_password(password_token, password.trim())
                    .await
                    .map_err(|e| Error::Auth {
                        message: format!("2FA password rejected: {e}"),
                    })?
            }
            Err(SignInError::SignUpRequired { .. }) => {
                return Err(Error::Auth {
                    message: "sign up not supported, please register with an official Telegram client first".to_string(),
                });
            }
            Err(e) => {
                return Err(Error::Auth {
                    message: format!("sign in failed: {e}"),
                });
            }
        };

        self.save_session()?;
        info!(event = "telegram.login", "telegram.login");
        Ok(user.full_name())
    }

    pub fn session_path(&self) -> &std::path::Path {
        self.session_file.path()
    }

    /// Persists the session; the server may have moved us to another DC or rotated keys.
    pub fn save_session(&self) -> Result<()> {
        self.session_file.save(&self.session.save())
    }
}

impl Drop for TelegramMtProto {
    fn drop(&mut self) {
        self.runner.abort();
    }
}

impl Backend for TelegramMtProto {
    type Upload = PendingPhoto;

    fn provider(&self) -> &str {
        "telegram.mtproto"
    }

    fn fetch_dialogs(&self, limit: i32) -> BackendFuture<'_, DialogsPage> {
        Box::pin(async move {
            let request = tl::functions::messages::GetDialogs {
                exclude_pinned: false,
                folder_id: None,
                offset_date: 0,
                offset_id: 0,
                offset_peer: tl::enums::InputPeer::Empty,
                limit,
                hash: 0,
            };
            let dialogs = timeout(
                Duration::from_secs(GET_DIALOGS_TIMEOUT_SECS),
                self.client.invoke(&request),
            )
            .await
            .map_err(|_| Error::Telegram {
                message: format!("messages.getDialogs timed out after {GET_DIALOGS_TIMEOUT_SECS}s"),
            })?
            .map_err(|e| Error::Telegram {
                message: format!("messages.getDialogs failed: {e}"),
            })?;
            Ok(dialogs_page(dialogs))
        })
    }

    fn upload_file<'a>(
        &'a self,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> BackendFuture<'a, Self::Upload> {
        Box::pin(async move {
            let size = bytes.len();
            let mut stream = Cursor::new(bytes);
            let timeout_secs = upload_stream_timeout_secs(size);
            let uploaded = timeout(
                Duration::from_secs(timeout_secs),
                self.client
                    .upload_stream(&mut stream, size, filename.to_string()),
            )
            .await
            .map_err(|_| Error::Telegram {
                message: format!("upload_stream timed out after {timeout_secs}s"),
            })?
            .map_err(|e| Error::Telegram {
                message: format!("upload_stream failed: {e}"),
            })?;

            Ok(PendingPhoto {
                filename: filename.to_string(),
                file: uploaded.raw,
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
            debug!(
                event = "telegram.send_media",
                target_id = peer.id(),
                filename = %upload.filename,
                nonce = nonce.0,
                "telegram.send_media"
            );
            let request = send_media_request(peer, upload.file, nonce);
            timeout(
                Duration::from_secs(SEND_MEDIA_TIMEOUT_SECS),
                self.client.invoke(&request),
            )
            .await
            .map_err(|_| Error::Telegram {
                message: format!("messages.sendMedia timed out after {SEND_MEDIA_TIMEOUT_SECS}s"),
            })?
            .map_err(|e| Error::Telegram {
                message: format!("messages.sendMedia failed: {e}"),
            })?;
            Ok(())
        })
    }
}

/// Photo message with an empty caption, tagged with the caller's nonce as `random_id`.
fn send_media_request(
    peer: &ResolvedPeer,
    file: tl::enums::InputFile,
    nonce: RequestNonce,
) -> tl::functions::messages::SendMedia {
    tl::functions::messages::SendMedia {
        silent: false,
        background: false,
        clear_draft: false,
        noforwards: false,
        update_stickersets_order: false,
        invert_media: false,
        allow_paid_floodskip: false,
        peer: peer_ref(peer).into(),
        reply_to: None,
        media: tl::types::InputMediaUploadedPhoto {
            spoiler: false,
            file,
            stickers: None,
            ttl_seconds: None,
        }
        .into(),
        message: String::new(),
        random_id: nonce.0,
        reply_markup: None,
        entities: None,
        schedule_date: None,
        send_as: None,
        quick_reply_shortcut: None,
        effect: None,
        allow_paid_stars: None,
        suggested_post: None,
    }
}

fn peer_ref(peer: &ResolvedPeer) -> PeerRef {
    match *peer {
        ResolvedPeer::User { id, access_hash } => PeerRef {
            id: PeerId::user(id),
            auth: PeerAuth::from_hash(access_hash),
        },
        ResolvedPeer::Group { id } => PeerRef {
            id: PeerId::chat(id),
            auth: PeerAuth::default(),
        },
        ResolvedPeer::Channel { id, access_hash } => PeerRef {
            id: PeerId::channel(id),
            auth: PeerAuth::from_hash(access_hash),
        },
    }
}

fn dialogs_page(dialogs: tl::enums::messages::Dialogs) -> DialogsPage {
    match dialogs {
        tl::enums::messages::Dialogs::Dialogs(d) => {
            DialogsPage::Complete(dialog_entities(d.dialogs, d.users, d.chats))
        }
        tl::enums::messages::Dialogs::Slice(d) => DialogsPage::Slice {
            total: d.count,
            entities: dialog_entities(d.dialogs, d.users, d.chats),
        },
        tl::enums::messages::Dialogs::NotModified(d) => DialogsPage::NotModified { total: d.count },
    }
}

fn dialog_entities(
    dialogs: Vec<tl::enums::Dialog>,
    users: Vec<tl::enums::User>,
    chats: Vec<tl::enums::Chat>,
) -> DialogEntities {
    DialogEntities {
        conversations: dialogs.into_iter().filter_map(conversation).collect(),
        users: users.into_iter().filter_map(identity).collect(),
        chats: chats.into_iter().filter_map(chat_record).collect(),
    }
}

fn conversation(dialog: tl::enums::Dialog) -> Option<Conversation> {
    let tl::enums::Dialog::Dialog(dialog) = dialog else {
        return None;
    };
    Some(match dialog.peer {
        tl::enums::Peer::User(p) => Conversation::user(p.user_id),
        tl::enums::Peer::Chat(p) => Conversation::group(p.chat_id),
        tl::enums::Peer::Channel(p) => Conversation::channel(p.channel_id),
    })
}

fn identity(user: tl::enums::User) -> Option<Identity> {
    match user {
        tl::enums::User::User(u) => Some(Identity {
            id: u.id,
            first_name: u.first_name.unwrap_or_default(),
            last_name: u.last_name.unwrap_or_default(),
            username: u.username,
            access_hash: u.access_hash,
        }),
        tl::enums::User::Empty(_) => None,
    }
}

fn chat_record(chat: tl::enums::Chat) -> Option<ChatRecord> {
    match chat {
        tl::enums::Chat::Chat(c) => Some(ChatRecord::Group(GroupRecord {
            id: c.id,
            title: c.title,
        })),
        tl::enums::Chat::Channel(c) => Some(ChatRecord::Channel(ChannelRecord {
            id: c.id,
            title: c.title,
            username: c.username,
            megagroup: c.megagroup,
            access_hash: c.access_hash,
        })),
        _ => None,
    }
}
