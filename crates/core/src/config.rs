use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dispatch::DEFAULT_DELAY_MS;
use crate::session::DEFAULT_SESSION_FILE_NAME;
use crate::{Error, Result};

pub const CREDENTIALS_FILE_NAME: &str = ".telegram-config";
pub const SETTINGS_FILE_NAME: &str = "tgdrop.toml";
pub const DEFAULT_IMAGES_DIR: &str = "./images";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub send: SendSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SendSettings {
    pub images_dir: PathBuf,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub path: PathBuf,
}

impl Default for SendSettings {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from(DEFAULT_IMAGES_DIR),
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_SESSION_FILE_NAME),
        }
    }
}

pub fn settings_path(config_dir: &Path) -> PathBuf {
    config_dir.join(SETTINGS_FILE_NAME)
}

pub fn load_settings(config_dir: &Path) -> Result<Settings> {
    let path = settings_path(config_dir);
    if !path.exists() {
        return Ok(Settings::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| Error::InvalidConfig {
        message: format!("settings read failed: {e}"),
    })?;
    let mut settings = parse_settings(&text)?;

    // Relative session paths are anchored at the settings file, not the cwd.
    if settings.session.path.is_relative() {
        settings.session.path = config_dir.join(&settings.session.path);
    }
    Ok(settings)
}

pub fn parse_settings(text: &str) -> Result<Settings> {
    toml::from_str(text).map_err(|e| Error::InvalidConfig {
        message: format!("settings invalid: {e}"),
    })
}

/// Application identification needed to open an MTProto session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_id: i32,
    pub api_hash: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .finish()
    }
}

/// `KEY=value` lines; blank lines and `#` comments are ignored, unknown keys too.
pub fn parse_credentials(text: &str) -> (Option<i32>, Option<String>) {
    let mut api_id = None;
    let mut api_hash = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "API_ID" => api_id = value.trim().parse::<i32>().ok(),
            "API_HASH" => api_hash = Some(value.trim().to_string()),
            _ => {}
        }
    }
    (api_id, api_hash)
}

/// The working directory's file wins over the one in the home directory.
pub fn find_credentials_file(cwd: &Path, home: Option<&Path>) -> Option<PathBuf> {
    let local = cwd.join(CREDENTIALS_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    let home = home?.join(CREDENTIALS_FILE_NAME);
    home.is_file().then_some(home)
}

fn credentials_from(
    file_text: Option<&str>,
    env_api_id: Option<&str>,
    env_api_hash: Option<&str>,
) -> Result<Credentials> {
    let (mut api_id, mut api_hash) = file_text.map(parse_credentials).unwrap_or_default();

    if let Some(v) = env_api_id.map(str::trim).filter(|v| !v.is_empty()) {
        api_id = Some(v.parse::<i32>().map_err(|_| Error::InvalidConfig {
            message: format!("TGDROP_API_ID is not a number: {v}"),
        })?);
    }
    if let Some(v) = env_api_hash.map(str::trim).filter(|v| !v.is_empty()) {
        api_hash = Some(v.to_string());
    }

    match (api_id, api_hash) {
        (Some(api_id), Some(api_hash)) if api_id != 0 && !api_hash.is_empty() => {
            Ok(Credentials { api_id, api_hash })
        }
        _ => Err(Error::InvalidConfig {
            message: format!(
                "API_ID and API_HASH must be set; create {CREDENTIALS_FILE_NAME} or ~/{CREDENTIALS_FILE_NAME} with API_ID and API_HASH"
            ),
        }),
    }
}

pub fn load_credentials(cwd: &Path) -> Result<Credentials> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let file_text = match find_credentials_file(cwd, home.as_deref()) {
        Some(path) => Some(std::fs::read_to_string(&path).map_err(|e| Error::InvalidConfig {
            message: format!("credentials read failed ({}): {e}", path.display()),
        })?),
        None => None,
    };

    credentials_from(
        file_text.as_deref(),
        std::env::var("TGDROP_API_ID").ok().as_deref(),
        std::env::var("TGDROP_API_HASH").ok().as_deref(),
    )
}
