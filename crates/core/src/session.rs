use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;

use crate::{Error, Result};

pub const DEFAULT_SESSION_FILE_NAME: &str = "session.tgdrop";

/// Base64 text file holding the serialized MTProto session.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Vec<u8>>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        base64::engine::general_purpose::STANDARD
            .decode(text.as_bytes())
            .map(Some)
            .map_err(|e| Error::InvalidConfig {
                message: format!("session file {} is corrupt: {e}", self.path.display()),
            })
    }

    /// Loads the session of an earlier `login`; a missing or empty file is `SessionMissing`.
    pub fn require(&self) -> Result<Vec<u8>> {
        self.load()?.ok_or_else(|| Error::SessionMissing {
            path: self.path.clone(),
        })
    }

    pub fn save(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(encoded.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
