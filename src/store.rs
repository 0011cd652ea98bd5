//! Persistence for access tokens so a new process can reuse a still-valid token.

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::auth::Token;
use crate::error::StoreError;

const AUTH_METHOD: &str = "client_credentials";

/// Storage for the most recent token of each client id.
pub trait TokenStore: Debug + Send + Sync {
    /// Returns the stored token for `client_id`. Missing, unreadable or foreign
    /// records yield `None`.
    fn load(&self, client_id: &str) -> Option<Token>;

    fn save(&self, token: &Token) -> Result<(), StoreError>;
}

/// Keeps tokens for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, client_id: &str) -> Option<Token> {
        self.tokens.lock().get(client_id).cloned()
    }

    fn save(&self, token: &Token) -> Result<(), StoreError> {
        self.tokens
            .lock()
            .insert(token.owner_client_id.clone(), token.clone());
        Ok(())
    }
}

/// On-disk layout of a saved token.
#[derive(Debug, Serialize, Deserialize)]
struct TokenFile {
    access_token: String,
    #[serde(with = "time::serde::rfc3339")]
    token_expires_at: OffsetDateTime,
    client_id: String,
    #[serde(default)]
    auth_method: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    saved_at: Option<OffsetDateTime>,
}

/// Single JSON file holding the latest token, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<cache dir>/eagleview/client_credentials_tokens.json`, or a file in the
    /// working directory when the platform has no cache dir.
    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .map(|d| d.join("eagleview").join("client_credentials_tokens.json"))
            .unwrap_or_else(|| PathBuf::from("eagleview_client_credentials_tokens.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Option<TokenFile> {
        let bytes = fs::read(&self.path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("ignoring unreadable token file {}: {e}", self.path.display());
                None
            }
        }
    }

    fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, client_id: &str) -> Option<Token> {
        let record = self.read()?;
        if record.client_id != client_id {
            tracing::debug!("stored token belongs to a different client id; ignoring it");
            return None;
        }
        if record.access_token.is_empty() {
            return None;
        }

        Some(Token {
            access_token: record.access_token,
            expires_at: record.token_expires_at,
            owner_client_id: record.client_id,
        })
    }

    fn save(&self, token: &Token) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(Self::io_error(parent))?;
        }

        let record = TokenFile {
            access_token: token.access_token.clone(),
            token_expires_at: token.expires_at,
            client_id: token.owner_client_id.clone(),
            auth_method: Some(AUTH_METHOD.to_string()),
            saved_at: Some(OffsetDateTime::now_utc()),
        };
        let serialized = serde_json::to_vec_pretty(&record).map_err(StoreError::Serialization)?;

        let mut tmp_path = self.path.clone();
        tmp_path.set_extension("tmp");
        {
            let mut file = File::create(&tmp_path).map_err(Self::io_error(&tmp_path))?;
            file.write_all(&serialized)
                .map_err(Self::io_error(&tmp_path))?;
            file.sync_all().map_err(Self::io_error(&tmp_path))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(Self::io_error(&self.path))?;

        tracing::debug!("saved access token to {}", self.path.display());
        Ok(())
    }
}
