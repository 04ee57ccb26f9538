use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use drivebatch_core::OAuthToken;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("credential not found")]
    NotFound,
}

/// The persisted OAuth record. Single user, single session — one file,
/// no key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl StoredCredential {
    /// Stamps a freshly issued token with an absolute expiry.
    pub fn from_token(token: &OAuthToken) -> Self {
        Self {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            scope: token.scope.clone(),
            token_type: Some(token.token_type.clone()),
            expires_at: token.expires_in.map(|secs| now_unix() + secs as i64),
        }
    }

    pub fn is_expired(&self, skew_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now_unix().saturating_add(skew_secs),
            None => false,
        }
    }
}

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<StoredCredential, StorageError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound);
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn save(&self, credential: &StoredCredential) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_vec_pretty(credential)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    /// Removes the credential. Reports whether one existed; removing an
    /// absent credential is not an error.
    pub fn delete(&self) -> Result<bool, StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
