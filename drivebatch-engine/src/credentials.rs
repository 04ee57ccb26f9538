use drivebatch_core::{DriveClient, OAuthClient};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::oauth_flow::{ConsentFlow, OAuthFlowError};
use crate::storage::{CredentialStore, StorageError, StoredCredential};

/// Treat tokens as expired a little early so a request cannot leave with
/// a credential that dies in flight.
const REFRESH_SKEW_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("oauth error: {0}")]
    OAuth(#[from] drivebatch_core::OAuthError),
    #[error("consent flow failed: {0}")]
    Flow(#[from] OAuthFlowError),
    #[error("credential storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("drive client error: {0}")]
    Drive(#[from] drivebatch_core::DriveError),
    #[error("stored credential has no refresh token")]
    MissingRefreshToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOut {
    Removed,
    NotSignedIn,
}

/// Owns the OAuth record lifecycle and hands out clients that carry a
/// currently valid access token.
pub struct CredentialManager {
    oauth: OAuthClient,
    store: CredentialStore,
    flow: ConsentFlow,
    api_base_url: Option<String>,
}

impl CredentialManager {
    pub fn new(config: &EngineConfig) -> Result<Self, AuthError> {
        let oauth = OAuthClient::new(&config.client_id, &config.client_secret)?;
        Ok(Self {
            oauth,
            store: CredentialStore::new(&config.credential_path),
            flow: ConsentFlow::new(config.oauth_port, config.oauth_timeout),
            api_base_url: None,
        })
    }

    pub fn with_parts(oauth: OAuthClient, store: CredentialStore, flow: ConsentFlow) -> Self {
        Self {
            oauth,
            store,
            flow,
            api_base_url: None,
        }
    }

    pub fn with_api_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base_url = Some(base_url.into());
        self
    }

    /// Resolves a client backed by a valid token. `force_new` always runs
    /// the interactive consent flow; otherwise the persisted credential is
    /// used, refreshed if stale, and the flow is the fallback when refresh
    /// is impossible or fails. No further automatic retry exists.
    pub async fn authorized_client(&self, force_new: bool) -> Result<DriveClient, AuthError> {
        if force_new {
            let credential = self.interactive().await?;
            return self.client_for(credential);
        }

        let credential = match self.store.load() {
            Ok(credential) => credential,
            Err(StorageError::NotFound) => {
                let credential = self.interactive().await?;
                return self.client_for(credential);
            }
            Err(err) => return Err(err.into()),
        };

        let credential = if credential.is_expired(REFRESH_SKEW_SECS) {
            match self.refresh(&credential).await {
                Ok(refreshed) => refreshed,
                Err(err) => {
                    tracing::warn!(
                        "token refresh failed, falling back to interactive sign-in: {err}"
                    );
                    self.interactive().await?
                }
            }
        } else {
            credential
        };

        self.client_for(credential)
    }

    /// Existence check only; an expired credential still counts as
    /// signed in.
    pub fn is_signed_in(&self) -> bool {
        self.store.exists()
    }

    /// Idempotent: signing out twice succeeds both times, the second
    /// reporting that no credential was found.
    pub fn sign_out(&self) -> Result<SignOut, AuthError> {
        if self.store.delete()? {
            tracing::info!("stored credential removed");
            Ok(SignOut::Removed)
        } else {
            tracing::info!("no credential found");
            Ok(SignOut::NotSignedIn)
        }
    }

    async fn interactive(&self) -> Result<StoredCredential, AuthError> {
        let token = self.flow.authenticate(&self.oauth).await?;
        let credential = StoredCredential::from_token(&token);
        self.store.save(&credential)?;
        tracing::info!("credential stored to {}", self.store.path().display());
        Ok(credential)
    }

    async fn refresh(&self, current: &StoredCredential) -> Result<StoredCredential, AuthError> {
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or(AuthError::MissingRefreshToken)?;
        let token = self.oauth.refresh_token(&refresh_token).await?;

        let mut refreshed = StoredCredential::from_token(&token);
        // The provider omits fields it considers unchanged; inherit them.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }
        if refreshed.scope.is_none() {
            refreshed.scope = current.scope.clone();
        }
        if refreshed.token_type.is_none() {
            refreshed.token_type = current.token_type.clone();
        }
        self.store.save(&refreshed)?;
        Ok(refreshed)
    }

    fn client_for(&self, credential: StoredCredential) -> Result<DriveClient, AuthError> {
        let client = match &self.api_base_url {
            Some(base_url) => DriveClient::with_base_url(base_url, credential.access_token)?,
            None => DriveClient::new(credential.access_token)?,
        };
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::now_unix;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn stored(access_token: &str, expires_at: Option<i64>) -> StoredCredential {
        StoredCredential {
            access_token: access_token.into(),
            refresh_token: Some("refresh-1".into()),
            scope: Some("https://www.googleapis.com/auth/drive".into()),
            token_type: Some("Bearer".into()),
            expires_at,
        }
    }

    // Port 1 is privileged; binding it fails, so any test that would
    // prompt interactively errors out instead of hanging.
    fn unpromptable_flow() -> ConsentFlow {
        ConsentFlow::new(1, Duration::from_secs(1)).without_browser()
    }

    #[tokio::test]
    async fn valid_stored_credential_is_used_without_prompting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/file-1"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Invoice",
                "mimeType": "application/pdf"
            })))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credential.json"));
        store.save(&stored("token-1", Some(i64::MAX))).unwrap();

        let oauth = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
        let manager = CredentialManager::with_parts(oauth, store, unpromptable_flow())
            .with_api_base_url(server.uri());

        for _ in 0..2 {
            let client = manager.authorized_client(false).await.unwrap();
            client.file_metadata("file-1").await.unwrap();
        }
    }

    #[tokio::test]
    async fn expired_credential_is_refreshed_and_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token-2",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credential.json"));
        store.save(&stored("token-1", Some(0))).unwrap();

        let oauth = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
        let manager = CredentialManager::with_parts(oauth, store, unpromptable_flow())
            .with_api_base_url(server.uri());

        manager.authorized_client(false).await.unwrap();

        let persisted = CredentialStore::new(dir.path().join("credential.json"))
            .load()
            .unwrap();
        assert_eq!(persisted.access_token, "token-2");
        // refresh response omitted these; they carry over
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(
            persisted.scope.as_deref(),
            Some("https://www.googleapis.com/auth/drive")
        );
        assert!(persisted.expires_at.unwrap() > now_unix());
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_the_interactive_flow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token-3",
                "token_type": "Bearer",
                "expires_in": 3599,
                "refresh_token": "refresh-2"
            })))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let credential_path = dir.path().join("credential.json");
        let store = CredentialStore::new(&credential_path);
        store.save(&stored("token-1", Some(0))).unwrap();

        let oauth = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
        let flow = ConsentFlow::new(18434, Duration::from_secs(5)).without_browser();
        let manager = CredentialManager::with_parts(oauth, store, flow)
            .with_api_base_url(server.uri());

        let resolve = tokio::spawn(async move { manager.authorized_client(false).await.is_ok() });

        let mut stream = connect_with_retry("127.0.0.1:18434").await;
        stream
            .write_all(b"GET /oauth2callback?code=auth-code HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(resolve.await.unwrap());
        let persisted = CredentialStore::new(&credential_path).load().unwrap();
        assert_eq!(persisted.access_token, "token-3");
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn sign_out_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credential.json"));
        store.save(&stored("token-1", None)).unwrap();

        let oauth = OAuthClient::with_base_url("https://oauth.example", "id", "secret").unwrap();
        let manager = CredentialManager::with_parts(oauth, store, unpromptable_flow());

        assert!(manager.is_signed_in());
        assert_eq!(manager.sign_out().unwrap(), SignOut::Removed);
        assert!(!manager.is_signed_in());
        assert_eq!(manager.sign_out().unwrap(), SignOut::NotSignedIn);
    }

    #[tokio::test]
    async fn is_signed_in_ignores_expiry() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credential.json"));
        store.save(&stored("token-1", Some(0))).unwrap();

        let oauth = OAuthClient::with_base_url("https://oauth.example", "id", "secret").unwrap();
        let manager = CredentialManager::with_parts(oauth, store, unpromptable_flow());

        assert!(manager.is_signed_in());
    }

    async fn connect_with_retry(addr: &str) -> tokio::net::TcpStream {
        for _ in 0..50 {
            if let Ok(stream) = tokio::net::TcpStream::connect(addr).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("listener never came up on {addr}");
    }
}
