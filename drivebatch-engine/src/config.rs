use std::path::PathBuf;
use std::time::Duration;

/// Scopes requested during the consent flow. Drive access plus the
/// profile scopes the account picker needs.
pub const OAUTH_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/drive.readonly",
    "https://www.googleapis.com/auth/drive",
];

const DEFAULT_OAUTH_PORT: u16 = 3001;
const DEFAULT_OAUTH_TIMEOUT_SECS: u64 = 180;
const DEFAULT_PROGRESS_TICK_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Loopback port the registered redirect URI points at. Fixed per
    /// provider registration, not ephemeral.
    pub oauth_port: u16,
    pub oauth_timeout: Duration,
    pub credential_path: PathBuf,
    pub download_dir: PathBuf,
    pub progress_tick: Duration,
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let client_id = std::env::var("GOOGLE_CLIENT_ID").context("GOOGLE_CLIENT_ID is not set")?;
        let client_secret =
            std::env::var("GOOGLE_CLIENT_SECRET").context("GOOGLE_CLIENT_SECRET is not set")?;

        Ok(Self {
            client_id,
            client_secret,
            oauth_port: read_u16_env("DRIVEBATCH_OAUTH_PORT", DEFAULT_OAUTH_PORT),
            oauth_timeout: Duration::from_secs(read_u64_env(
                "DRIVEBATCH_OAUTH_TIMEOUT_SECS",
                DEFAULT_OAUTH_TIMEOUT_SECS,
            )),
            credential_path: std::env::var("DRIVEBATCH_CREDENTIAL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_credential_path()),
            download_dir: std::env::var("DRIVEBATCH_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_download_dir()),
            progress_tick: Duration::from_millis(read_u64_env(
                "DRIVEBATCH_PROGRESS_TICK_MS",
                DEFAULT_PROGRESS_TICK_MS,
            )),
        })
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/oauth2callback", self.oauth_port)
    }
}

pub fn default_credential_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("drivebatch")
        .join("credential.json")
}

pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("drivebatch")
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_u16_env(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
