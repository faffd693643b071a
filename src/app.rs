use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{InboxError, InboxResult};
use crate::sync::dedup::DEFAULT_DEDUP_WINDOW;
use crate::sync::poller::DEFAULT_POLL_INTERVAL;
use crate::utils::{derive_ws_url, normalize_url};

pub const CONFIG_FILE_NAME: &str = "fleet-inbox.toml";
pub const URL_ENV: &str = "FLEET_INBOX_URL";
pub const TOKEN_ENV: &str = "FLEET_INBOX_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    pub base_url: String,
    pub token: Option<String>,
    pub ws_url: Option<String>,
    pub poll_interval_ms: u64,
    pub dedup_window_ms: u64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            ws_url: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW.as_millis() as u64,
        }
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Settings from `path` (or the platform config dir), then the environment on top.
    pub fn load(path: Option<&Path>) -> Self {
        let state = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::load_from(&path),
            None => Self::new(),
        };
        state.with_overrides(
            std::env::var(URL_ENV).ok(),
            std::env::var(TOKEN_ENV).ok(),
        )
    }

    /// A missing or unreadable file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            return Self::new();
        };
        match toml::from_str::<AppState>(&text) {
            Ok(state) => state,
            Err(e) => {
                log::warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::new()
            }
        }
    }

    pub fn with_overrides(mut self, base_url: Option<String>, token: Option<String>) -> Self {
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            self.base_url = normalize_url(&url);
        }
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.token = Some(token);
        }
        self
    }

    pub fn save(&self, path: Option<&Path>) -> InboxResult<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::default_path)
            .ok_or_else(|| InboxError::Config("no config directory".into()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> InboxResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| InboxError::Config(e.to_string()))?;
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// Explicit `ws_url`, otherwise derived from `base_url`.
    pub fn push_url(&self) -> InboxResult<Url> {
        match self.ws_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => Ok(Url::parse(url.trim())?),
            None => derive_ws_url(&self.base_url),
        }
    }
}
