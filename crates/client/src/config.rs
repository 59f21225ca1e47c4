use std::path::PathBuf;
use std::time::Duration;

use kidneysphere_core::search::DEFAULT_DEBOUNCE_MS;

/// Default HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default interval between notification polls in `watch` mode.
const DEFAULT_WATCH_INTERVAL_SECS: u64 = 60;

/// Directory name used under `$HOME` when `KS_STATE_DIR` is unset.
const DEFAULT_STATE_DIR_NAME: &str = ".kidneysphere";

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a valid integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("SUPABASE_URL is not a valid URL: '{0}'")]
    InvalidUrl(String),
}

/// Client configuration loaded from environment variables.
///
/// An empty `SUPABASE_URL` or `SUPABASE_ANON_KEY` is not an error: the
/// aggregators report "not configured" instead of calling the backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project URL, e.g. `https://abc.supabase.co`, without a trailing slash.
    pub supabase_url: Option<String>,
    /// Public anon key sent as `apikey`.
    pub anon_key: Option<String>,
    /// Signed-in user's access token (JWT), if any.
    pub access_token: Option<String>,
    /// Directory holding the device-local watermark file.
    pub state_dir: PathBuf,
    /// Debounce window for keystroke-driven searches.
    pub debounce: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Poll interval for `watch`.
    pub watch_interval: Duration,
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                |
    /// |-------------------------|------------------------|
    /// | `SUPABASE_URL`          | unset (not configured) |
    /// | `SUPABASE_ANON_KEY`     | unset (not configured) |
    /// | `SUPABASE_ACCESS_TOKEN` | unset (signed out)     |
    /// | `KS_STATE_DIR`          | `$HOME/.kidneysphere`  |
    /// | `SEARCH_DEBOUNCE_MS`    | `260`                  |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                   |
    /// | `WATCH_INTERVAL_SECS`   | `60`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let supabase_url = match non_empty("SUPABASE_URL") {
            Some(url) => {
                reqwest::Url::parse(&url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
                Some(url.trim_end_matches('/').to_string())
            }
            None => None,
        };

        let state_dir = non_empty("KS_STATE_DIR")
            .map(PathBuf::from)
            .or_else(|| non_empty("HOME").map(|home| PathBuf::from(home).join(DEFAULT_STATE_DIR_NAME)))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR_NAME));

        let number = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match non_empty(var) {
                Some(value) => value
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { var, value }),
                None => Ok(default),
            }
        };

        Ok(Self {
            supabase_url,
            anon_key: non_empty("SUPABASE_ANON_KEY"),
            access_token: non_empty("SUPABASE_ACCESS_TOKEN"),
            state_dir,
            debounce: Duration::from_millis(number("SEARCH_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS)?),
            request_timeout: Duration::from_secs(number(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            watch_interval: Duration::from_secs(number(
                "WATCH_INTERVAL_SECS",
                DEFAULT_WATCH_INTERVAL_SECS,
            )?),
        })
    }

    /// Whether both the project URL and anon key are present.
    pub fn is_configured(&self) -> bool {
        self.supabase_url.is_some() && self.anon_key.is_some()
    }
}
