//! Runtime configuration loaded from the environment.
//!
//! Values come from process environment variables. The binary seeds them
//! from a `.env` file via `dotenvy` before parsing its arguments. Every field
//! has a default except the upload endpoint, which the binary requires.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default storage prefix that upload URLs are expected to start with.
pub const DEFAULT_STORAGE_URL_PREFIX: &str = "https://mega.nz/file/";

/// Default text sent to the paired account once the connection opens.
pub const DEFAULT_NOTICE_TEXT: &str =
    "Thank you for using our bot. Don't share your session ID.";

/// Default image attached to the session id message.
pub const DEFAULT_SESSION_IMAGE_URL: &str = "https://cdn.ironman.my.id/i/2iceb4.jpeg";

/// Browser identity announced to the protocol (platform, browser).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserIdentity {
    pub platform: String,
    pub browser: String,
}

impl Default for BrowserIdentity {
    fn default() -> Self {
        Self {
            platform: "macOS".to_string(),
            browser: "Safari".to_string(),
        }
    }
}

/// Timing knobs for the pairing flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delays {
    /// Wait before requesting a pairing code.
    pub pairing_settle: Duration,
    /// Wait after the connection opens before sending anything.
    pub open_settle: Duration,
    /// Wait after export before deleting the credentials directory.
    pub cleanup: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            pairing_settle: Duration::from_millis(1500),
            open_settle: Duration::from_millis(5000),
            cleanup: Duration::from_millis(1000),
        }
    }
}

impl Delays {
    /// All delays zero. Used by tests.
    pub fn none() -> Self {
        Self {
            pairing_settle: Duration::ZERO,
            open_settle: Duration::ZERO,
            cleanup: Duration::ZERO,
        }
    }
}

/// Settings for exporting the credential bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    /// Prepended to the storage identifier to form the session id.
    pub session_prefix: String,
    /// Upload URLs must contain this prefix for the id to be extracted.
    pub storage_url_prefix: String,
    /// Image sent alongside the session id caption.
    pub image_url: String,
    /// Notice sent before the session id message.
    pub notice_text: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            session_prefix: "pairlink~".to_string(),
            storage_url_prefix: DEFAULT_STORAGE_URL_PREFIX.to_string(),
            image_url: DEFAULT_SESSION_IMAGE_URL.to_string(),
            notice_text: DEFAULT_NOTICE_TEXT.to_string(),
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Root under which each pairing attempt gets its own directory.
    pub session_root: PathBuf,
    /// Directory holding `index.html` and other static assets.
    pub public_dir: PathBuf,
    /// Endpoint accepting multipart credential uploads.
    pub upload_url: Option<String>,
    /// WebSocket URL of the protocol bridge.
    pub bridge_url: String,
    pub browser: BrowserIdentity,
    pub export: ExportConfig,
    pub delays: Delays,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            session_root: PathBuf::from("./session"),
            public_dir: PathBuf::from("public"),
            upload_url: None,
            bridge_url: "ws://127.0.0.1:8787".to_string(),
            browser: BrowserIdentity::default(),
            export: ExportConfig::default(),
            delays: Delays::default(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let delays = Delays {
            pairing_settle: parse_millis(&get, "PAIRING_SETTLE_MS")?
                .unwrap_or(defaults.delays.pairing_settle),
            open_settle: parse_millis(&get, "OPEN_SETTLE_MS")?
                .unwrap_or(defaults.delays.open_settle),
            cleanup: parse_millis(&get, "CLEANUP_DELAY_MS")?.unwrap_or(defaults.delays.cleanup),
        };

        let upload_url = match get("UPLOAD_URL") {
            Some(raw) => Some(validate_url("UPLOAD_URL", &raw, &["http", "https"])?),
            None => None,
        };
        let bridge_url = match get("BRIDGE_URL") {
            Some(raw) => validate_url("BRIDGE_URL", &raw, &["ws", "wss"])?,
            None => defaults.bridge_url,
        };

        let export = ExportConfig {
            session_prefix: get("SESSION_PREFIX").unwrap_or(defaults.export.session_prefix),
            storage_url_prefix: get("STORAGE_URL_PREFIX")
                .unwrap_or(defaults.export.storage_url_prefix),
            image_url: get("SESSION_IMAGE_URL").unwrap_or(defaults.export.image_url),
            notice_text: get("NOTICE_TEXT").unwrap_or(defaults.export.notice_text),
        };

        Ok(Self {
            host: parse_value(&get, "HOST")?.unwrap_or(defaults.host),
            port: parse_value(&get, "PORT")?.unwrap_or(defaults.port),
            session_root: get("SESSION_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_root),
            public_dir: get("PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.public_dir),
            upload_url,
            bridge_url,
            browser: defaults.browser,
            export,
            delays,
        })
    }

    /// The socket address the HTTP server binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// The upload endpoint, or an error naming the missing variable.
    pub fn require_upload_url(&self) -> Result<&str, ConfigError> {
        self.upload_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("UPLOAD_URL".to_string()))
    }
}

fn parse_value<T, F>(get: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("{raw:?}: {e}"),
                })
        })
        .transpose()
}

fn parse_millis<F>(get: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_value::<u64, F>(get, key)?.map(Duration::from_millis))
}

fn validate_url(key: &str, raw: &str, schemes: &[&str]) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!(
                "scheme {} not allowed, expected one of {}",
                parsed.scheme(),
                schemes.join(", ")
            ),
        });
    }
    Ok(raw.trim().to_string())
}
