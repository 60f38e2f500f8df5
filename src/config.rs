use reqwest::Url;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_API_TIMEOUT: u64 = 30;
pub const DEFAULT_CONNECTION_TIMEOUT: u64 = 10;
pub const DEFAULT_TTS_RATE: u32 = 150;
pub const DEFAULT_TTS_VOLUME: f64 = 0.9;

/// Every key the loader understands. Anything else in the file is ignored.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "API_BASE_URL",
    "API_KEY",
    "API_SECRET",
    "DEBUG_MODE",
    "API_TIMEOUT",
    "CONNECTION_TIMEOUT",
    "TTS_RATE",
    "TTS_VOLUME",
    "CHAT_ENDPOINT",
    "HEALTH_ENDPOINT",
    "REQUEST_MESSAGE_FIELD",
    "RESPONSE_REPLY_FIELD",
    "CONTEXT_HISTORY",
    "APP_NAME",
    "APP_VERSION",
    "LOG_LEVEL",
    "LOG_DIR",
    "MAX_MESSAGE_LENGTH",
    "MAX_CHAT_HISTORY",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API_BASE_URL is not configured")]
    MissingBaseUrl,

    #[error("API_BASE_URL `{url}` is invalid: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to read config file {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Immutable application settings, resolved once at startup.
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub debug_mode: bool,
    /// Whole-request timeout in seconds.
    pub api_timeout: u64,
    /// TCP connect timeout in seconds.
    pub connection_timeout: u64,
    pub tts_rate: u32,
    pub tts_volume: f64,
    pub chat_endpoint: String,
    pub health_endpoint: String,
    /// JSON field the prompt is sent under.
    pub request_message_field: String,
    /// JSON field the reply is read from.
    pub response_reply_field: String,
    /// How many earlier transcript messages ride along as `context.history`.
    pub context_history: usize,
    pub app_name: String,
    pub app_version: String,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub max_message_length: usize,
    pub max_chat_history: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            api_secret: None,
            debug_mode: false,
            api_timeout: DEFAULT_API_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            tts_rate: DEFAULT_TTS_RATE,
            tts_volume: DEFAULT_TTS_VOLUME,
            chat_endpoint: "/chat".to_string(),
            health_endpoint: "/health".to_string(),
            request_message_field: "message".to_string(),
            response_reply_field: "reply".to_string(),
            context_history: 0,
            app_name: "AI Assistant".to_string(),
            app_version: "1.0.0".to_string(),
            log_level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            max_message_length: 5000,
            max_chat_history: 100,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Settings")
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("debug_mode", &self.debug_mode)
            .field("api_timeout", &self.api_timeout)
            .field("connection_timeout", &self.connection_timeout)
            .field("tts_rate", &self.tts_rate)
            .field("tts_volume", &self.tts_volume)
            .field("chat_endpoint", &self.chat_endpoint)
            .field("health_endpoint", &self.health_endpoint)
            .field("request_message_field", &self.request_message_field)
            .field("response_reply_field", &self.response_reply_field)
            .field("context_history", &self.context_history)
            .field("app_name", &self.app_name)
            .field("app_version", &self.app_version)
            .field("log_level", &self.log_level)
            .field("log_dir", &self.log_dir)
            .field("max_message_length", &self.max_message_length)
            .field("max_chat_history", &self.max_chat_history)
            .finish()
    }
}

impl Settings {
    /// Load settings from an env file, letting process environment variables
    /// override file values for recognized keys.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like [`Settings::load`], with the environment lookup supplied by the caller.
    pub fn load_with<F>(path: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut pairs: Vec<(String, String)> = match dotenvy::from_path_iter(path) {
            Ok(iter) => iter
                .collect::<Result<_, _>>()
                .map_err(|source| ConfigError::File {
                    path: path.to_path_buf(),
                    source,
                })?,
            Err(e) if e.not_found() => {
                info!("No config file at {}, using defaults", path.display());
                Vec::new()
            }
            Err(source) => {
                return Err(ConfigError::File {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        // Later pairs win, so the environment goes last
        for key in RECOGNIZED_KEYS {
            if let Some(value) = env(key) {
                pairs.push((key.to_string(), value));
            }
        }

        Self::from_pairs(pairs)
    }

    /// Build settings from raw key/value pairs, applying defaults and coercion,
    /// then validate the base URL.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Settings::default();
        let defaults = Settings::default();

        for (key, value) in pairs {
            let key = key.as_ref().trim();
            let value = value.as_ref().trim();
            match key {
                "API_BASE_URL" => settings.api_base_url = value.to_string(),
                "API_KEY" => settings.api_key = non_empty(value),
                "API_SECRET" => settings.api_secret = non_empty(value),
                "DEBUG_MODE" => settings.debug_mode = parse_bool(key, value, defaults.debug_mode),
                "API_TIMEOUT" => {
                    settings.api_timeout = parse_timeout(key, value, defaults.api_timeout)
                }
                "CONNECTION_TIMEOUT" => {
                    settings.connection_timeout =
                        parse_timeout(key, value, defaults.connection_timeout)
                }
                "TTS_RATE" => settings.tts_rate = parse_or(key, value, defaults.tts_rate),
                "TTS_VOLUME" => {
                    settings.tts_volume = parse_or::<f64>(key, value, defaults.tts_volume);
                    if !settings.tts_volume.is_finite() {
                        warn!("{} is not finite, using {}", key, defaults.tts_volume);
                        settings.tts_volume = defaults.tts_volume;
                    }
                }
                "CHAT_ENDPOINT" => settings.chat_endpoint = value.to_string(),
                "HEALTH_ENDPOINT" => settings.health_endpoint = value.to_string(),
                "REQUEST_MESSAGE_FIELD" => {
                    settings.request_message_field =
                        non_empty(value).unwrap_or(defaults.request_message_field.clone())
                }
                "RESPONSE_REPLY_FIELD" => {
                    settings.response_reply_field =
                        non_empty(value).unwrap_or(defaults.response_reply_field.clone())
                }
                "CONTEXT_HISTORY" => {
                    settings.context_history = parse_or(key, value, defaults.context_history)
                }
                "APP_NAME" => settings.app_name = value.to_string(),
                "APP_VERSION" => settings.app_version = value.to_string(),
                "LOG_LEVEL" => {
                    settings.log_level =
                        non_empty(value).map_or(defaults.log_level.clone(), |v| v.to_lowercase())
                }
                "LOG_DIR" => {
                    if !value.is_empty() {
                        settings.log_dir = PathBuf::from(value);
                    }
                }
                "MAX_MESSAGE_LENGTH" => {
                    settings.max_message_length =
                        parse_or(key, value, defaults.max_message_length)
                }
                "MAX_CHAT_HISTORY" => {
                    settings.max_chat_history = parse_or(key, value, defaults.max_chat_history)
                }
                other => debug!("Ignoring unrecognized config key {}", other),
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }

        let url = Url::parse(&self.api_base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.api_base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.api_base_url.clone(),
                reason: "must start with http:// or https://".to_string(),
            });
        }

        Ok(())
    }

    /// Join the base URL and an endpoint path with exactly one `/`.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    pub fn chat_url(&self) -> String {
        self.endpoint_url(&self.chat_endpoint)
    }

    pub fn health_url(&self) -> String {
        self.endpoint_url(&self.health_endpoint)
    }

    /// `Authorization` header name and value, when an API key is configured.
    pub fn auth_header(&self) -> Option<(&'static str, String)> {
        self.api_key
            .as_ref()
            .map(|key| ("Authorization", format!("Bearer {}", key)))
    }

    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.app_name, self.app_version)
    }

    /// Copy with credentials masked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "<redacted>".to_string());
        Self {
            api_key: mask(&self.api_key),
            api_secret: mask(&self.api_secret),
            ..self.clone()
        }
    }

    /// Serialize recognized keys back into env-file text. Unset optional keys
    /// are left out.
    pub fn to_env_string(&self) -> String {
        let mut lines = vec![("API_BASE_URL", self.api_base_url.clone())];
        if let Some(ref key) = self.api_key {
            lines.push(("API_KEY", key.clone()));
        }
        if let Some(ref secret) = self.api_secret {
            lines.push(("API_SECRET", secret.clone()));
        }
        lines.extend([
            ("DEBUG_MODE", self.debug_mode.to_string()),
            ("API_TIMEOUT", self.api_timeout.to_string()),
            ("CONNECTION_TIMEOUT", self.connection_timeout.to_string()),
            ("TTS_RATE", self.tts_rate.to_string()),
            ("TTS_VOLUME", self.tts_volume.to_string()),
            ("CHAT_ENDPOINT", self.chat_endpoint.clone()),
            ("HEALTH_ENDPOINT", self.health_endpoint.clone()),
            ("REQUEST_MESSAGE_FIELD", self.request_message_field.clone()),
            ("RESPONSE_REPLY_FIELD", self.response_reply_field.clone()),
            ("CONTEXT_HISTORY", self.context_history.to_string()),
            ("APP_NAME", self.app_name.clone()),
            ("APP_VERSION", self.app_version.clone()),
            ("LOG_LEVEL", self.log_level.clone()),
            ("LOG_DIR", self.log_dir.display().to_string()),
            ("MAX_MESSAGE_LENGTH", self.max_message_length.to_string()),
            ("MAX_CHAT_HISTORY", self.max_chat_history.to_string()),
        ]);

        lines
            .into_iter()
            .map(|(key, value)| format!("{}={}\n", key, quote(&value)))
            .collect()
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_bool(key: &str, value: &str, default: bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "true" => true,
        "false" => false,
        _ => {
            warn!("{}={:?} is not true/false, using {}", key, value, default);
            default
        }
    }
}

fn parse_or<T>(key: &str, value: &str, default: T) -> T
where
    T: std::str::FromStr + fmt::Display,
{
    value.parse().unwrap_or_else(|_| {
        warn!("{}={:?} could not be parsed, using {}", key, value, default);
        default
    })
}

fn parse_timeout(key: &str, value: &str, default: u64) -> u64 {
    match parse_or(key, value, default) {
        0 => {
            warn!("{} must be positive, using {}", key, default);
            default
        }
        secs => secs,
    }
}

/// Double-quote values that plain dotenv syntax would not carry verbatim.
fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '\\' | '$' | '`'));
    if plain {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' | '$' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_with(&dir.path().join(".env"), no_env).unwrap();

        assert_eq!(settings.api_base_url, "http://localhost:5000/api");
        assert_eq!(settings.api_timeout, 30);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn unset_timeout_uses_default() {
        let file = env_file("API_BASE_URL=http://x/api\n");
        let settings = Settings::load_with(file.path(), no_env).unwrap();
        assert_eq!(settings.api_timeout, DEFAULT_API_TIMEOUT);
    }

    #[test]
    fn parses_recognized_keys_and_ignores_the_rest() {
        let file = env_file(
            "# backend\n\
             API_BASE_URL=https://ai.example.com/v1\n\
             API_KEY=sk-123\n\
             DEBUG_MODE=TRUE\n\
             API_TIMEOUT=45\n\
             TTS_RATE=180\n\
             TTS_VOLUME=0.5\n\
             WINDOW_WIDTH=1000\n",
        );
        let settings = Settings::load_with(file.path(), no_env).unwrap();

        assert_eq!(settings.api_base_url, "https://ai.example.com/v1");
        assert_eq!(settings.api_key.as_deref(), Some("sk-123"));
        assert!(settings.debug_mode);
        assert_eq!(settings.api_timeout, 45);
        assert_eq!(settings.tts_rate, 180);
        assert_eq!(settings.tts_volume, 0.5);
    }

    #[test]
    fn bad_values_fall_back_to_defaults() {
        let settings = Settings::from_pairs([
            ("DEBUG_MODE", "yes"),
            ("API_TIMEOUT", "soon"),
            ("CONNECTION_TIMEOUT", "0"),
            ("TTS_RATE", "-3"),
            ("TTS_VOLUME", "loud"),
        ])
        .unwrap();

        assert!(!settings.debug_mode);
        assert_eq!(settings.api_timeout, 30);
        assert_eq!(settings.connection_timeout, 10);
        assert_eq!(settings.tts_rate, 150);
        assert_eq!(settings.tts_volume, 0.9);
    }

    #[test]
    fn empty_api_key_counts_as_unset() {
        let settings = Settings::from_pairs([("API_KEY", "")]).unwrap();
        assert_eq!(settings.api_key, None);
        assert_eq!(settings.auth_header(), None);
    }

    #[test]
    fn base_url_without_key_targets_joined_endpoint() {
        let file = env_file("API_BASE_URL=http://x/api\n");
        let settings = Settings::load_with(file.path(), no_env).unwrap();

        assert_eq!(settings.auth_header(), None);
        assert_eq!(settings.chat_url(), "http://x/api/chat");
        assert_eq!(settings.endpoint_url("status"), "http://x/api/status");
        assert_eq!(settings.health_url(), "http://x/api/health");
    }

    #[test]
    fn trailing_slash_is_not_doubled() {
        let settings = Settings::from_pairs([("API_BASE_URL", "http://x/api/")]).unwrap();
        assert_eq!(settings.chat_url(), "http://x/api/chat");
    }

    #[test]
    fn auth_header_uses_bearer_scheme() {
        let settings = Settings::from_pairs([("API_KEY", "abc")]).unwrap();
        assert_eq!(
            settings.auth_header(),
            Some(("Authorization", "Bearer abc".to_string()))
        );
    }

    #[test]
    fn empty_base_url_is_a_startup_error() {
        let err = Settings::from_pairs([("API_BASE_URL", "")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingBaseUrl));
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let err = Settings::from_pairs([("API_BASE_URL", "ftp://x/api")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl { .. }));

        let err = Settings::from_pairs([("API_BASE_URL", "not a url")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn environment_overrides_file() {
        let file = env_file("API_BASE_URL=http://file/api\nAPI_TIMEOUT=12\n");
        let settings = Settings::load_with(file.path(), |key| match key {
            "API_BASE_URL" => Some("http://env/api".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(settings.api_base_url, "http://env/api");
        assert_eq!(settings.api_timeout, 12);
    }

    #[test]
    fn serialized_settings_load_back_equal() {
        let original = Settings::from_pairs([
            ("API_BASE_URL", "https://ai.example.com/api"),
            ("API_KEY", "key with spaces#and\"quotes\""),
            ("API_SECRET", "s3cr$t"),
            ("DEBUG_MODE", "true"),
            ("API_TIMEOUT", "7"),
            ("TTS_VOLUME", "0.25"),
            ("APP_NAME", "My Assistant"),
            ("LOG_DIR", "/var/log/assistant"),
            ("CONTEXT_HISTORY", "4"),
        ])
        .unwrap();

        let file = env_file(&original.to_env_string());
        let reloaded = Settings::load_with(file.path(), no_env).unwrap();

        assert_eq!(reloaded, original);
    }

    #[test]
    fn redacted_copy_masks_credentials_only() {
        let settings = Settings::from_pairs([("API_KEY", "sk-live"), ("API_TIMEOUT", "9")]).unwrap();
        let shown = settings.redacted();

        assert_eq!(shown.api_key.as_deref(), Some("<redacted>"));
        assert_eq!(shown.api_secret, None);
        assert_eq!(shown.api_timeout, 9);
        assert!(!shown.to_env_string().contains("sk-live"));
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let settings = Settings::from_pairs([("API_KEY", "sk-live"), ("API_SECRET", "hush")]).unwrap();
        let rendered = format!("{:?}", settings);

        assert!(!rendered.contains("sk-live"));
        assert!(!rendered.contains("hush"));
        assert!(rendered.contains("<redacted>"));
    }
}
