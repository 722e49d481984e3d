//! Configuration loading and validation.
//!
//! The configuration document is read once at process start, either as TOML
//! or JSON depending on the file extension. Parsing happens in two phases:
//! serde fills permissive raw records, then [`AppConfig::from_raw`] validates
//! every user and source and produces the strongly typed [`AppConfig`]. Any
//! problem is reported as a [`ConfigError`] naming the offending path and
//! field, so a bad document never reaches the pipeline.
//!
//! ## Environment overrides
//! - `DIGEST_SUMMARIZER_KEY`: replaces `summarizer_key`
//! - `DIGEST_EMAIL_SECRET`: replaces `email_sender.secret`

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use email_delivery::SmtpSenderConfig;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_WINDOW_DAYS: u32 = 30;
pub const DEFAULT_GOOGLE_CREDENTIALS: &str = "credentials.json";
pub const DEFAULT_GOOGLE_TOKEN: &str = "token.json";
pub const DEFAULT_GOOGLE_CALENDAR: &str = "primary";

/// Value shipped in sample configs; treated as "no key configured".
pub const SUMMARIZER_KEY_PLACEHOLDER: &str = "YOUR_GEMINI_API_KEY";

pub const SUMMARIZER_KEY_ENV: &str = "DIGEST_SUMMARIZER_KEY";
pub const EMAIL_SECRET_ENV: &str = "DIGEST_EMAIL_SECRET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {format} config: {message}")]
    Parse { format: &'static str, message: String },

    #[error(
        "unsupported config format for {path} (expected .toml or .json; convert a YAML config by keeping the same keys)"
    )]
    UnsupportedFormat { path: PathBuf },

    #[error("{path}: missing required field `{field}`")]
    MissingField { path: String, field: &'static str },

    #[error("{path}: unknown source type `{kind}`")]
    UnknownSourceType { path: String, kind: String },

    #[error("{path}: invalid value for `{field}`: {reason}")]
    InvalidValue {
        path: String,
        field: &'static str,
        reason: String,
    },
}

/// A credential that must never show up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleSource {
    pub name: String,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub calendar_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaldavSource {
    pub name: String,
    pub username: String,
    pub secret: Secret,
    pub server_url: Option<Url>,
    pub target_calendar_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSource {
    pub name: String,
    pub api_key: Secret,
    pub api_token: Secret,
    pub board_id: String,
}

/// One configured source, tagged by kind. The kind never changes after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    Google(GoogleSource),
    Caldav(CaldavSource),
    Board(BoardSource),
}

impl SourceDescriptor {
    pub fn name(&self) -> &str {
        match self {
            SourceDescriptor::Google(source) => &source.name,
            SourceDescriptor::Caldav(source) => &source.name,
            SourceDescriptor::Board(source) => &source.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceDescriptor::Google(_) => "google",
            SourceDescriptor::Caldav(_) => "caldav",
            SourceDescriptor::Board(_) => "board",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub name: String,
    pub notify_address: Option<String>,
    pub window_days: u32,
    pub sources: Vec<SourceDescriptor>,
}

impl UserProfile {
    /// Sources in configuration order, optionally narrowed to one name.
    /// Duplicate names are all returned.
    pub fn select_sources(&self, name_filter: Option<&str>) -> Vec<&SourceDescriptor> {
        self.sources
            .iter()
            .filter(|source| name_filter.map_or(true, |name| source.name() == name))
            .collect()
    }
}

/// The email sender block as written; any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailSenderConfig {
    pub address: Option<String>,
    pub secret: Option<Secret>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl EmailSenderConfig {
    /// SMTP settings when every field is present, `None` otherwise.
    pub fn smtp_settings(&self) -> Option<SmtpSenderConfig> {
        let address = self.address.as_ref().filter(|v| !v.trim().is_empty())?;
        let secret = self.secret.as_ref().filter(|v| !v.expose().is_empty())?;
        let host = self.host.as_ref().filter(|v| !v.trim().is_empty())?;
        let port = self.port.filter(|port| *port > 0)?;

        Some(SmtpSenderConfig {
            address: address.clone(),
            secret: secret.expose().to_string(),
            host: host.clone(),
            port,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub email_sender: Option<EmailSenderConfig>,
    pub summarizer_key: Option<Secret>,
    pub users: Vec<UserProfile>,
}

impl AppConfig {
    /// Read, parse, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        if !matches!(extension.as_deref(), Some("toml") | Some("json")) {
            return Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = match extension.as_deref() {
            Some("json") => Self::from_json_str(&content)?,
            _ => Self::from_toml_str(&content)?,
        };
        config.apply_overrides(|key| std::env::var(key).ok());

        info!(
            "Configuration loaded and validated: {} user(s)",
            config.users.len()
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            format: "TOML",
            message: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            format: "JSON",
            message: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    /// Replace secrets from the environment (or any lookup, for tests).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(SUMMARIZER_KEY_ENV) {
            debug!("Summarizer key overridden from {}", SUMMARIZER_KEY_ENV);
            self.summarizer_key = normalize_summarizer_key(Some(key));
        }
        if let Some(secret) = lookup(EMAIL_SECRET_ENV) {
            debug!("Email sender secret overridden from {}", EMAIL_SECRET_ENV);
            self.email_sender
                .get_or_insert_with(EmailSenderConfig::default)
                .secret = Some(Secret::new(secret));
        }
    }

    pub fn find_user(&self, name: &str) -> Option<&UserProfile> {
        self.users.iter().find(|user| user.name == name)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let summarizer_key = normalize_summarizer_key(
            raw.summarizer_key
                .or_else(|| raw.llm.and_then(|llm| llm.api_key)),
        );

        let email_sender = raw.email_sender.map(|sender| EmailSenderConfig {
            address: sender.address,
            secret: sender.secret.map(Secret::new),
            host: sender.host,
            port: sender.port,
        });

        let users = raw
            .users
            .into_iter()
            .enumerate()
            .map(|(index, user)| validate_user(index, user))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        for (index, user) in users.iter().enumerate() {
            if !seen.insert(user.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    path: format!("users[{}]", index),
                    field: "name",
                    reason: format!("duplicate user name '{}'", user.name),
                });
            }
        }

        Ok(Self {
            email_sender,
            summarizer_key,
            users,
        })
    }
}

fn normalize_summarizer_key(key: Option<String>) -> Option<Secret> {
    key.map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty() && key != SUMMARIZER_KEY_PLACEHOLDER)
        .map(Secret::new)
}

fn validate_user(index: usize, raw: RawUser) -> Result<UserProfile, ConfigError> {
    let path = format!("users[{}]", index);

    let name = required(raw.name, &path, "name")?.trim().to_string();

    let notify_address = match raw.notify_address.map(|addr| addr.trim().to_string()) {
        Some(address) if address.is_empty() => None,
        Some(address) => {
            if !looks_like_address(&address) {
                return Err(ConfigError::InvalidValue {
                    path,
                    field: "notify_address",
                    reason: format!("'{}' is not an email address", address),
                });
            }
            Some(address)
        }
        None => None,
    };

    let window_days = match raw.window_days {
        None => DEFAULT_WINDOW_DAYS,
        Some(days) if days > 0 => u32::try_from(days).map_err(|_| ConfigError::InvalidValue {
            path: path.clone(),
            field: "window_days",
            reason: format!("{} is too large", days),
        })?,
        Some(days) => {
            return Err(ConfigError::InvalidValue {
                path,
                field: "window_days",
                reason: format!("must be greater than 0, got {}", days),
            })
        }
    };

    let sources = raw
        .sources
        .into_iter()
        .enumerate()
        .map(|(source_index, source)| {
            validate_source(&format!("{}.sources[{}]", path, source_index), source)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(UserProfile {
        name,
        notify_address,
        window_days,
        sources,
    })
}

fn validate_source(path: &str, raw: RawSource) -> Result<SourceDescriptor, ConfigError> {
    let kind = required(raw.kind, path, "type")?.trim().to_ascii_lowercase();
    let name = required(raw.name, path, "name")?.trim().to_string();

    match kind.as_str() {
        "google" => {
            let credentials_path =
                optional_non_empty(raw.credentials_path, path, "credentials_path")?
                    .unwrap_or_else(|| DEFAULT_GOOGLE_CREDENTIALS.to_string());
            let token_path = optional_non_empty(raw.token_path, path, "token_path")?
                .unwrap_or_else(|| DEFAULT_GOOGLE_TOKEN.to_string());

            let calendar_ids = match raw.calendar_ids {
                None => vec![DEFAULT_GOOGLE_CALENDAR.to_string()],
                Some(ids) if ids.is_empty() => vec![DEFAULT_GOOGLE_CALENDAR.to_string()],
                Some(ids) => {
                    if ids.iter().any(|id| id.trim().is_empty()) {
                        return Err(ConfigError::InvalidValue {
                            path: path.to_string(),
                            field: "calendar_ids",
                            reason: "calendar ids must not be empty".to_string(),
                        });
                    }
                    ids
                }
            };

            Ok(SourceDescriptor::Google(GoogleSource {
                name,
                credentials_path: PathBuf::from(credentials_path),
                token_path: PathBuf::from(token_path),
                calendar_ids,
            }))
        }
        "caldav" | "apple" => {
            let username = required(raw.username, path, "username")?;
            let secret = required(raw.secret, path, "secret")?;

            let server_url = match optional_non_empty(raw.server_url, path, "server_url")? {
                Some(value) => Some(parse_http_url(&value, path)?),
                None => None,
            };
            let target_calendar_name =
                optional_non_empty(raw.target_calendar_name, path, "target_calendar_name")?;

            Ok(SourceDescriptor::Caldav(CaldavSource {
                name,
                username,
                secret: Secret::new(secret),
                server_url,
                target_calendar_name,
            }))
        }
        "board" | "trello" => Ok(SourceDescriptor::Board(BoardSource {
            name,
            api_key: Secret::new(required(raw.api_key, path, "api_key")?),
            api_token: Secret::new(required(raw.api_token, path, "api_token")?),
            board_id: required(raw.board_id, path, "board_id")?.trim().to_string(),
        })),
        _ => Err(ConfigError::UnknownSourceType {
            path: path.to_string(),
            kind,
        }),
    }
}

fn required(value: Option<String>, path: &str, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingField {
            path: path.to_string(),
            field,
        }),
    }
}

/// Absent is fine; present-but-blank is rejected.
fn optional_non_empty(
    value: Option<String>,
    path: &str,
    field: &'static str,
) -> Result<Option<String>, ConfigError> {
    match value {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Err(ConfigError::InvalidValue {
            path: path.to_string(),
            field,
            reason: "must not be empty".to_string(),
        }),
        Some(value) => Ok(Some(value.trim().to_string())),
    }
}

fn parse_http_url(value: &str, path: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        path: path.to_string(),
        field: "server_url",
        reason: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidValue {
            path: path.to_string(),
            field: "server_url",
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

fn looks_like_address(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !address.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    email_sender: Option<RawEmailSender>,
    #[serde(default)]
    summarizer_key: Option<String>,
    #[serde(default)]
    llm: Option<RawLlm>,
    #[serde(default)]
    users: Vec<RawUser>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLlm {
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEmailSender {
    #[serde(default, alias = "email")]
    address: Option<String>,
    #[serde(default, alias = "password")]
    secret: Option<String>,
    #[serde(default, alias = "smtp_server")]
    host: Option<String>,
    #[serde(default, alias = "smtp_port")]
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "report_to_email")]
    notify_address: Option<String>,
    #[serde(default, alias = "days_to_fetch")]
    window_days: Option<i64>,
    #[serde(default, alias = "calendars")]
    sources: Vec<RawSource>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSource {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    credentials_path: Option<String>,
    #[serde(default)]
    token_path: Option<String>,
    #[serde(default)]
    calendar_ids: Option<Vec<String>>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, alias = "password")]
    secret: Option<String>,
    #[serde(default, alias = "url")]
    server_url: Option<String>,
    #[serde(default, alias = "calendar_name")]
    target_calendar_name: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    api_token: Option<String>,
    #[serde(default)]
    board_id: Option<String>,
}
