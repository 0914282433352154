//! Configuration for the concierge pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CONCIERGE_HOME, CONCIERGE_DB, vendor API keys)
//! 2. Config file (.concierge/config.yaml)
//! 3. Defaults (~/.concierge)
//!
//! Config file discovery:
//! - Searches current directory and parents for .concierge/config.yaml
//! - Relative paths in the config file resolve against its parent directory
//!
//! Everything, secrets included, is resolved once at load time. Adapters get
//! their settings at construction and never read the environment themselves.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub transcription: Option<TranscriptionConfig>,
    #[serde(default)]
    pub extraction: Option<ExtractionConfig>,
    #[serde(default)]
    pub messaging: Option<MessagingConfig>,
    #[serde(default)]
    pub materialization: Option<MaterializationConfig>,
    #[serde(default)]
    pub http: Option<HttpConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to config file)
    pub home: Option<String>,
    /// SQLite database file (relative to config file)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionConfig {
    pub vendor: Option<TranscriptionVendor>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub api_key: Option<String>,
    /// Basic-auth credentials for fetching provider-hosted recordings
    pub recording_username: Option<String>,
    pub recording_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub vendor: Option<ExtractionVendor>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    pub vendor: Option<MessagingVendor>,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaterializationConfig {
    pub confidence_threshold: Option<f64>,
    pub event_duration_minutes: Option<u32>,
    pub reextract_on_retry: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionVendor {
    Whisper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionVendor {
    Openai,
    Gemini,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagingVendor {
    Twilio,
    None,
}

/// Resolved configuration with absolute paths and secrets filled in
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the state directory
    pub home: PathBuf,
    /// SQLite database path
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub transcription: TranscriptionSettings,
    pub extraction: ExtractionSettings,
    pub messaging: MessagingSettings,
    pub materialization: MaterializationSettings,
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct TranscriptionSettings {
    pub vendor: TranscriptionVendor,
    pub model: String,
    pub language: Option<String>,
    pub api_key: Option<String>,
    pub recording_username: Option<String>,
    pub recording_password: Option<String>,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            vendor: TranscriptionVendor::Whisper,
            model: "whisper-1".to_string(),
            language: None,
            api_key: None,
            recording_username: None,
            recording_password: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub vendor: ExtractionVendor,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            vendor: ExtractionVendor::Openai,
            model: default_extraction_model(ExtractionVendor::Openai).to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessagingSettings {
    pub vendor: MessagingVendor,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            vendor: MessagingVendor::None,
            account_sid: None,
            auth_token: None,
            from_number: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterializationSettings {
    /// Drafts must score strictly above this to drive automatic action
    pub confidence_threshold: f64,
    pub event_duration_minutes: u32,
    /// Re-run extraction when a record already holds a draft
    pub reextract_on_retry: bool,
}

impl Default for MaterializationSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            event_duration_minutes: 60,
            reextract_on_retry: true,
        }
    }
}

fn default_extraction_model(vendor: ExtractionVendor) -> &'static str {
    match vendor {
        ExtractionVendor::Openai => "gpt-4o-mini",
        ExtractionVendor::Gemini => "gemini-1.5-flash",
    }
}

/// Environment lookups, injectable for tests
trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".concierge").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn parse_config(content: &str) -> Result<ConfigFile> {
    Ok(serde_yaml::from_str(content)?)
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Merge file settings, environment and defaults
fn resolve(
    file: ConfigFile,
    config_file: Option<PathBuf>,
    default_home: PathBuf,
    env: &dyn Env,
) -> Result<ResolvedConfig> {
    // Paths in the file are relative to the .concierge/ directory
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);

    let home = if let Some(env_home) = env.var("CONCIERGE_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(dir), Some(home)) = (&config_dir, &file.paths.home) {
        resolve_path(dir, home)
    } else {
        default_home
    };

    let database = if let Some(env_db) = env.var("CONCIERGE_DB") {
        PathBuf::from(env_db)
    } else if let (Some(dir), Some(db)) = (&config_dir, &file.paths.database) {
        resolve_path(dir, db)
    } else {
        home.join("concierge.db")
    };

    let transcription = match file.transcription {
        Some(t) => TranscriptionSettings {
            vendor: t.vendor.unwrap_or(TranscriptionVendor::Whisper),
            model: t.model.unwrap_or_else(|| "whisper-1".to_string()),
            language: t.language,
            api_key: t.api_key.or_else(|| env.var("OPENAI_API_KEY")),
            recording_username: t
                .recording_username
                .or_else(|| env.var("TWILIO_ACCOUNT_SID")),
            recording_password: t
                .recording_password
                .or_else(|| env.var("TWILIO_AUTH_TOKEN")),
        },
        None => TranscriptionSettings {
            api_key: env.var("OPENAI_API_KEY"),
            recording_username: env.var("TWILIO_ACCOUNT_SID"),
            recording_password: env.var("TWILIO_AUTH_TOKEN"),
            ..Default::default()
        },
    };

    let extraction = {
        let raw = file.extraction.unwrap_or(ExtractionConfig {
            vendor: None,
            model: None,
            api_key: None,
        });
        let vendor = raw.vendor.unwrap_or(ExtractionVendor::Openai);
        let key_var = match vendor {
            ExtractionVendor::Openai => "OPENAI_API_KEY",
            ExtractionVendor::Gemini => "GEMINI_API_KEY",
        };
        ExtractionSettings {
            vendor,
            model: raw
                .model
                .unwrap_or_else(|| default_extraction_model(vendor).to_string()),
            api_key: raw.api_key.or_else(|| env.var(key_var)),
        }
    };

    let messaging = match file.messaging {
        Some(m) => MessagingSettings {
            vendor: m.vendor.unwrap_or(MessagingVendor::Twilio),
            account_sid: m.account_sid.or_else(|| env.var("TWILIO_ACCOUNT_SID")),
            auth_token: m.auth_token.or_else(|| env.var("TWILIO_AUTH_TOKEN")),
            from_number: m.from_number.or_else(|| env.var("TWILIO_FROM_NUMBER")),
        },
        None => MessagingSettings::default(),
    };

    let defaults = MaterializationSettings::default();
    let materialization = match file.materialization {
        Some(m) => MaterializationSettings {
            confidence_threshold: m
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            event_duration_minutes: m
                .event_duration_minutes
                .unwrap_or(defaults.event_duration_minutes),
            reextract_on_retry: m.reextract_on_retry.unwrap_or(defaults.reextract_on_retry),
        },
        None => defaults,
    };

    if !(0.0..=1.0).contains(&materialization.confidence_threshold) {
        anyhow::bail!(
            "materialization.confidence_threshold must be within 0..=1, got {}",
            materialization.confidence_threshold
        );
    }

    let http_timeout_seconds = file
        .http
        .and_then(|h| h.timeout_seconds)
        .unwrap_or(60);

    Ok(ResolvedConfig {
        home,
        database,
        config_file,
        transcription,
        extraction,
        messaging,
        materialization,
        http_timeout_seconds,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".concierge");

    let config_file = find_config_file();
    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    resolve(file, config_file, default_home, &ProcessEnv)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

impl ResolvedConfig {
    /// Directory holding per-call pipeline logs
    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }
}
