use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "CaseVault";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix for every environment override.
pub const ENV_PREFIX: &str = "CASEVAULT_";

pub const DEFAULT_SCAN_INTERVAL_SECS: f64 = 90.0;
pub const DEFAULT_MARKER_COMMAND: &str = "marker_single";
pub const DEFAULT_MARKER_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PDFTOTEXT_COMMAND: &str = "pdftotext";
pub const DEFAULT_PDFTOTEXT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TESSERACT_COMMAND: &str = "tesseract";
pub const DEFAULT_TESSERACT_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_DOCUMENT_MAX_CHARS: usize = 500_000;
pub const DEFAULT_BINARY_PER_CYCLE_LIMIT: usize = 6;
pub const DEFAULT_ATTACHMENT_MAX_CHARS: usize = 500_000;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue { var: String, value: String },
}

/// Get the application data directory
/// ~/CaseVault/ on all platforms
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Directory holding uploads and the two durable artifacts.
pub fn data_dir() -> PathBuf {
    app_data_dir().join("data")
}

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "casevault_lib=info"
}

/// Runtime settings for the document-intelligence services.
///
/// Values are taken verbatim from the environment; lower bounds are
/// enforced where each component derives its own settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub vault_root: PathBuf,
    pub uploads_dir: PathBuf,
    pub document_index_path: PathBuf,
    pub attachment_assist_jobs_path: PathBuf,
    pub document_scan_interval_secs: f64,
    pub marker_command: String,
    pub marker_timeout_secs: u64,
    pub pdftotext_command: String,
    pub pdftotext_timeout_secs: u64,
    pub tesseract_command: String,
    pub tesseract_timeout_secs: u64,
    pub document_max_chars: usize,
    pub document_binary_per_cycle_limit: usize,
    pub attachment_max_chars: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let data = data_dir();
        Self {
            vault_root: app_data_dir().join("vault"),
            uploads_dir: data.join("uploads"),
            document_index_path: data.join("patient_document_index.json"),
            attachment_assist_jobs_path: data.join("attachment_assist_jobs.json"),
            document_scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            marker_command: DEFAULT_MARKER_COMMAND.into(),
            marker_timeout_secs: DEFAULT_MARKER_TIMEOUT_SECS,
            pdftotext_command: DEFAULT_PDFTOTEXT_COMMAND.into(),
            pdftotext_timeout_secs: DEFAULT_PDFTOTEXT_TIMEOUT_SECS,
            tesseract_command: DEFAULT_TESSERACT_COMMAND.into(),
            tesseract_timeout_secs: DEFAULT_TESSERACT_TIMEOUT_SECS,
            document_max_chars: DEFAULT_DOCUMENT_MAX_CHARS,
            document_binary_per_cycle_limit: DEFAULT_BINARY_PER_CYCLE_LIMIT,
            attachment_max_chars: DEFAULT_ATTACHMENT_MAX_CHARS,
        }
    }
}

impl Settings {
    /// Defaults overridden by `CASEVAULT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Settings::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> Option<(String, String)> {
            let var = format!("{ENV_PREFIX}{key}");
            let value = lookup(&var)?;
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some((var, trimmed))
            }
        };

        let mut settings = Self::default();

        if let Some((_, v)) = get("VAULT_ROOT") {
            settings.vault_root = PathBuf::from(v);
        }
        if let Some((_, v)) = get("UPLOADS_DIR") {
            settings.uploads_dir = PathBuf::from(v);
        }
        if let Some((_, v)) = get("DOCUMENT_INDEX_PATH") {
            settings.document_index_path = PathBuf::from(v);
        }
        if let Some((_, v)) = get("ATTACHMENT_ASSIST_JOBS_PATH") {
            settings.attachment_assist_jobs_path = PathBuf::from(v);
        }
        if let Some((_, v)) = get("MARKER_COMMAND") {
            settings.marker_command = v;
        }
        if let Some((_, v)) = get("PDFTOTEXT_COMMAND") {
            settings.pdftotext_command = v;
        }
        if let Some((_, v)) = get("TESSERACT_COMMAND") {
            settings.tesseract_command = v;
        }
        if let Some((var, v)) = get("DOCUMENT_SCAN_INTERVAL_SECS") {
            settings.document_scan_interval_secs = parse_var(&var, &v)?;
        }
        if let Some((var, v)) = get("MARKER_TIMEOUT_SECS") {
            settings.marker_timeout_secs = parse_var(&var, &v)?;
        }
        if let Some((var, v)) = get("PDFTOTEXT_TIMEOUT_SECS") {
            settings.pdftotext_timeout_secs = parse_var(&var, &v)?;
        }
        if let Some((var, v)) = get("TESSERACT_TIMEOUT_SECS") {
            settings.tesseract_timeout_secs = parse_var(&var, &v)?;
        }
        if let Some((var, v)) = get("DOCUMENT_MAX_CHARS") {
            settings.document_max_chars = parse_var(&var, &v)?;
        }
        if let Some((var, v)) = get("DOCUMENT_BINARY_PER_CYCLE_LIMIT") {
            settings.document_binary_per_cycle_limit = parse_var(&var, &v)?;
        }
        if let Some((var, v)) = get("ATTACHMENT_MAX_CHARS") {
            settings.attachment_max_chars = parse_var(&var, &v)?;
        }

        Ok(settings)
    }
}

fn parse_var<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    })
}
