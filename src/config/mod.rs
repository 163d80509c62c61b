use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Session storage settings.
    pub storage: StorageConfig,
    /// Log filter and output format.
    pub logging: LoggingConfig,
    /// Accommodation resolver settings.
    pub resolver: ResolverConfig,
}

/// Session storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Backend kind.
    pub backend: StorageBackend,
    /// Directory used by the file backend.
    pub dir: PathBuf,
    /// Prefix for every persisted key.
    pub key_prefix: String,
}

/// Which key/value backend persists attempt sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// One JSON file per key.
    File,
    /// Process memory only.
    Memory,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Accommodation resolver configuration
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Record a provenance trail on every resolution pass.
    pub provenance_enabled: bool,
    /// Overrides the catalog's always-available tools when set.
    pub always_available: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "file".to_string())
            .to_lowercase()
            .as_str()
        {
            "file" => StorageBackend::File,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(AppError::Config {
                    message: format!("STORAGE_BACKEND must be 'file' or 'memory', got '{}'", other),
                })
            }
        };

        let storage = StorageConfig {
            backend,
            dir: PathBuf::from(
                env::var("STORAGE_DIR").unwrap_or_else(|_| "./data/sessions".to_string()),
            ),
            key_prefix: env::var("STORAGE_KEY_PREFIX").unwrap_or_else(|_| "pie".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let resolver = ResolverConfig {
            provenance_enabled: env::var("PROVENANCE_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            always_available: env::var("TOOLS_ALWAYS_AVAILABLE").ok().map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            }),
        };

        Ok(Config {
            storage,
            logging,
            resolver,
        })
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            provenance_enabled: true,
            always_available: None,
        }
    }
}
