//! # Configuration
//!
//! Settings come from a TOML file and are then overridden by command-line
//! flags. The file is found by, in order:
//!
//! 1. `--config <path>`
//! 2. the `CORVID_CONFIG` environment variable
//! 3. `corvid.toml` in the working directory, if it exists
//!
//! With none of these, built-in defaults apply.
//!
//! ```toml
//! [storage]
//! backend = "redb"        # or "memory"
//! path = "corvid.db"
//!
//! [pipeline]
//! page_size = 10
//! verify_batch_size = 100
//! drop_policy = "backfill" # or "short_page"
//! ```

use corvid_core::{BackendKind, CorvidConfig, CorvidError};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CORVID_CONFIG";

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "corvid.toml";

/// Maximum config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Flag values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database: Option<PathBuf>,
    pub backend: Option<BackendKind>,
}

/// Parse a config document. Missing sections and fields take defaults.
pub fn parse_config(content: &str) -> Result<CorvidConfig, CorvidError> {
    let config: CorvidConfig = toml::from_str(content)
        .map_err(|e| CorvidError::Validation(format!("Invalid config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Read and parse a config file.
pub fn from_file(path: &Path) -> Result<CorvidConfig, CorvidError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        CorvidError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(CorvidError::Validation(format!(
            "Config file {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_CONFIG_FILE_SIZE
        )));
    }
    let content = std::fs::read_to_string(path).map_err(|e| {
        CorvidError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
    })?;
    parse_config(&content)
}

/// Where the config comes from, if anywhere.
pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    local.is_file().then_some(local)
}

/// Load the effective configuration.
pub fn load(explicit: Option<&Path>, overrides: &Overrides) -> Result<CorvidConfig, CorvidError> {
    let mut config = match locate(explicit) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            from_file(&path)?
        }
        None => CorvidConfig::default(),
    };
    if let Some(database) = &overrides.database {
        config.storage.path.clone_from(database);
    }
    if let Some(backend) = overrides.backend {
        config.storage.backend = backend;
    }
    config.validate()?;
    Ok(config)
}
