pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod pipeline;

use std::path::PathBuf;

/// Root used to resolve relative paths in configuration. `VIDSUM_APP_ROOT` wins over the
/// process working directory.
pub fn default_app_root() -> PathBuf {
    std::env::var("VIDSUM_APP_ROOT")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}
