use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_BIND: &str = "127.0.0.1:8790";
const DEFAULT_DB_PATH: &str = "var/backend/accounts.db";
const DEFAULT_UPLOAD_DIR: &str = "var/uploads";
const DEFAULT_CONFIG_FILE: &str = "config/vidsum.toml";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;
const DEFAULT_WORKER_PROGRAM: &str = "python";
const DEFAULT_WORKER_SCRIPT: &str = "worker.py";
const DEFAULT_OUTPUT_CAP_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_root: PathBuf,
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub auth_secret: Option<String>,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub output_cap_bytes: usize,
    pub timeout: Option<Duration>,
}

impl AppConfig {
    pub fn require_auth_secret(&self) -> Result<&str, ConfigError> {
        self.auth_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .ok_or(ConfigError::MissingAuthSecret)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse config TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("config value '{key}' is invalid: {message}")]
    InvalidValue { key: String, message: String },
    #[error("auth secret is not configured (set VIDSUM_AUTH_SECRET or auth_secret)")]
    MissingAuthSecret,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    bind: Option<String>,
    db_path: Option<String>,
    upload_dir: Option<String>,
    max_upload_bytes: Option<u64>,
    auth_secret: Option<String>,
    #[serde(default)]
    worker: WorkerSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkerSection {
    program: Option<String>,
    args: Option<Vec<String>>,
    cwd: Option<String>,
    output_cap_bytes: Option<usize>,
    timeout_secs: Option<u64>,
}

pub fn load_config(app_root: &Path) -> Result<AppConfig, ConfigError> {
    load_config_with(app_root, |key| std::env::var(key).ok())
}

/// Layers defaults, the optional TOML file and `lookup`-provided environment values.
pub fn load_config_with<F>(app_root: &Path, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let file = match env("VIDSUM_CONFIG") {
        Some(explicit) => load_config_file(resolve_path(app_root, explicit.as_str()).as_path())?,
        None => {
            let default_path = app_root.join(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                load_config_file(default_path.as_path())?
            } else {
                ConfigFile::default()
            }
        }
    };

    let bind_raw = env("VIDSUM_BIND")
        .or(file.bind)
        .unwrap_or_else(|| String::from(DEFAULT_BIND));
    let bind = bind_raw
        .parse::<SocketAddr>()
        .map_err(|error| invalid("bind", error))?;

    let db_path = env("VIDSUM_DB")
        .or(file.db_path)
        .unwrap_or_else(|| String::from(DEFAULT_DB_PATH));
    let upload_dir = env("VIDSUM_UPLOAD_DIR")
        .or(file.upload_dir)
        .unwrap_or_else(|| String::from(DEFAULT_UPLOAD_DIR));

    let max_upload_bytes = match env("VIDSUM_MAX_UPLOAD_BYTES") {
        Some(raw) => parse_number::<u64>("max_upload_bytes", raw.as_str())?,
        None => file.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
    };
    if max_upload_bytes == 0 {
        return Err(invalid("max_upload_bytes", "must be greater than zero"));
    }

    let auth_secret = env("VIDSUM_AUTH_SECRET").or(file.auth_secret);

    let worker = file.worker;
    let program = env("VIDSUM_WORKER_PROGRAM")
        .or(worker.program)
        .unwrap_or_else(|| String::from(DEFAULT_WORKER_PROGRAM));
    let args = match env("VIDSUM_WORKER_ARGS") {
        Some(raw) => raw.split_whitespace().map(str::to_string).collect(),
        None => worker
            .args
            .unwrap_or_else(|| vec![String::from(DEFAULT_WORKER_SCRIPT)]),
    };
    let cwd = env("VIDSUM_WORKER_CWD")
        .or(worker.cwd)
        .map(|raw| resolve_path(app_root, raw.as_str()))
        .unwrap_or_else(|| app_root.to_path_buf());
    let output_cap_bytes = match env("VIDSUM_WORKER_OUTPUT_CAP_BYTES") {
        Some(raw) => parse_number::<usize>("worker.output_cap_bytes", raw.as_str())?,
        None => worker.output_cap_bytes.unwrap_or(DEFAULT_OUTPUT_CAP_BYTES),
    };
    if output_cap_bytes == 0 {
        return Err(invalid(
            "worker.output_cap_bytes",
            "must be greater than zero",
        ));
    }
    let timeout_secs = match env("VIDSUM_WORKER_TIMEOUT_SECS") {
        Some(raw) => Some(parse_number::<u64>("worker.timeout_secs", raw.as_str())?),
        None => worker.timeout_secs,
    };

    Ok(AppConfig {
        app_root: app_root.to_path_buf(),
        bind,
        db_path: resolve_path(app_root, db_path.as_str()),
        upload_dir: resolve_path(app_root, upload_dir.as_str()),
        max_upload_bytes,
        auth_secret,
        worker: WorkerConfig {
            program,
            args,
            cwd,
            output_cap_bytes,
            timeout: timeout_secs.filter(|secs| *secs > 0).map(Duration::from_secs),
        },
    })
}

fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|error| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    toml::from_str::<ConfigFile>(raw.as_str()).map_err(|error| ConfigError::ParseToml {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}

fn resolve_path(app_root: &Path, raw: &str) -> PathBuf {
    let candidate = PathBuf::from(raw);
    if candidate.is_absolute() {
        candidate
    } else {
        app_root.join(candidate)
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|error| invalid(key, error))
}

fn invalid(key: &str, message: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn temp_root(label: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "vidsum_config_{label}_{}",
            uuid::Uuid::new_v4()
        ));
        fs::create_dir_all(root.as_path()).expect("temp root should be creatable");
        root
    }

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_resolve_under_app_root() {
        let root = temp_root("defaults");
        let config = load_config_with(root.as_path(), |_| None).expect("defaults should load");

        assert_eq!(config.bind, "127.0.0.1:8790".parse::<SocketAddr>().unwrap());
        assert_eq!(config.db_path, root.join("var/backend/accounts.db"));
        assert_eq!(config.upload_dir, root.join("var/uploads"));
        assert_eq!(config.worker.program, "python");
        assert_eq!(config.worker.args, vec![String::from("worker.py")]);
        assert_eq!(config.worker.cwd, root);
        assert_eq!(config.worker.output_cap_bytes, 1024 * 1024);
        assert_eq!(config.worker.timeout, None);
        assert_eq!(
            config.require_auth_secret(),
            Err(ConfigError::MissingAuthSecret)
        );

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn toml_file_is_layered_under_env_overrides() {
        let root = temp_root("layered");
        fs::create_dir_all(root.join("config")).unwrap();
        fs::write(
            root.join("config/vidsum.toml"),
            r#"
bind = "0.0.0.0:9000"
auth_secret = "from-file"
upload_dir = "/srv/uploads"

[worker]
program = "python3"
args = ["summarize.py", "--quiet"]
timeout_secs = 600
"#,
        )
        .unwrap();

        let config = load_config_with(
            root.as_path(),
            lookup_from(&[
                ("VIDSUM_AUTH_SECRET", "from-env"),
                ("VIDSUM_WORKER_OUTPUT_CAP_BYTES", "4096"),
            ]),
        )
        .expect("layered config should load");

        assert_eq!(config.bind, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.require_auth_secret(), Ok("from-env"));
        assert_eq!(config.upload_dir, PathBuf::from("/srv/uploads"));
        assert_eq!(config.worker.program, "python3");
        assert_eq!(
            config.worker.args,
            vec![String::from("summarize.py"), String::from("--quiet")]
        );
        assert_eq!(config.worker.output_cap_bytes, 4096);
        assert_eq!(config.worker.timeout, Some(Duration::from_secs(600)));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn worker_args_env_is_whitespace_split() {
        let root = temp_root("args");
        let config = load_config_with(
            root.as_path(),
            lookup_from(&[("VIDSUM_WORKER_ARGS", "  newserver.py   --fast ")]),
        )
        .expect("config should load");
        assert_eq!(
            config.worker.args,
            vec![String::from("newserver.py"), String::from("--fast")]
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn rejects_unparseable_bind_and_zero_caps() {
        let root = temp_root("invalid");
        let err = load_config_with(root.as_path(), lookup_from(&[("VIDSUM_BIND", "nope")]))
            .expect_err("bad bind should fail");
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "bind"));

        let err = load_config_with(
            root.as_path(),
            lookup_from(&[("VIDSUM_WORKER_OUTPUT_CAP_BYTES", "0")]),
        )
        .expect_err("zero cap should fail");
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "worker.output_cap_bytes")
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        let root = temp_root("unknown");
        let path = root.join("custom.toml");
        fs::write(path.as_path(), "colour = \"blue\"\n").unwrap();

        let err = load_config_with(
            root.as_path(),
            lookup_from(&[("VIDSUM_CONFIG", "custom.toml")]),
        )
        .expect_err("unknown key should fail");
        assert!(matches!(err, ConfigError::ParseToml { .. }));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn explicit_missing_config_file_is_an_error() {
        let root = temp_root("missing");
        let err = load_config_with(
            root.as_path(),
            lookup_from(&[("VIDSUM_CONFIG", "nowhere.toml")]),
        )
        .expect_err("missing explicit file should fail");
        assert!(matches!(err, ConfigError::ReadFile { .. }));
        let _ = fs::remove_dir_all(root);
    }
}
