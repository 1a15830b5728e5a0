use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use toml::Value;

pub const CONFIG_PATH_ENV: &str = "BETGATE_CONFIG";
pub const CONFIG_PATH_ARG: &str = "--config";
const DISCOVERY_CANDIDATES: [&str; 2] = ["betgate.toml", "/etc/betgate/betgate.toml"];

pub const MIN_ACCEPT_POLL_INTERVAL_MS: u64 = 1;
pub const MAX_ACCEPT_POLL_INTERVAL_MS: u64 = 1_000;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub lottery: LotteryConfig,
    pub storage: StorageConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub human_friendly: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            human_friendly: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub listen_backlog: u32,
    pub expected_agencies: u32,
    pub accept_poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 12345,
            listen_backlog: 5,
            expected_agencies: 5,
            accept_poll_interval_ms: 50,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct LotteryConfig {
    pub winning_number: u32,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            winning_number: 7574,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub engine: String,
    pub path: String,
    pub temporary: bool,
    pub reset_on_start: bool,
    #[serde(default)]
    pub sled: SledConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: "sled".to_owned(),
            path: "~/.betgate/data".to_owned(),
            temporary: false,
            reset_on_start: true,
            sled: SledConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SledConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_capacity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl AppConfig {
    /// Resolves the config file from argv, `BETGATE_CONFIG` or well-known
    /// locations, falling back to built-in defaults when none exists. The
    /// remaining `--section.key value` pairs are applied on top.
    pub fn load_with_discovery(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let (explicit_path, override_args) = split_config_path_arg(args)?;
        let env_path = std::env::var(CONFIG_PATH_ENV).ok();
        let path = discover_config_path(
            explicit_path,
            env_path,
            &DISCOVERY_CANDIDATES.map(PathBuf::from),
        );

        match path {
            Some(path) => Self::load_from_toml_with_args(path, override_args),
            None => Self::load_defaults_with_args(override_args),
        }
    }

    pub fn load_from_toml_with_args(
        path: impl AsRef<Path>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let path_label = path.as_ref().to_string_lossy().to_string();
        let content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path_label.clone(),
            source,
        })?;
        let file_value: Value = content.parse().map_err(|source| ConfigError::TomlParse {
            path: path_label,
            source,
        })?;

        let mut root = default_tree()?;
        merge_tables(&mut root, file_value);
        Self::finish(root, args)
    }

    pub fn load_defaults_with_args(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        Self::finish(default_tree()?, args)
    }

    fn finish(mut root: Value, args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        for (key_path, raw_value) in parse_cli_overrides(args)? {
            apply_override(&mut root, &key_path, &raw_value)?;
        }

        let config: Self = root.try_into().map_err(ConfigError::Deserialize)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.expected_agencies == 0 {
            return Err(ConfigError::OutOfRange {
                key: "server.expected_agencies",
                message: "at least one agency must be expected".to_owned(),
            });
        }
        if self.server.listen_backlog == 0 {
            return Err(ConfigError::OutOfRange {
                key: "server.listen_backlog",
                message: "backlog must be at least 1".to_owned(),
            });
        }
        let poll = self.server.accept_poll_interval_ms;
        if !(MIN_ACCEPT_POLL_INTERVAL_MS..=MAX_ACCEPT_POLL_INTERVAL_MS).contains(&poll) {
            return Err(ConfigError::OutOfRange {
                key: "server.accept_poll_interval_ms",
                message: format!(
                    "must be between {MIN_ACCEPT_POLL_INTERVAL_MS} and {MAX_ACCEPT_POLL_INTERVAL_MS}, got {poll}"
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    TomlParse {
        path: String,
        source: toml::de::Error,
    },
    SerializeDefaults(toml::ser::Error),
    Deserialize(toml::de::Error),
    MissingValueForArg {
        key: String,
    },
    InvalidArgFormat {
        arg: String,
    },
    InvalidPath {
        key: String,
    },
    UnknownPath {
        key: String,
    },
    UnsupportedOverrideType {
        key: String,
    },
    InvalidValueForType {
        key: String,
        expected: &'static str,
        value: String,
    },
    OutOfRange {
        key: &'static str,
        message: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config file '{path}': {source}")
            }
            Self::TomlParse { path, source } => {
                write!(f, "failed to parse TOML config '{path}': {source}")
            }
            Self::SerializeDefaults(source) => {
                write!(f, "failed to render built-in default config: {source}")
            }
            Self::Deserialize(source) => write!(f, "failed to deserialize config: {source}"),
            Self::MissingValueForArg { key } => {
                write!(f, "missing value for CLI argument '--{key}'")
            }
            Self::InvalidArgFormat { arg } => write!(
                f,
                "invalid CLI argument '{arg}', expected '--config <path>' or '--section.key value'"
            ),
            Self::InvalidPath { key } => write!(f, "invalid override key path '{key}'"),
            Self::UnknownPath { key } => write!(f, "unknown override key path '{key}'"),
            Self::UnsupportedOverrideType { key } => {
                write!(f, "override not supported for complex TOML type at '{key}'")
            }
            Self::InvalidValueForType {
                key,
                expected,
                value,
            } => write!(
                f,
                "invalid value '{value}' for '{key}', expected type {expected}"
            ),
            Self::OutOfRange { key, message } => write!(f, "invalid '{key}': {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn default_tree() -> Result<Value, ConfigError> {
    Value::try_from(AppConfig::default()).map_err(ConfigError::SerializeDefaults)
}

fn merge_tables(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_tables(existing, overlay_value),
                    None => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn split_config_path_arg(
    args: impl IntoIterator<Item = String>,
) -> Result<(Option<PathBuf>, Vec<String>), ConfigError> {
    let mut explicit = None;
    let mut remaining = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        if arg == CONFIG_PATH_ARG {
            let path = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
                key: "config".to_owned(),
            })?;
            explicit = Some(PathBuf::from(path));
        } else {
            remaining.push(arg);
        }
    }

    Ok((explicit, remaining))
}

fn discover_config_path(
    explicit: Option<PathBuf>,
    env_value: Option<String>,
    candidates: &[PathBuf],
) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    if let Some(raw) = env_value.filter(|raw| !raw.trim().is_empty()) {
        return Some(PathBuf::from(raw));
    }
    candidates.iter().find(|path| path.is_file()).cloned()
}

fn parse_cli_overrides(args: impl IntoIterator<Item = String>) -> Result<Vec<(String, String)>, ConfigError> {
    let mut overrides = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        let key = match arg.strip_prefix("--") {
            Some(key) if !key.is_empty() => key.to_owned(),
            _ => return Err(ConfigError::InvalidArgFormat { arg }),
        };
        let value = iter
            .next()
            .ok_or_else(|| ConfigError::MissingValueForArg { key: key.clone() })?;
        overrides.push((key, value));
    }

    Ok(overrides)
}

fn apply_override(root: &mut Value, key_path: &str, raw_value: &str) -> Result<(), ConfigError> {
    let segments: Vec<&str> = key_path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(ConfigError::InvalidPath {
            key: key_path.to_owned(),
        });
    }

    let unknown = || ConfigError::UnknownPath {
        key: key_path.to_owned(),
    };
    let mut current = root;
    for segment in &segments {
        current = current
            .as_table_mut()
            .ok_or_else(unknown)?
            .get_mut(*segment)
            .ok_or_else(unknown)?;
    }

    *current = coerce_like(key_path, raw_value, current)?;
    Ok(())
}

fn coerce_like(key_path: &str, raw_value: &str, current: &Value) -> Result<Value, ConfigError> {
    let invalid = |expected: &'static str| ConfigError::InvalidValueForType {
        key: key_path.to_owned(),
        expected,
        value: raw_value.to_owned(),
    };

    match current {
        Value::String(_) => Ok(Value::String(raw_value.to_owned())),
        Value::Integer(_) => raw_value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid("integer")),
        Value::Float(_) => raw_value
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid("float")),
        Value::Boolean(_) => raw_value
            .parse::<bool>()
            .map(Value::Boolean)
            .map_err(|_| invalid("boolean")),
        Value::Datetime(_) | Value::Array(_) | Value::Table(_) => {
            Err(ConfigError::UnsupportedOverrideType {
                key: key_path.to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{discover_config_path, split_config_path_arg, AppConfig, ConfigError};

    fn write_temp_config(content: &str, suffix: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "betgate-config-test-{suffix}-{}.toml",
            std::process::id()
        ));
        fs::write(&path, content).expect("failed to write temp config");
        path
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    #[test]
    fn defaults_match_single_round_deployment() {
        let config = AppConfig::load_defaults_with_args(Vec::new()).expect("defaults load");

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.port, 12345);
        assert_eq!(config.server.listen_backlog, 5);
        assert_eq!(config.server.expected_agencies, 5);
        assert_eq!(config.lottery.winning_number, 7574);
        assert!(config.storage.reset_on_start);
    }

    #[test]
    fn partial_file_is_merged_over_defaults() {
        let path = write_temp_config(
            r#"
[server]
port = 4000
expected_agencies = 3

[storage.sled]
mode = "low_space"
"#,
            "partial",
        );

        let config = AppConfig::load_from_toml_with_args(&path, Vec::new())
            .expect("partial config should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.expected_agencies, 3);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.storage.sled.mode.as_deref(), Some("low_space"));
        assert_eq!(config.storage.sled.cache_capacity, None);
    }

    #[test]
    fn argv_overrides_are_typed_by_existing_value() {
        let config = AppConfig::load_defaults_with_args(args(&[
            "--server.expected_agencies",
            "2",
            "--logging.human_friendly",
            "true",
            "--lottery.winning_number",
            "42",
        ]))
        .expect("overrides should apply");

        assert_eq!(config.server.expected_agencies, 2);
        assert!(config.logging.human_friendly);
        assert_eq!(config.lottery.winning_number, 42);

        let error = AppConfig::load_defaults_with_args(args(&["--server.port", "abc"]))
            .expect_err("non-integer port should fail");
        assert!(matches!(
            error,
            ConfigError::InvalidValueForType {
                expected: "integer",
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_override_path_and_bad_format() {
        let error = AppConfig::load_defaults_with_args(args(&["--server.nonexistent", "x"]))
            .expect_err("unknown key should fail");
        assert!(matches!(error, ConfigError::UnknownPath { .. }));

        let error = AppConfig::load_defaults_with_args(args(&["server.port", "1"]))
            .expect_err("missing dashes should fail");
        assert!(matches!(error, ConfigError::InvalidArgFormat { .. }));

        let error = AppConfig::load_defaults_with_args(args(&["--server.port"]))
            .expect_err("missing value should fail");
        assert!(matches!(error, ConfigError::MissingValueForArg { .. }));
    }

    #[test]
    fn rejects_zero_expected_agencies() {
        let error = AppConfig::load_defaults_with_args(args(&["--server.expected_agencies", "0"]))
            .expect_err("zero agencies should fail validation");
        assert!(matches!(
            error,
            ConfigError::OutOfRange {
                key: "server.expected_agencies",
                ..
            }
        ));
    }

    #[test]
    fn config_path_argument_is_split_from_overrides() {
        let (path, rest) = split_config_path_arg(args(&[
            "--server.port",
            "1",
            "--config",
            "/tmp/x.toml",
        ]))
        .expect("split should work");

        assert_eq!(path, Some(PathBuf::from("/tmp/x.toml")));
        assert_eq!(rest, args(&["--server.port", "1"]));
    }

    #[test]
    fn discovery_prefers_explicit_then_env_then_existing_candidates() {
        let existing = write_temp_config("", "discovery");
        let missing = PathBuf::from("/nonexistent/betgate.toml");
        let candidates = vec![missing.clone(), existing.clone()];

        assert_eq!(
            discover_config_path(Some(missing.clone()), Some("/env.toml".to_owned()), &candidates),
            Some(missing.clone())
        );
        assert_eq!(
            discover_config_path(None, Some("/env.toml".to_owned()), &candidates),
            Some(PathBuf::from("/env.toml"))
        );
        assert_eq!(
            discover_config_path(None, Some("  ".to_owned()), &candidates),
            Some(existing.clone())
        );
        assert_eq!(discover_config_path(None, None, &[missing]), None);

        fs::remove_file(existing).expect("temp config cleanup should succeed");
    }
}
