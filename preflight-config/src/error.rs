use std::path::PathBuf;

use thiserror::Error;

/// A configuration problem the engine refuses to start with.
///
/// This is the only fatal error in the system: everything downstream of a
/// successfully resolved configuration becomes a per-scope outcome instead.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML configuration document")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("failed to parse JSON configuration document")]
    ParseJson(#[from] serde_json::Error),

    #[error("configuration file {0} has an unsupported extension (expected .yaml, .yml or .json)")]
    UnknownFormat(PathBuf),

    #[error("unknown profile `{0}`")]
    UnknownProfile(String),

    #[error("unknown configuration key `{0}`")]
    UnknownKey(String),

    #[error("invalid value for `{path}`: expected {expected}")]
    InvalidValue { path: String, expected: &'static str },
}
