use std::path::PathBuf;

use thiserror::Error;

/// Conditions that abort a run before any archive is touched.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("source directory {} does not exist", .0.display())]
    SourceMissing(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
