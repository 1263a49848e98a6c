use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid target name: {0:?}")]
    InvalidTarget(String),

    #[error("generator error: {0}")]
    Generator(String),

    #[error("failed to read reference file {}: {source}", path.display())]
    Reference {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("prompt error: {0}")]
    Prompt(#[from] parsegen_pm::PmError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}
