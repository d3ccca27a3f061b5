use crate::config::ConfigError;
use crate::metrics::MetricsError;
use profile_sync::{StoreError, SyncError};

#[derive(thiserror::Error, Debug)]
pub enum ConnectorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("processed log: {0}")]
    Store(#[from] StoreError),

    #[error("could not read input {path}: {source}")]
    Input {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid attribute {0:?}, expected key=value")]
    InvalidAttribute(String),

    #[error("no list id given and sync.default_list_id is not set")]
    MissingListId,
}
