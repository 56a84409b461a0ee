//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plugin {plugin} not found in module {module}")]
    PluginNotFound { module: String, plugin: String },

    #[error("Worker pool {module} saturated ({capacity} slots in use)")]
    PoolSaturated { module: String, capacity: usize },

    #[error("Worker pool {0} is shut down")]
    PoolClosed(String),

    #[error("Plugin {plugin} failed: {message}")]
    PluginExecution { plugin: String, message: String },

    #[error("Failed to construct module chain: {0}")]
    ChainConstruction(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn plugin_not_found(module: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self::PluginNotFound {
            module: module.into(),
            plugin: plugin.into(),
        }
    }

    pub fn plugin_execution(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PluginExecution {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether the error means a unit of work was turned away by a worker pool.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::PoolSaturated { .. } | Self::PoolClosed(_))
    }
}
