use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("No index found for mode '{0}'")]
    IndexNotFound(String),

    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("No index has been built or loaded")]
    IndexNotLoaded,

    #[error("Completion service error: {0}")]
    Completion(String),

    #[error("Failed to persist index: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable kind, used in logs and by the pipeline's error boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "invalid_configuration",
            Error::ProviderUnavailable(_) => "provider_unavailable",
            Error::IndexNotFound(_) => "index_not_found",
            Error::IndexCorrupt(_) => "index_corrupt",
            Error::IndexNotLoaded => "index_not_loaded",
            Error::Completion(_) => "completion_service_error",
            Error::Storage(_) => "storage",
            Error::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
