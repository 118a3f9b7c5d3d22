use std::path::PathBuf;
use thiserror::Error;

/// Coarse error class used in logs and by callers deciding how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Adapter,
    Load,
    StoreHandle,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Adapter => "adapter",
            ErrorKind::Load => "load",
            ErrorKind::StoreHandle => "store_handle",
        }
    }
}

/// Failures surfaced by the provider, its adapter and the enforcer factory.
///
/// Nothing is retried internally; each variant reports the first failure of
/// the operation that produced it.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid model definition {}: {source}", path.display())]
    Model {
        path: PathBuf,
        #[source]
        source: casbin::Error,
    },
    #[error("policy adapter error: {0}")]
    Adapter(#[source] sqlx::Error),
    #[error("policy load error: {0}")]
    Load(#[source] casbin::Error),
    #[error("store handle error: {0}")]
    StoreHandle(#[source] sqlx::Error),
}

impl ProviderError {
    /// Shorthand for a [`ProviderError::Configuration`] error.
    pub fn config(reason: impl Into<String>) -> Self {
        ProviderError::Configuration(reason.into())
    }

    /// Error class for logs and caller decisions. Model parse failures count
    /// as configuration errors.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Configuration(_) | ProviderError::Model { .. } => {
                ErrorKind::Configuration
            }
            ProviderError::Adapter(_) => ErrorKind::Adapter,
            ProviderError::Load(_) => ErrorKind::Load,
            ProviderError::StoreHandle(_) => ErrorKind::StoreHandle,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
