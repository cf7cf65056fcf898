use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("authentication required: {0}")]
    AuthenticationRequired(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationRequired(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("repository error: {0}")]
    Repository(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Transport(error) if error.is_authentication())
    }
}
