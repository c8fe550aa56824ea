use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Network failure: {0}")]
    Network(String),
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("HTTP error: {0}")]
    Http(u16),
    #[error("Failed to parse response: {0}")]
    Parse(String),
    #[error("Authorization callback did not include a code")]
    MissingAuthorizationCode,
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),
    #[error("Authorization failed: {0}")]
    Authorization(String),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl InfraError {
    /// Failures the API gateway retries inside its fixed backoff envelope.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http(_))
    }
}
