use thiserror::Error;

/// Errors that can occur while running the API server
#[derive(Debug, Error)]
pub enum HealthError {
    /// Failed to bind API server to address
    #[error("failed to bind API server to {address}: {source}")]
    BindAddress {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to serve requests
    #[error("failed to serve requests: {0}")]
    ServeError(#[source] std::io::Error),
}

impl HealthError {
    /// Create a bind address error
    pub fn bind_address(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::BindAddress {
            address: address.into(),
            source,
        }
    }
}
