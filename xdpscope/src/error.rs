// Error types for xdpscope

use std::fmt;

/// Error raised by host environment checks that have no dedicated error type.
#[derive(Debug)]
pub struct XdpscopeError {
    message: String,
}

impl XdpscopeError {
    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for XdpscopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for XdpscopeError {}

pub type Result<T> = std::result::Result<T, XdpscopeError>;
