//! Error types for the transit environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// Address string does not match any known entity path
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Target mailbox has been dropped (entity stopped)
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),
}

impl EnvError {
    /// Creates an invalid address error.
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a channel closed error.
    pub fn closed(target: impl std::fmt::Display) -> Self {
        Self::ChannelClosed(target.to_string())
    }
}
