//! Per-command error taxonomy.
//!
//! None of these ever leave the entity that produced them: the runtime logs
//! the error and drops the command.

use thiserror::Error;
use transit_env::{Address, EnvError};

#[derive(Debug, Error)]
pub enum EntityError {
    /// Payload missing required fields or carrying the wrong shape
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Non-leaf address that was never seeded
    #[error("Unknown address: {0}")]
    UnknownAddress(Address),

    /// Subscribe or read against a slot the entity does not declare
    #[error("Unknown slot '{slot}' on {address}")]
    UnknownSlot { address: Address, slot: String },

    /// Registry already holds the configured number of children
    #[error("{address} already has {limit} children")]
    CapacityExceeded { address: Address, limit: usize },

    #[error(transparent)]
    Env(#[from] EnvError),
}

impl EntityError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }
}

impl From<serde_json::Error> for EntityError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedPayload(err.to_string())
    }
}
