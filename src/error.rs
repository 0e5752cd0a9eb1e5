//! Error taxonomy for the agent, grouped by effect rather than by call site
//!. Stale/out-of-order logical messages and rejected
//! Lamport/incarnation transitions are intentionally *not* represented here
//! — they are ordinary `Ok` values carrying a rejected transition outcome.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("cryptography error: {0}")]
    Crypto(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("agent already shut down")]
    AlreadyShutdown,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),
}

impl Clone for AgentError {
    fn clone(&self) -> Self {
        match self {
            AgentError::Io(e) => AgentError::Io(std::io::Error::new(e.kind(), e.to_string())),
            AgentError::Codec(s) => AgentError::Codec(s.clone()),
            AgentError::Crypto(s) => AgentError::Crypto(s.clone()),
            AgentError::Config(s) => AgentError::Config(s.clone()),
            AgentError::Snapshot(s) => AgentError::Snapshot(s.clone()),
            AgentError::Timeout(s) => AgentError::Timeout(s.clone()),
            AgentError::AlreadyShutdown => AgentError::AlreadyShutdown,
            AgentError::InvalidState(s) => AgentError::InvalidState(s.clone()),
            AgentError::UnknownNode(s) => AgentError::UnknownNode(s.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
