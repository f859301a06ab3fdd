//! Error types for the bridge

use crate::config::ConfigError;
use chainbridge_types::ChainId;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Top-level bridge error
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The engine reported that the chain failed to initialize
    #[error("chain failed to initialize: {0}")]
    Creation(String),

    /// The engine rejected a request because its queue is full
    #[error("JSON-RPC requests queue is full")]
    QueueFull,

    /// The chain was removed (or the bridge shut down) before the call
    #[error("{0} is closed")]
    Closed(ChainId),

    /// The engine returned a status code outside its documented set
    #[error("internal error: unknown send_request status code {0}")]
    Protocol(u32),

    /// The bridge was used before init or after shutdown
    #[error("bridge not initialized; install a factory or create a new bridge first")]
    NotInitialized,

    /// The engine produced a response that is not valid UTF-8
    #[error("{chain} produced a non UTF-8 response")]
    Decode {
        chain: ChainId,
        #[source]
        source: FromUtf8Error,
    },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No tokio runtime, or an engine call was interrupted by runtime shutdown
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result type using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
