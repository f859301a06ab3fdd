//! Shared types for chainbridge
//!
//! This crate provides the plain value types exchanged between the host-side
//! bridge and the native engine: chain identifiers, log levels, and the
//! decoded forms of the engine's status values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chain identifier
///
/// Assigned by the engine when a chain is allocated. Unique among live chains
/// and never reused while the chain is registered on the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub u32);

impl ChainId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ChainId {
    fn from(id: u32) -> Self {
        ChainId(id)
    }
}

impl From<ChainId> for u32 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain:{}", self.0)
    }
}

/// Engine log verbosity, most to least severe
///
/// The discriminants are the ordinals the engine expects in `init`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    #[default]
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Ordinal passed across the engine boundary
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown log level name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLogLevelError(pub String);

impl fmt::Display for ParseLogLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown log level `{}` (expected error, warn, info, debug or trace)",
            self.0
        )
    }
}

impl std::error::Error for ParseLogLevelError {}

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" | "1" => Ok(LogLevel::Error),
            "warn" | "warning" | "2" => Ok(LogLevel::Warn),
            "info" | "3" => Ok(LogLevel::Info),
            "debug" | "4" => Ok(LogLevel::Debug),
            "trace" | "5" => Ok(LogLevel::Trace),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

/// Result of a chain's asynchronous initialization
///
/// The engine produces exactly one outcome per allocated chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreationOutcome {
    Ready,
    Failed(String),
}

impl CreationOutcome {
    /// Decode the `(id, error-or-none)` shape of the init callback
    pub fn from_callback(error: Option<String>) -> Self {
        match error {
            None => CreationOutcome::Ready,
            Some(message) => CreationOutcome::Failed(message),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, CreationOutcome::Ready)
    }
}

/// Decoded status code of a request submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Accepted,
    QueueFull,
    /// Any code outside the engine's documented set
    Unknown(u32),
}

impl From<u32> for RequestStatus {
    fn from(code: u32) -> Self {
        match code {
            0 => RequestStatus::Accepted,
            1 => RequestStatus::QueueFull,
            other => RequestStatus::Unknown(other),
        }
    }
}
