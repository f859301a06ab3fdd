//! Chainbridge core
//!
//! Connects a callback-driven chain engine to async Rust:
//!
//! - chain creation becomes one awaitable call ([`Bridge::create_chain`]),
//!   correlated with the engine's init callback through a keyed
//!   [`Mailbox`];
//! - each chain gets a response loop that sleeps on a [`WakeSlot`] and
//!   drains the engine when notified;
//! - responses fan out per chain through a [`MulticastChannel`].
//!
//! The engine itself sits behind the [`Engine`] trait. [`SimEngine`] is an
//! in-process implementation for tests and the command line tool.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod mailbox;
pub mod notifier;
mod poll_loop;
pub mod registry;
pub mod sim;
pub mod wake;

pub use bridge::{Bridge, Chain};
pub use channel::{MulticastChannel, Subscription};
pub use config::{BridgeConfig, ChainConfig, ConfigError};
pub use engine::{AllocateChain, Engine};
pub use error::{BridgeError, Result};
pub use lifecycle::BridgeSlot;
pub use mailbox::{AlreadySet, Mailbox};
pub use notifier::Notifier;
pub use registry::{ChainEntry, ChainRegistry};
pub use sim::SimEngine;
pub use wake::WakeSlot;

pub use chainbridge_types::{ChainId, CreationOutcome, LogLevel, RequestStatus};
