//! CLI command implementations.

pub mod check;
pub mod engine;
pub mod run;

pub use check::check_chain;
pub use run::{run_chain, RunOptions};
