//! Command-line interface.

pub mod commands;
pub mod parser;

pub use commands::{OutputFormat, execute};
pub use parser::{Cli, Commands};
