//! Command-line handlers

pub mod commands;

pub use commands::{
    cmd_chain_blocks, cmd_mine, cmd_start, cmd_validate, shutdown_signal, CliResult,
};
