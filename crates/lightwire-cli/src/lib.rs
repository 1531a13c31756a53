//! lightwire CLI: argument parsing, file configuration, console output.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
