//! CLI module for linkflow - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
