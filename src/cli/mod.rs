//! CLI command definitions for kicad-ops-mcp
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod tasks;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tasks::TasksArgs;

/// KiCad Ops MCP Server and CLI tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Projects root directory (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    pub projects_root: Option<PathBuf>,

    /// Task record directory (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    pub tasks_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the MCP server (default if no subcommand given)
    Serve,

    /// Inspect recorded background tasks without a running server
    Tasks(TasksArgs),
}
