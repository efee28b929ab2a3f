//! KiCad Ops MCP Server Library
//!
//! This module exports the core components for testing and integration.

pub mod cli;
pub mod config;
pub mod error;
pub mod kicad;
pub mod logging;
pub mod pcbnew;
pub mod project;
pub mod runner;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod tools;
pub mod types;
