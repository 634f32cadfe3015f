//! Command-line interface for ocrforge.
//!
//! Provides commands for running the training pipeline, inspecting
//! checkpoints and checking external tool availability.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
