//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the linker
//! using `clap`. It handles parsing arguments like input files and the
//! output file path.

use clap::Parser;
use std::path::PathBuf;

/// A linker for atom object files.
///
/// Merges one or more atom object files into a single flat ARM binary, or,
/// with `--merge-only`, into a combined object file for a later link.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Input object files
    #[arg(required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Output file
    #[arg(short, long, default_value = "a.out", help = "Path to the output file")]
    pub output: PathBuf,

    /// Stop after merging and write a combined object file instead of a
    /// flat binary
    #[arg(short = 'r', long)]
    pub merge_only: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}
