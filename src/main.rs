//! Entry point for the atomld linker.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Initialize logging from the `--log-level` flag.
//! 3. Read every input object file.
//! 4. Link: either merge into a combined object file (`--merge-only`) or
//!    produce the flat binary.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use std::fs::File;
use std::io::BufWriter;
use tracing_subscriber::EnvFilter;

use atomld::config::Config;
use atomld::linker::Linker;
use atomld::{reader, writer};

fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut linker = Linker::default();
    for path in &config.inputs {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file)? };
        let object = reader::parse(&mmap)
            .with_context(|| format!("failed to read {}", path.display()))?;
        linker.add_object(object)?;
    }

    let output = File::create(&config.output)
        .with_context(|| format!("failed to create {}", config.output.display()))?;
    let mut output = BufWriter::new(output);

    if config.merge_only {
        let merged = linker.link()?;
        writer::write(&merged, &mut output)?;
    } else {
        linker.link_binary(&mut output)?;
    }

    println!("Linked successfully to {}", config.output.display());
    Ok(())
}
