mod config;
mod tracing_setup;

use anyhow::{Context, Result};
use config::RotlogConfig;
use rotating_log_writer::RotatingWriter;
use std::io::{self, BufRead};

/// Copies `input` into `writer` line by line, logging any housekeeping
/// warnings as they show up. Returns the number of lines and bytes copied.
fn pump(input: &mut impl BufRead, writer: &RotatingWriter) -> Result<(u64, u64)> {
    let mut line = Vec::with_capacity(4096);
    let mut lines = 0u64;
    let mut bytes = 0u64;

    loop {
        line.clear();
        let n = input
            .read_until(b'\n', &mut line)
            .context("failed to read from stdin")?;
        if n == 0 {
            break;
        }

        writer
            .write(&line)
            .with_context(|| format!("failed to write to {}", writer.base_path().display()))?;

        lines += 1;
        bytes += n as u64;

        for warning in writer.take_warnings() {
            tracing::warn!("{:#}", anyhow::Error::from(warning));
        }
    }

    Ok((lines, bytes))
}

fn main() -> Result<()> {
    tracing_setup::init_tracing("info");

    let config = RotlogConfig::new()?;
    let writer_config = config.writer_config()?;
    let path = writer_config.base_path.clone();

    let writer = RotatingWriter::open(writer_config)
        .with_context(|| format!("failed to open {}", path.display()))?;
    tracing::info!("writing to {}", path.display());

    let result = pump(&mut io::stdin().lock(), &writer);

    writer
        .close()
        .with_context(|| format!("failed to close {}", path.display()))?;
    for warning in writer.take_warnings() {
        tracing::warn!("{:#}", anyhow::Error::from(warning));
    }

    let (lines, bytes) = result?;
    tracing::info!(lines, bytes, "input closed");

    Ok(())
}
