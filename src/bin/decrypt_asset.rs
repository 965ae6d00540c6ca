//! Decrypts a legacy-cipher asset file.
//!
//! Usage: `decrypt_asset <input> [output]`. The output defaults to standard
//! output. The cipher is keyed by the input's file name, so renamed files
//! will not decrypt.

use std::io::Write;

use anyhow::{Context, Result};
use idol_gateway::crypto::legacy;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let input = args
        .next()
        .context("Usage: decrypt_asset <input> [output]")?;
    let output = args.next();

    let sealed = std::fs::read(&input).with_context(|| format!("Failed to read {}", input))?;
    let plain = legacy::decrypt_file(&input, &sealed)
        .with_context(|| format!("Failed to decrypt {}", input))?;
    tracing::info!("🔓 Decrypted {} ({} bytes)", input, plain.len());

    match output {
        Some(path) => std::fs::write(&path, &plain)
            .with_context(|| format!("Failed to write {}", path))?,
        None => std::io::stdout()
            .write_all(&plain)
            .context("Failed to write to stdout")?,
    }

    Ok(())
}
