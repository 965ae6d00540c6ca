//! Generates the server's RSA key pair.
//!
//! Usage: `make_server_key [path] [--force]`. The path defaults to
//! `SERVER_PRIVATE_KEY` or `server_key.pem`. An existing key is only
//! replaced with `--force`. The public key is printed for client builds.

use std::path::PathBuf;

use anyhow::{Context, Result};
use idol_gateway::crypto::asymmetric::ServerKey;
use rand::rngs::OsRng;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

const KEY_BITS: usize = 1024;

fn print_public_key(key: &RsaPublicKey) -> Result<()> {
    let pem = key
        .to_public_key_pem(LineEnding::LF)
        .context("Failed to encode public key")?;
    println!("{}", pem);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .init();
    dotenvy::dotenv().ok();

    let mut force = false;
    let mut path = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--force" | "-f" => force = true,
            _ if path.is_none() => path = Some(PathBuf::from(&arg)),
            _ => anyhow::bail!("Usage: make_server_key [path] [--force]"),
        }
    }
    let path = path
        .or_else(|| std::env::var("SERVER_PRIVATE_KEY").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("server_key.pem"));

    if path.exists() {
        let existing = ServerKey::load(&path)
            .with_context(|| format!("{} exists but is not a valid key", path.display()))?;
        print_public_key(&existing.public_key())?;
        if !force {
            tracing::warn!(
                "⚠️  {} already exists, not overwritten (pass --force to replace it)",
                path.display()
            );
            return Ok(());
        }
        tracing::warn!("⚠️  Overwriting {}", path.display());
    }

    let key = RsaPrivateKey::new(&mut OsRng, KEY_BITS).context("Key generation failed")?;
    let pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .context("Failed to encode private key")?;
    std::fs::write(&path, pem.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("✅ Wrote {}-bit server key to {}", KEY_BITS, path.display());

    print_public_key(&key.to_public_key())
}
