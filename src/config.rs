use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// Default CROSS-mode pad shipped with the stock client.
pub const DEFAULT_BASE_XORPAD: &[u8; 32] = b"eit4Ahph4aiX4ohmephuobei6SooX9xo";
/// Default CROSS-mode application key shipped with the stock client.
pub const DEFAULT_APPLICATION_KEY: &[u8; 32] = b"b6e6c940a93af2357ea3e0ace0b98afc";
/// Consumer key every stock client sends.
pub const DEFAULT_CONSUMER_KEY: &str = "lovelive_test";
/// Authenticated session lifetime in seconds (3 days).
pub const DEFAULT_SESSION_EXPIRY: i64 = 259_200;

/// The application's configuration.
///
/// Built once at startup and shared read-only for the life of the process.
#[derive(Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// The URL of the PostgreSQL database. `None` selects the in-memory stores.
    pub database_url: Option<String>,
    /// Path to the server's RSA private key (PEM).
    pub server_private_key: PathBuf,
    /// Secret used to sign session token envelopes.
    pub secret_key: Zeroizing<Vec<u8>>,
    /// 32-byte pad used to derive the CROSS-mode XMC key.
    pub base_xorpad: Zeroizing<[u8; 32]>,
    /// 32-byte application key used to derive the CROSS-mode XMC key.
    pub application_key: Zeroizing<[u8; 32]>,
    /// The `consumerKey` clients must present.
    pub consumer_key: String,
    /// Whether X-Message-Code verification is enforced at all.
    pub verify_xmc: bool,
    /// Authenticated session lifetime in seconds; `0` disables it.
    pub session_expiry: i64,
    /// Period of the background expiry sweep.
    pub sweep_interval: Duration,
    /// Value of the `Server-Version` response header.
    pub server_version: String,
    /// Maintenance mode is on while this file exists.
    pub maintenance_file: PathBuf,
}

impl Config {
    /// Creates a `Config` with the stock defaults and the given token secret.
    pub fn new(secret_key: Vec<u8>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 51376)),
            database_url: None,
            server_private_key: PathBuf::from("server_key.pem"),
            secret_key: Zeroizing::new(secret_key),
            base_xorpad: Zeroizing::new(*DEFAULT_BASE_XORPAD),
            application_key: Zeroizing::new(*DEFAULT_APPLICATION_KEY),
            consumer_key: DEFAULT_CONSUMER_KEY.to_string(),
            verify_xmc: true,
            session_expiry: DEFAULT_SESSION_EXPIRY,
            sweep_interval: Duration::from_secs(30),
            server_version: "59.4".to_string(),
            maintenance_file: PathBuf::from("maintenance.txt"),
        }
    }

    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let secret_key = env::var("SECRET_KEY")
            .context("SECRET_KEY must be set (generate with: openssl rand -hex 32)")?;
        if secret_key.is_empty() {
            anyhow::bail!("SECRET_KEY must not be empty");
        }

        let mut config = Self::new(secret_key.into_bytes());

        if let Ok(addr) = env::var("BIND_ADDR") {
            config.bind_addr = addr.parse().context("Invalid BIND_ADDR")?;
        }

        config.database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        if let Ok(path) = env::var("SERVER_PRIVATE_KEY") {
            config.server_private_key = PathBuf::from(path);
        }

        if let Ok(pad) = env::var("BASE_XORPAD") {
            config.base_xorpad = Zeroizing::new(fixed_secret("BASE_XORPAD", pad)?);
        }

        if let Ok(key) = env::var("APPLICATION_KEY") {
            config.application_key = Zeroizing::new(fixed_secret("APPLICATION_KEY", key)?);
        }

        if let Ok(key) = env::var("CONSUMER_KEY") {
            config.consumer_key = key;
        }

        if let Ok(flag) = env::var("VERIFY_XMC") {
            config.verify_xmc = parse_flag(&flag).context("Invalid VERIFY_XMC")?;
        }

        config.session_expiry = env::var("SESSION_EXPIRY")
            .unwrap_or_else(|_| DEFAULT_SESSION_EXPIRY.to_string())
            .parse()
            .context("Invalid SESSION_EXPIRY")?;

        let sweep_secs: u64 = env::var("SESSION_SWEEP_INTERVAL")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("Invalid SESSION_SWEEP_INTERVAL")?;
        if sweep_secs == 0 {
            anyhow::bail!("SESSION_SWEEP_INTERVAL must be at least 1 second");
        }
        config.sweep_interval = Duration::from_secs(sweep_secs);

        if let Ok(version) = env::var("SERVER_VERSION") {
            validate_version(&version)?;
            config.server_version = version;
        }

        if let Ok(path) = env::var("MAINTENANCE_FILE") {
            config.maintenance_file = PathBuf::from(path);
        }

        Ok(config)
    }
}

/// Parses a 32-byte process-wide secret given as its raw text.
fn fixed_secret(name: &str, mut value: String) -> Result<[u8; 32]> {
    let result: Result<[u8; 32]> = value
        .as_bytes()
        .try_into()
        .map_err(|_| anyhow::anyhow!("{} must be exactly 32 bytes", name));
    zeroize::Zeroize::zeroize(&mut value);
    result
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {:?}", other),
    }
}

fn validate_version(version: &str) -> Result<()> {
    let (major, minor) = version
        .split_once('.')
        .context("SERVER_VERSION must look like <major>.<minor>")?;
    major.parse::<u32>().context("Invalid SERVER_VERSION major")?;
    minor.parse::<u32>().context("Invalid SERVER_VERSION minor")?;
    Ok(())
}
