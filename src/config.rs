use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Key material configuration.
///
/// The directory holds the master key (`master.key`) and the transport
/// key pair (`controller_private.pem`, `controller_public.pem`). It is
/// created owner-only if missing.
#[derive(Debug, Deserialize, Clone)]
pub struct KeysConfig {
    #[serde(default = "default_keys_dir")]
    pub dir: PathBuf,
    /// RSA modulus size for a freshly generated transport key pair
    #[serde(default = "default_rsa_bits")]
    pub rsa_bits: usize,
    /// Load-or-generate attempts before startup is aborted
    #[serde(default = "default_init_attempts")]
    pub init_attempts: u32,
    #[serde(default = "default_init_backoff_ms")]
    pub init_backoff_ms: u64,
}

fn default_keys_dir() -> PathBuf {
    PathBuf::from("./secure_keys")
}

fn default_rsa_bits() -> usize {
    4096
}

fn default_init_attempts() -> u32 {
    3
}

fn default_init_backoff_ms() -> u64 {
    500
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            dir: default_keys_dir(),
            rsa_bits: default_rsa_bits(),
            init_attempts: default_init_attempts(),
            init_backoff_ms: default_init_backoff_ms(),
        }
    }
}

impl KeysConfig {
    pub fn master_key_path(&self) -> PathBuf {
        self.dir.join("master.key")
    }

    pub fn init_backoff(&self) -> Duration {
        Duration::from_millis(self.init_backoff_ms)
    }
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub keys: KeysConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default config file
            .add_source(File::with_name("config/default").required(false))
            // Override with local config if present
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (prefix: OTPGATE_)
            // e.g., OTPGATE_SERVER__PORT, OTPGATE_KEYS__DIR
            .add_source(
                Environment::with_prefix("OTPGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
