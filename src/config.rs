// ⚙️ Configuration
//
// Read from the environment (optionally seeded by a `.env` file).

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::str::FromStr;

pub const DEFAULT_DB_PATH: &str = "credit_platform.db";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite file, or `:memory:`
    pub db_path: String,
    pub bind_addr: String,
    pub port: u16,
    /// Origin allowed by CORS (credentials enabled)
    pub cors_origin: String,
    /// Rows per INSERT statement during CSV import
    pub import_chunk_size: usize,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: DEFAULT_DB_PATH.to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            port: DEFAULT_PORT,
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            import_chunk_size: crate::store::DEFAULT_CHUNK_SIZE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read the process environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars().collect())
    }

    /// Build from an explicit variable map
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let defaults = Config::default();

        let config = Config {
            db_path: vars
                .get("CREDIT_DB_PATH")
                .cloned()
                .unwrap_or(defaults.db_path),
            bind_addr: vars
                .get("BIND_ADDR")
                .cloned()
                .unwrap_or(defaults.bind_addr),
            port: parse_var(&vars, "PORT", defaults.port)?,
            cors_origin: vars
                .get("CORS_ORIGIN")
                .cloned()
                .unwrap_or(defaults.cors_origin),
            import_chunk_size: parse_var(&vars, "IMPORT_CHUNK_SIZE", defaults.import_chunk_size)?,
            max_upload_bytes: parse_var(&vars, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
        };

        if config.import_chunk_size == 0 {
            bail!("IMPORT_CHUNK_SIZE must be greater than 0");
        }

        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
    }
}
