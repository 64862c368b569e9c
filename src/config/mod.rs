//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The realtime API key is wrapped in `SecretString` so it never
//! shows up in logs or `Debug` output.

pub mod secrets;

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::resolution::ResolutionConstraints;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub api_key: SecretString,
    pub client_id: String,
    pub queue_capacity: usize,
    /// TOML file with the default resolution constraints.
    pub constraints_file: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration, reading a `.env` file first if there is one.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self> {
        let queue_capacity = match std::env::var("TRACKQ_QUEUE_CAPACITY") {
            Ok(raw) => parse_capacity(&raw)?,
            Err(_) => DEFAULT_QUEUE_CAPACITY,
        };

        Ok(Self {
            api_key: SecretString::from(required_var("TRACKQ_API_KEY")?),
            client_id: required_var("TRACKQ_CLIENT_ID")?,
            queue_capacity,
            constraints_file: std::env::var("TRACKQ_CONSTRAINTS_FILE").ok().map(PathBuf::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Constraints from `constraints_file`, if one is configured.
    pub fn constraints(&self) -> Result<Option<ResolutionConstraints>> {
        self.constraints_file
            .as_deref()
            .map(ResolutionConstraints::load)
            .transpose()
    }
}

fn parse_capacity(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(Error::Config(format!(
            "TRACKQ_QUEUE_CAPACITY must be a positive integer, got {raw:?}"
        ))),
        Ok(capacity) => Ok(capacity),
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
