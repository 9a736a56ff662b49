//! Environment-driven server configuration.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::estimator::EstimatorConfig;
use crate::predict::UnavailablePolicy;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_DB_NAME: &str = "grid_data.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DDSE_ADDR={value:?} is not a socket address: {source}")]
    InvalidAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("{var}={value:?} is not a boolean")]
    InvalidBool { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub estimator: EstimatorConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_addr = env::var("DDSE_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        let addr = raw_addr
            .trim()
            .parse()
            .map_err(|source| ConfigError::InvalidAddr {
                value: raw_addr.clone(),
                source,
            })?;

        let db_path = env::var("GRID_DB_NAME")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_NAME.to_string())
            .into();

        let strict = match env::var("DDSE_STRICT_REGRESSORS") {
            Ok(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidBool {
                var: "DDSE_STRICT_REGRESSORS",
                value: raw,
            })?,
            Err(_) => false,
        };
        let unavailable_policy = if strict {
            UnavailablePolicy::Strict
        } else {
            UnavailablePolicy::Propagate
        };

        Ok(Self {
            addr,
            db_path,
            estimator: EstimatorConfig { unavailable_policy },
        })
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
