//! Environment-driven service configuration.

use std::env;

const DEFAULT_PORT: u16 = 8443;
const DEFAULT_CERT_PATH: &str = "/tls/cert";
const DEFAULT_KEY_PATH: &str = "/tls/key";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub cert_path: String,
    pub key_path: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = match env::var("WEBHOOK_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid WEBHOOK_PORT {raw:?}: {e}"))?,
            Err(_) => DEFAULT_PORT,
        };
        Ok(Self {
            port,
            cert_path: env::var("WEBHOOK_TLS_CERT").unwrap_or_else(|_| DEFAULT_CERT_PATH.into()),
            key_path: env::var("WEBHOOK_TLS_KEY").unwrap_or_else(|_| DEFAULT_KEY_PATH.into()),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cert_path: DEFAULT_CERT_PATH.into(),
            key_path: DEFAULT_KEY_PATH.into(),
        }
    }
}
