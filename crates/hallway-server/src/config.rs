use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::warn;

use hallway_api::gifs::DEFAULT_TENOR_URL;

/// Placeholder JWT secrets that MUST NOT be used outside dev mode.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

const DEV_SECRET: &str = "dev-secret-change-me";

/// Server configuration, read from `HALLWAY_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub storage_dir: PathBuf,
    /// Tenor key; GIF search answers 503 without one.
    pub tenor_api_key: Option<String>,
    pub tenor_url: String,
    pub dev: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let dev = matches!(var("HALLWAY_DEV").as_deref(), Some("1" | "true" | "yes"));

        let jwt_secret = match var("HALLWAY_JWT_SECRET") {
            Some(s) if !PLACEHOLDER_SECRETS.contains(&s.as_str()) => s,
            _ if dev => {
                warn!("HALLWAY_JWT_SECRET unset or placeholder; using the dev secret");
                DEV_SECRET.to_string()
            }
            _ => bail!("HALLWAY_JWT_SECRET is unset or still a placeholder (set HALLWAY_DEV=1 for local runs)"),
        };

        let port = match var("HALLWAY_PORT") {
            Some(p) => p.parse().with_context(|| format!("invalid HALLWAY_PORT '{}'", p))?,
            None => 3000,
        };

        Ok(Self {
            host: var("HALLWAY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var("HALLWAY_DB_PATH").unwrap_or_else(|| "hallway.db".into()).into(),
            jwt_secret,
            storage_dir: var("HALLWAY_STORAGE_DIR").unwrap_or_else(|| "./storage".into()).into(),
            tenor_api_key: var("HALLWAY_TENOR_API_KEY"),
            tenor_url: var("HALLWAY_TENOR_URL").unwrap_or_else(|| DEFAULT_TENOR_URL.into()),
            dev,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_with_real_secret() {
        let cfg = load(&[("HALLWAY_JWT_SECRET", "0c8f1d2e")]).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.tenor_url, DEFAULT_TENOR_URL);
        assert!(cfg.tenor_api_key.is_none());
        assert!(!cfg.dev);
        assert_eq!(cfg.addr().unwrap().port(), 3000);
    }

    #[test]
    fn placeholder_secret_refused_unless_dev() {
        assert!(load(&[]).is_err());
        assert!(load(&[("HALLWAY_JWT_SECRET", "dev-secret-change-me")]).is_err());

        let cfg = load(&[("HALLWAY_DEV", "1")]).unwrap();
        assert_eq!(cfg.jwt_secret, DEV_SECRET);
    }

    #[test]
    fn bad_port_is_an_error() {
        assert!(load(&[("HALLWAY_JWT_SECRET", "x"), ("HALLWAY_PORT", "eighty")]).is_err());
    }

    #[test]
    fn blank_tenor_key_counts_as_unset() {
        let cfg = load(&[("HALLWAY_JWT_SECRET", "x"), ("HALLWAY_TENOR_API_KEY", "  ")]).unwrap();
        assert!(cfg.tenor_api_key.is_none());
    }
}
