use serde::Deserialize;
use anyhow::{bail, Context, Result};
use std::time::Duration;

fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_worker_count() -> usize { 1 }
fn default_queue_poll_interval_ms() -> u64 { 100 }
fn default_rpc_max_retries() -> u8 { 3 }
fn default_rpc_retry_delay_ms() -> u64 { 500 }
fn default_metrics_port() -> u16 { 9100 }
fn default_raydium_api_url() -> String { "https://api-v3.raydium.io".to_string() }

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub solana_rpc_url: String,
    #[serde(default)]
    pub solana_wss_url: Option<String>,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,
    #[serde(default = "default_rpc_max_retries")]
    pub rpc_max_retries: u8,
    #[serde(default = "default_rpc_retry_delay_ms")]
    pub rpc_retry_delay_ms: u64,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Volume 24h minimal (en USD) pour qu'un pool du catalogue soit importé.
    #[serde(default)]
    pub min_pool_volume: f64,
    #[serde(default = "default_raydium_api_url")]
    pub raydium_api_url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>().context("Configuration invalide")?;
        config.validate()
    }

    /// Même chose que `load`, à partir d'une liste explicite de variables.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Config>(vars).context("Configuration invalide")?;
        config.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.worker_count == 0 {
            bail!("WORKER_COUNT doit être au moins 1");
        }
        Ok(self)
    }

    /// URL websocket : SOLANA_WSS_URL si présente, sinon dérivée de l'URL RPC.
    pub fn wss_url(&self) -> String {
        if let Some(url) = &self.solana_wss_url {
            return url.clone();
        }
        if let Some(rest) = self.solana_rpc_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.solana_rpc_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.solana_rpc_url.clone()
        }
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_apply_when_only_rpc_url_is_set() {
        let config = Config::from_vars(vars(&[("SOLANA_RPC_URL", "https://rpc.example.org")])).unwrap();
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.queue_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.rpc_max_retries, 3);
        assert_eq!(config.metrics_port, 9100);
        assert_eq!(config.min_pool_volume, 0.0);
        assert_eq!(config.wss_url(), "wss://rpc.example.org");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = Config::from_vars(vars(&[
            ("SOLANA_RPC_URL", "http://localhost:8899"),
            ("SOLANA_WSS_URL", "ws://localhost:8900"),
            ("WORKER_COUNT", "4"),
            ("MIN_POOL_VOLUME", "2500.5"),
        ]))
        .unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.min_pool_volume, 2500.5);
        assert_eq!(config.wss_url(), "ws://localhost:8900");
    }

    #[test]
    fn missing_rpc_url_or_zero_workers_is_rejected() {
        assert!(Config::from_vars(vars(&[("WORKER_COUNT", "2")])).is_err());
        assert!(Config::from_vars(vars(&[
            ("SOLANA_RPC_URL", "http://localhost:8899"),
            ("WORKER_COUNT", "0"),
        ]))
        .is_err());
    }
}
