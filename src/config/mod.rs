//! Resolved runtime configuration, merged CLI > environment > defaults:
//! a plain struct with a `Default` impl drawing on a `constants` module.

pub mod cli;
pub mod constants;

use std::env;
use std::time::Duration;

use crate::observability::LogLevel;
use cli::Cli;
use constants::*;

/// Fully resolved configuration for one indexer run.
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub database_url: String,

    pub rpc_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub max_rpc_batch: usize,

    pub blocks_per_batch: u64,
    pub total_blocks_per_round: u64,
    pub parallel_requests: usize,
    pub fetch_concurrency: usize,
    pub receipt_fetch_concurrency: usize,
    pub token_probe_concurrency: usize,

    pub writer_concurrency: usize,
    pub writer_concurrency_ceiling: usize,
    pub write_batch_size: usize,
    pub queue_high_water: usize,
    pub queue_scale_threshold: usize,
    pub sql_placeholder_limit: usize,

    pub checkpoint_interval_batches: u64,
    pub tip_refresh_interval_batches: u64,
    pub ws_watchdog: Duration,
    pub poll_interval: Duration,

    pub shutdown_timeout: Duration,
    pub log_level: LogLevel,
}

fn env_string(key: &str) -> Option<String> {
    env::var(format!("CHAIN_INDEXER_{key}")).ok()
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

impl Config {
    /// Merges CLI flags over environment variables over built-in
    /// defaults. Fails fast if `rpc_url`/`database_url` are missing
    /// everywhere.
    pub fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let rpc_url = cli
            .rpc_url
            .clone()
            .or_else(|| env_string("RPC_URL"))
            .ok_or_else(|| anyhow::anyhow!("rpc_url is required (--rpc-url or CHAIN_INDEXER_RPC_URL)"))?;

        let database_url = cli
            .database_url
            .clone()
            .or_else(|| env_string("DATABASE_URL"))
            .ok_or_else(|| {
                anyhow::anyhow!("database_url is required (--database-url or CHAIN_INDEXER_DATABASE_URL)")
            })?;

        let ws_url = cli
            .ws_url
            .clone()
            .or_else(|| env_string("WS_URL"))
            .or_else(|| derive_ws_url(&rpc_url));

        let writer_concurrency = cli
            .writer_concurrency
            .or_else(|| env_parsed("WRITER_CONCURRENCY"))
            .unwrap_or(DEFAULT_WRITER_CONCURRENCY);

        Ok(Self {
            rpc_timeout: Duration::from_millis(
                cli.rpc_timeout_ms
                    .or_else(|| env_parsed("RPC_TIMEOUT_MS"))
                    .unwrap_or(DEFAULT_RPC_TIMEOUT_MS),
            ),
            retry_attempts: cli
                .retry_attempts
                .or_else(|| env_parsed("RETRY_ATTEMPTS"))
                .unwrap_or(DEFAULT_RETRY_ATTEMPTS),
            retry_delay: Duration::from_millis(
                cli.retry_delay_ms
                    .or_else(|| env_parsed("RETRY_DELAY_MS"))
                    .unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
            max_rpc_batch: cli
                .max_rpc_batch
                .or_else(|| env_parsed("MAX_RPC_BATCH"))
                .unwrap_or(DEFAULT_MAX_RPC_BATCH),

            blocks_per_batch: cli
                .blocks_per_batch
                .or_else(|| env_parsed("BLOCKS_PER_BATCH"))
                .unwrap_or(DEFAULT_BLOCKS_PER_BATCH),
            total_blocks_per_round: DEFAULT_TOTAL_BLOCKS_PER_ROUND,
            parallel_requests: cli
                .parallel_requests
                .or_else(|| env_parsed("PARALLEL_REQUESTS"))
                .unwrap_or(DEFAULT_PARALLEL_REQUESTS),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            receipt_fetch_concurrency: DEFAULT_RECEIPT_FETCH_CONCURRENCY,
            token_probe_concurrency: DEFAULT_TOKEN_PROBE_CONCURRENCY,

            writer_concurrency,
            writer_concurrency_ceiling: writer_concurrency.max(DEFAULT_WRITER_CONCURRENCY_CEILING),
            write_batch_size: cli
                .write_batch_size
                .or_else(|| env_parsed("WRITE_BATCH_SIZE"))
                .unwrap_or(DEFAULT_WRITE_BATCH_SIZE),
            queue_high_water: cli
                .queue_high_water
                .or_else(|| env_parsed("QUEUE_HIGH_WATER"))
                .unwrap_or(DEFAULT_QUEUE_HIGH_WATER),
            queue_scale_threshold: DEFAULT_QUEUE_SCALE_THRESHOLD,
            sql_placeholder_limit: DEFAULT_SQL_PLACEHOLDER_LIMIT,

            checkpoint_interval_batches: cli
                .checkpoint_interval
                .or_else(|| env_parsed("CHECKPOINT_INTERVAL"))
                .unwrap_or(DEFAULT_CHECKPOINT_INTERVAL_BATCHES),
            tip_refresh_interval_batches: cli
                .tip_refresh_interval
                .or_else(|| env_parsed("TIP_REFRESH_INTERVAL"))
                .unwrap_or(DEFAULT_TIP_REFRESH_INTERVAL_BATCHES),
            ws_watchdog: Duration::from_millis(
                cli.ws_watchdog_ms
                    .or_else(|| env_parsed("WS_WATCHDOG_MS"))
                    .unwrap_or(DEFAULT_WS_WATCHDOG_MS),
            ),
            poll_interval: Duration::from_millis(
                cli.poll_interval_ms
                    .or_else(|| env_parsed("POLL_INTERVAL_MS"))
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),

            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            log_level: cli.log.unwrap_or_default(),

            rpc_url,
            ws_url,
            database_url,
        })
    }
}

/// Derives a `ws://`/`wss://` URL from an `http://`/`https://` one by
/// scheme substitution, used as the fallback when `ws_url` isn't set.
fn derive_ws_url(rpc_url: &str) -> Option<String> {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        Some(format!("wss://{rest}"))
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        Some(format!("ws://{rest}"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_ws_url_substitutes_scheme() {
        assert_eq!(
            derive_ws_url("https://node.example.com:443"),
            Some("wss://node.example.com:443".to_string())
        );
        assert_eq!(
            derive_ws_url("http://localhost:8545"),
            Some("ws://localhost:8545".to_string())
        );
        assert_eq!(derive_ws_url("not-a-url"), None);
    }

    #[test]
    fn resolve_fails_fast_without_rpc_url() {
        // SAFETY: test-only env var manipulation, not shared across threads in this test binary.
        std::env::remove_var("CHAIN_INDEXER_RPC_URL");
        std::env::remove_var("CHAIN_INDEXER_DATABASE_URL");
        let cli = Cli {
            command: None,
            rpc_url: None,
            ws_url: None,
            database_url: Some("postgres://x".into()),
            rpc_timeout_ms: None,
            retry_attempts: None,
            retry_delay_ms: None,
            max_rpc_batch: None,
            blocks_per_batch: None,
            parallel_requests: None,
            writer_concurrency: None,
            write_batch_size: None,
            queue_high_water: None,
            checkpoint_interval: None,
            tip_refresh_interval: None,
            ws_watchdog_ms: None,
            poll_interval_ms: None,
            log: None,
        };
        assert!(Config::resolve(&cli).is_err());
    }
}
