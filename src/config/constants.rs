//! Default values for the runtime tunables that can be overridden via
//! CLI flags or environment variables.

pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_RPC_BATCH: usize = 50;

pub const DEFAULT_BLOCKS_PER_BATCH: u64 = 100;
pub const DEFAULT_TOTAL_BLOCKS_PER_ROUND: u64 = 1_000;
pub const DEFAULT_PARALLEL_REQUESTS: usize = 20;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 2;
pub const DEFAULT_RECEIPT_FETCH_CONCURRENCY: usize = 15;
pub const DEFAULT_TOKEN_PROBE_CONCURRENCY: usize = 3;

pub const DEFAULT_WRITER_CONCURRENCY: usize = 15;
pub const DEFAULT_WRITER_CONCURRENCY_CEILING: usize = 30;
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 200;
pub const DEFAULT_QUEUE_HIGH_WATER: usize = 50_000;
pub const DEFAULT_QUEUE_SCALE_THRESHOLD: usize = 1_000;
pub const DEFAULT_SQL_PLACEHOLDER_LIMIT: usize = 65_000;

pub const DEFAULT_CHECKPOINT_INTERVAL_BATCHES: u64 = 100;
pub const DEFAULT_TIP_REFRESH_INTERVAL_BATCHES: u64 = 200;
pub const DEFAULT_WS_WATCHDOG_MS: u64 = 60_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 60_000;

pub const CRATE_NAME: &str = "chain_indexer";
