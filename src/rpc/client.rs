//! The JSON-RPC client: a thin wrapper around a jsonrpsee client exposing
//! exactly the methods the rest of the indexer needs, with retry baked in
//! at the call boundary rather than left to callers.

use std::sync::Arc;
use std::time::Duration;

use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use tracing::{debug, warn};

use crate::config::Config;
use crate::rpc::error::RpcError;
use crate::rpc::types::{RawBlock, RawReceipt};

/// Blanket retry wrapper used by every method below: retries retryable
/// errors up to `retry_attempts` times, with the delay scaled linearly
/// by attempt number (`retry_delay × attempt`) rather than held flat.
/// Non-retryable errors (decode failures) return immediately.
async fn retry<T, F, Fut>(config: &Config, label: &str, mut call: F) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.retry_attempts => {
                attempt += 1;
                let delay = config.retry_delay * attempt;
                warn!(call = label, attempt, delay = ?delay, error = %err, "retrying rpc call");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Wraps a jsonrpsee call with the configured timeout, mapping an
/// elapsed timeout into `RpcError::Timeout` carrying the real duration
/// (jsonrpsee's own `RequestTimeout` variant doesn't carry one).
async fn with_timeout<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, jsonrpsee::core::ClientError>>,
) -> Result<T, RpcError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(RpcError::from(err)),
        Err(_) => Err(RpcError::Timeout(timeout)),
    }
}

/// HTTP JSON-RPC client for bulk historical fetches. WebSocket handling
/// lives in `rpc::ws` since it needs its own reconnect/watchdog loop.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<HttpClient>,
    config: Config,
}

impl RpcClient {
    pub fn new(config: &Config) -> Result<Self, RpcError> {
        let inner = HttpClientBuilder::default()
            .request_timeout(config.rpc_timeout)
            .max_request_size(64 * 1024 * 1024)
            .max_response_size(64 * 1024 * 1024)
            .build(&config.rpc_url)
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(inner),
            config: config.clone(),
        })
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        retry(&self.config, "eth_chainId", || async {
            let hex: String =
                with_timeout(self.config.rpc_timeout, self.inner.request("eth_chainId", rpc_params![])).await?;
            u64::from_str_radix(hex.trim_start_matches("0x"), 16)
                .map_err(|e| RpcError::Decode(e.to_string()))
        })
        .await
    }

    pub async fn latest_block_number(&self) -> Result<u64, RpcError> {
        retry(&self.config, "eth_blockNumber", || async {
            let hex: String = with_timeout(
                self.config.rpc_timeout,
                self.inner.request("eth_blockNumber", rpc_params![]),
            )
            .await?;
            u64::from_str_radix(hex.trim_start_matches("0x"), 16)
                .map_err(|e| RpcError::Decode(e.to_string()))
        })
        .await
    }

    /// Fetches one block with full transaction objects inlined.
    pub async fn block_by_number(&self, number: u64) -> Result<Option<RawBlock>, RpcError> {
        retry(&self.config, "eth_getBlockByNumber", || async {
            let params = rpc_params![format!("0x{number:x}"), true];
            with_timeout(
                self.config.rpc_timeout,
                self.inner.request("eth_getBlockByNumber", params),
            )
            .await
        })
        .await
    }

    /// Batches `eth_getBlockByNumber` across a contiguous range, preserving
    /// request order via jsonrpsee's native batch support so the response
    /// vector lines up positionally with `numbers`.
    pub async fn blocks_by_number_batch(&self, numbers: &[u64]) -> Result<Vec<Option<RawBlock>>, RpcError> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let mut results = Vec::with_capacity(numbers.len());
        for chunk in numbers.chunks(self.config.max_rpc_batch) {
            let chunk = chunk.to_vec();
            let batch = retry(&self.config, "eth_getBlockByNumber#batch", || {
                let chunk = chunk.clone();
                async move {
                    let mut builder = jsonrpsee::core::client::BatchRequestBuilder::new();
                    for number in &chunk {
                        builder
                            .insert("eth_getBlockByNumber", rpc_params![format!("0x{number:x}"), true])
                            .map_err(|e| RpcError::Transport(e.to_string()))?;
                    }
                    let response = with_timeout(self.config.rpc_timeout, self.inner.batch_request(builder))
                        .await
                        .map_err(|e| match e {
                            RpcError::Transport(msg) => RpcError::Transport(msg),
                            other => other,
                        })?;
                    let mut out = Vec::with_capacity(chunk.len());
                    for entry in response.into_iter() {
                        match entry {
                            Ok(value) => out.push(value),
                            Err(err) => {
                                return Err(RpcError::Rpc {
                                    code: err.code(),
                                    message: err.message().to_string(),
                                })
                            }
                        }
                    }
                    Ok(out)
                }
            })
            .await?;
            results.extend(batch);
        }
        Ok(results)
    }

    /// Batches `eth_getTransactionReceipt` for every hash in `hashes`, in
    /// the same id-order-preserving fashion as `blocks_by_number_batch`.
    pub async fn receipts_batch(&self, hashes: &[String]) -> Result<Vec<RawReceipt>, RpcError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let mut results = Vec::with_capacity(hashes.len());
        for chunk in hashes.chunks(self.config.max_rpc_batch) {
            let chunk = chunk.to_vec();
            let batch = retry(&self.config, "eth_getTransactionReceipt#batch", || {
                let chunk = chunk.clone();
                async move {
                    let mut builder = jsonrpsee::core::client::BatchRequestBuilder::new();
                    for hash in &chunk {
                        builder
                            .insert("eth_getTransactionReceipt", rpc_params![hash.clone()])
                            .map_err(|e| RpcError::Transport(e.to_string()))?;
                    }
                    let response = with_timeout(self.config.rpc_timeout, self.inner.batch_request(builder)).await?;
                    let mut out = Vec::with_capacity(chunk.len());
                    for entry in response.into_iter() {
                        match entry {
                            Ok(value) => out.push(value),
                            Err(err) => {
                                return Err(RpcError::Rpc {
                                    code: err.code(),
                                    message: err.message().to_string(),
                                })
                            }
                        }
                    }
                    Ok(out)
                }
            })
            .await?;
            results.extend(batch);
        }
        Ok(results)
    }

    /// Fetches deployed bytecode for a set of addresses at `block_number`,
    /// used to classify fresh contract-creation addresses.
    pub async fn code_batch(&self, addresses: &[String], block_number: u64) -> Result<Vec<String>, RpcError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let tag = format!("0x{block_number:x}");
        let mut results = Vec::with_capacity(addresses.len());
        for chunk in addresses.chunks(self.config.max_rpc_batch) {
            let chunk = chunk.to_vec();
            let tag = tag.clone();
            let batch = retry(&self.config, "eth_getCode#batch", || {
                let chunk = chunk.clone();
                let tag = tag.clone();
                async move {
                    let mut builder = jsonrpsee::core::client::BatchRequestBuilder::new();
                    for addr in &chunk {
                        builder
                            .insert("eth_getCode", rpc_params![addr.clone(), tag.clone()])
                            .map_err(|e| RpcError::Transport(e.to_string()))?;
                    }
                    let response = with_timeout(self.config.rpc_timeout, self.inner.batch_request(builder)).await?;
                    let mut out = Vec::with_capacity(chunk.len());
                    for entry in response.into_iter() {
                        match entry {
                            Ok(value) => out.push(value),
                            Err(err) => {
                                return Err(RpcError::Rpc {
                                    code: err.code(),
                                    message: err.message().to_string(),
                                })
                            }
                        }
                    }
                    Ok(out)
                }
            })
            .await?;
            results.extend(batch);
        }
        Ok(results)
    }

    /// A single `eth_call`, used by the token-probe stage for metadata and
    /// `supportsInterface` queries. Returns the raw hex return data; an
    /// empty `0x` is a valid (no-op) response the caller must handle, not
    /// an error.
    pub async fn call(&self, to: &str, data: &str, block_number: u64) -> Result<String, RpcError> {
        retry(&self.config, "eth_call", || async {
            let tx = serde_json::json!({ "to": to, "data": data });
            let tag = format!("0x{block_number:x}");
            with_timeout(
                self.config.rpc_timeout,
                self.inner.request("eth_call", rpc_params![tx, tag]),
            )
            .await
        })
        .await
    }

    pub async fn logs_in_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<crate::rpc::types::RawLog>, RpcError> {
        retry(&self.config, "eth_getLogs", || async {
            let filter = serde_json::json!({
                "fromBlock": format!("0x{from_block:x}"),
                "toBlock": format!("0x{to_block:x}"),
            });
            debug!(from_block, to_block, "fetching logs in range");
            with_timeout(self.config.rpc_timeout, self.inner.request("eth_getLogs", rpc_params![filter])).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use httptest::{
        matchers::{eq, json_decoded, request},
        responders::json_encoded,
        Expectation, Server,
    };

    use crate::config::cli::Cli;
    use crate::config::Config;
    use crate::rpc::RpcClient;

    fn cli_for(rpc_url: String) -> Cli {
        Cli {
            command: None,
            rpc_url: Some(rpc_url),
            ws_url: None,
            database_url: Some("postgres://x".into()),
            rpc_timeout_ms: None,
            retry_attempts: Some(0),
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
        }
    }

    #[tokio::test]
    async fn latest_block_number_parses_hex_quantity() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::body(json_decoded(eq(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "eth_blockNumber",
                "params": [],
            })))))
            .respond_with(json_encoded(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 0,
                "result": "0x3e8",
            }))),
        );

        let cli = cli_for(server.url("").to_string());
        let config = Config::resolve(&cli).expect("config resolves against mock server url");
        let client = RpcClient::new(&config).expect("client builds against mock server url");

        let number = client.latest_block_number().await.expect("mocked call succeeds");
        assert_eq!(number, 1000);
    }

    #[tokio::test]
    async fn chain_id_parses_hex_quantity() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::body(json_decoded(eq(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "eth_chainId",
                "params": [],
            })))))
            .respond_with(json_encoded(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 0,
                "result": "0x1",
            }))),
        );

        let cli = cli_for(server.url("").to_string());
        let config = Config::resolve(&cli).expect("config resolves against mock server url");
        let client = RpcClient::new(&config).expect("client builds against mock server url");

        let chain_id = client.chain_id().await.expect("mocked call succeeds");
        assert_eq!(chain_id, 1);
    }
}
