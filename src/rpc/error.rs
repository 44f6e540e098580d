//! Error taxonomy for the RPC client: transport-transient, RPC-logical,
//! and decode/parse failures, each with its own retry treatment.

#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("json-rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("websocket subscription lost: {0}")]
    SubscriptionLost(String),
}

impl RpcError {
    /// Transport and timeout failures are retryable; a JSON-RPC error
    /// payload on a single call is treated as transient within its batch
    /// so it retries too. Decode failures and lost subscriptions are not
    /// retried by the RPC layer itself — callers handle those.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::Timeout(_) | RpcError::Rpc { .. })
    }

    /// Distinguishes a timeout, which rolls claimed pointers back, from
    /// other retryable transport errors.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout(_))
    }
}

impl From<jsonrpsee::core::ClientError> for RpcError {
    /// `tokio::time::timeout` wraps every call site in `rpc::client`, so
    /// jsonrpsee's own `RequestTimeout` (which carries no duration) is
    /// rare in practice; it still maps to a `Timeout`, just with an
    /// unknown elapsed time, rather than being swallowed as `Transport`.
    fn from(value: jsonrpsee::core::ClientError) -> Self {
        match value {
            jsonrpsee::core::ClientError::Call(call_error) => RpcError::Rpc {
                code: call_error.code(),
                message: call_error.message().to_string(),
            },
            jsonrpsee::core::ClientError::RequestTimeout => {
                RpcError::Timeout(std::time::Duration::ZERO)
            }
            other => RpcError::Transport(other.to_string()),
        }
    }
}
