//! Top-level error aggregate. Per-module error enums (`rpc::RpcError`,
//! `store::WriteError`, …) are the ones actually matched on; this type
//! exists so `main` has one `Result` to unwrap.

use crate::rpc::RpcError;
use crate::store::WriteError;

#[derive(thiserror::Error, Debug)]
pub enum IndexerError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("write queue error: {0}")]
    Write(#[from] WriteError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, IndexerError>;
