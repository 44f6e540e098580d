//! JSON-RPC transport: HTTP client for bulk historical fetches, WS
//! subscription for the live tail, and the shared error taxonomy.

pub mod client;
pub mod error;
pub mod types;
pub mod ws;

pub use client::RpcClient;
pub use error::RpcError;
pub use ws::HeadEvent;
