//! Bidirectional sync orchestration: claim/assemble/enqueue loop,
//! checkpointing, tip refresh, and the live tail.

pub mod driver;
pub mod events;
pub mod state;

pub use driver::{Driver, Shutdown, SyncConfig};
pub use events::SyncEvent;
