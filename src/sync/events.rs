//! Live-progress events emitted over a broadcast channel, consumed by the
//! CLI's startup banner and progress logging.

#[derive(Debug, Clone)]
pub enum SyncEvent {
    BatchClaimed { forward_lo: u64, forward_hi: u64, backward_lo: u64, backward_hi: u64 },
    BatchCommitted { blocks: u64 },
    TipAdvanced { new_tip: u64 },
    Synced,
    LiveBlock(u64),
}

pub type SyncEventSender = tokio::sync::broadcast::Sender<SyncEvent>;

pub fn channel() -> (SyncEventSender, tokio::sync::broadcast::Receiver<SyncEvent>) {
    tokio::sync::broadcast::channel(256)
}
