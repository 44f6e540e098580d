//! Bidirectional sync driver: drives `forward_block`/`backward_block`
//! toward each other under bounded concurrency, checkpoints periodically,
//! refreshes the tip, then follows the live tail via WS push or polling.
//! Cancellation is a flag plus a `Notify` rather than manual
//! `Future::poll`, since the rest of the loop is plain async/await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};

use crate::assembler::Assembler;
use crate::config::Config;
use crate::model::IndexerState;
use crate::rpc::{ws, HeadEvent, RpcClient};
use crate::store::WriteQueue;
use crate::sync::events::{SyncEvent, SyncEventSender};
use crate::sync::state;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub blocks_per_batch: u64,
    pub total_blocks_per_round: u64,
    pub parallel_requests: usize,
    pub checkpoint_interval_batches: u64,
    pub tip_refresh_interval_batches: u64,
    pub ws_watchdog: std::time::Duration,
    pub poll_interval: std::time::Duration,
    pub queue_high_water: usize,
}

/// Shared cancellation flag, signaled once and observed by every worker
/// and the live-tail loop.
pub struct Shutdown {
    flag: AtomicBool,
    notify: tokio::sync::Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            flag: AtomicBool::new(false),
            notify: tokio::sync::Notify::new(),
        })
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        if self.is_set() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Pure claim arithmetic, pulled out of `Driver::claim` so it can be
/// exercised without a live pool/RPC client. `forward`/`backward` are the
/// unindexed span's inclusive endpoints; returns the claimed heights plus
/// the pair's next values, or `None` once the span is closed.
fn compute_claim(forward: u64, backward: u64, total_blocks_per_round: u64) -> Option<(Vec<u64>, u64, u64)> {
    if forward > backward {
        return None;
    }

    let remaining = backward - forward + 1;
    let round = total_blocks_per_round.min(remaining);
    let forward_count = round / 2;
    let backward_count = round - forward_count;

    let forward_hi = forward + forward_count; // exclusive
    let mut claimed: Vec<u64> = (forward..forward_hi).collect();

    let (new_forward, new_backward) = if round == remaining {
        // This round exhausts the whole remaining span. Claim every
        // height in it and park both pointers past the meeting point
        // so `forward > backward` holds regardless of the split, even
        // when the span bottoms out at block 0.
        claimed.extend(forward_hi..=backward);
        (backward + 1, backward)
    } else {
        let backward_lo = backward - backward_count + 1; // inclusive
        claimed.extend(backward_lo..=backward);
        (forward_hi, backward - backward_count)
    };

    Some((claimed, new_forward, new_backward))
}

pub struct Driver {
    rpc: RpcClient,
    rpc_config: Config,
    pool: sqlx::PgPool,
    queue: Arc<WriteQueue>,
    assembler: Assembler,
    config: SyncConfig,
    pointers: Arc<RwLock<IndexerState>>,
    events: SyncEventSender,
    shutdown: Arc<Shutdown>,
    batches_since_checkpoint: Mutex<u64>,
    batches_since_tip_refresh: Mutex<u64>,
}

impl Driver {
    pub async fn new(
        rpc: RpcClient,
        rpc_config: Config,
        pool: sqlx::PgPool,
        queue: Arc<WriteQueue>,
        assembler: Assembler,
        config: SyncConfig,
        events: SyncEventSender,
        shutdown: Arc<Shutdown>,
    ) -> anyhow::Result<Self> {
        let persisted = state::load(&pool).await?;
        let tip = rpc.latest_block_number().await?;

        let initial = match persisted {
            Some(mut s) if s.forward_block.is_some() && s.backward_block.is_some() => {
                s.latest_block = Some(tip);
                s
            }
            _ => IndexerState {
                forward_block: Some(0),
                backward_block: Some(tip),
                latest_block: Some(tip),
                is_synced: false,
            },
        };

        Ok(Self {
            rpc,
            rpc_config,
            pool,
            queue,
            assembler,
            config,
            pointers: Arc::new(RwLock::new(initial)),
            events,
            shutdown,
            batches_since_checkpoint: Mutex::new(0),
            batches_since_tip_refresh: Mutex::new(0),
        })
    }

    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Runs the backfill to completion, then follows the live tail until
    /// cancelled.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.clone().backfill().await?;
        self.checkpoint().await?;
        let _ = self.events.send(SyncEvent::Synced);
        info!("backfill complete, entering live tail");
        self.live_tail().await
    }

    /// One claim: computes a batch split between the two pointers,
    /// advances them optimistically, and returns the claimed numbers (or
    /// `None` if the range is already closed). `forward`/`backward` are
    /// both still-unindexed heights — the unindexed span is the
    /// *inclusive* range `[forward, backward]` — so the claim arithmetic
    /// must account for both endpoints needing a row, not just one.
    async fn claim(&self) -> Option<(Vec<u64>, u64, u64)> {
        let mut pointers = self.pointers.write().await;
        let (Some(forward), Some(backward)) = (pointers.forward_block, pointers.backward_block) else {
            return None;
        };
        let (claimed, new_forward, new_backward) =
            compute_claim(forward, backward, self.config.total_blocks_per_round)?;

        pointers.forward_block = Some(new_forward);
        pointers.backward_block = Some(new_backward);

        let _ = self.events.send(SyncEvent::BatchClaimed {
            forward_lo: forward,
            forward_hi: new_forward,
            backward_lo: new_backward,
            backward_hi: backward,
        });

        Some((claimed, forward, backward))
    }

    /// Rolls a claimed range back after a transport timeout.
    async fn rollback(&self, forward_before: u64, backward_before: u64) {
        let mut pointers = self.pointers.write().await;
        pointers.forward_block = Some(forward_before);
        pointers.backward_block = Some(backward_before);
    }

    async fn backfill(self: Arc<Self>) -> anyhow::Result<()> {
        let worker_count = self.config.parallel_requests.min(2).max(1);
        let mut handles = Vec::new();
        for _ in 0..worker_count {
            handles.push(tokio::spawn(self.clone().backfill_worker()));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn backfill_worker(self: Arc<Self>) {
        loop {
            if self.shutdown.is_set() {
                return;
            }
            while self.queue.is_over_high_water() {
                if self.shutdown.is_set() {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }

            let Some((numbers, forward_before, backward_before)) = self.claim().await else {
                return;
            };
            if numbers.is_empty() {
                continue;
            }

            let fragments = self.assembler.assemble_range(&numbers).await;
            if fragments.is_empty() && !numbers.is_empty() {
                // Treat an empty result as a transport failure: roll the
                // claimed range back so another worker can retry it.
                warn!(count = numbers.len(), "empty fragment batch, rolling pointers back");
                self.rollback(forward_before, backward_before).await;
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                continue;
            }

            let committed = fragments.len() as u64;
            for fragment in fragments {
                self.queue.push(fragment).await;
            }
            let _ = self.events.send(SyncEvent::BatchCommitted { blocks: committed });

            self.maybe_checkpoint().await;
            self.maybe_refresh_tip().await;
        }
    }

    async fn maybe_checkpoint(&self) {
        let mut count = self.batches_since_checkpoint.lock().await;
        *count += 1;
        if *count >= self.config.checkpoint_interval_batches {
            *count = 0;
            drop(count);
            if let Err(err) = self.checkpoint().await {
                warn!(error = %err, "failed to persist checkpoint");
            }
        }
    }

    async fn maybe_refresh_tip(&self) {
        let mut count = self.batches_since_tip_refresh.lock().await;
        *count += 1;
        if *count < self.config.tip_refresh_interval_batches {
            return;
        }
        *count = 0;
        drop(count);

        let Ok(tip) = self.rpc.latest_block_number().await else {
            return;
        };
        let mut pointers = self.pointers.write().await;
        pointers.latest_block = Some(tip);
        if let Some(backward) = pointers.backward_block {
            if tip > backward {
                pointers.backward_block = Some(tip);
                let _ = self.events.send(SyncEvent::TipAdvanced { new_tip: tip });
            }
        }
    }

    async fn checkpoint(&self) -> anyhow::Result<()> {
        let pointers = self.pointers.read().await;
        let is_synced = match (pointers.forward_block, pointers.backward_block) {
            (Some(f), Some(b)) => f >= b,
            _ => false,
        };
        let mut snapshot = pointers.clone();
        drop(pointers);
        snapshot.is_synced = is_synced;
        state::checkpoint(&self.pool, &snapshot).await
    }

    /// Live tail: prefers the WS push feed, falls back to polling. A
    /// per-instance "processing" lock serializes overlapping pushes;
    /// a push that arrives mid-processing coalesces into the next run
    /// by simply being observed once the lock is released.
    async fn live_tail(self: Arc<Self>) -> anyhow::Result<()> {
        let (head_tx, mut head_rx) = tokio::sync::broadcast::channel(64);
        let (ws_shutdown_tx, ws_shutdown_rx) = watch::channel(false);

        let ws_handle = tokio::spawn(ws::run_new_heads_loop(
            self.rpc_config.clone(),
            head_tx,
            ws_shutdown_rx,
        ));

        let processing = tokio::sync::Mutex::new(());

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = ws_shutdown_tx.send(true);
                    let _ = ws_handle.await;
                    self.checkpoint().await.ok();
                    return Ok(());
                }
                event = head_rx.recv() => {
                    match event {
                        Ok(HeadEvent::NewHead(block)) => {
                            let _guard = processing.lock().await;
                            if let Ok(number) = block.normalize().map(|h| h.number) {
                                self.advance_live(number).await;
                            }
                        }
                        Ok(HeadEvent::Lagged(skipped)) => {
                            warn!(skipped, "live-tail subscriber lagged, catching up via tip poll");
                            if let Ok(tip) = self.rpc.latest_block_number().await {
                                self.advance_live(tip).await;
                            }
                        }
                        Err(_) => {
                            tokio::time::sleep(self.config.poll_interval).await;
                            if let Ok(tip) = self.rpc.latest_block_number().await {
                                self.advance_live(tip).await;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn advance_live(&self, new_tip: u64) {
        let last_forward = {
            let pointers = self.pointers.read().await;
            pointers.forward_block.unwrap_or(new_tip)
        };
        if new_tip <= last_forward {
            return;
        }
        let numbers: Vec<u64> = (last_forward..=new_tip).collect();
        let fragments = self.assembler.assemble_range(&numbers).await;
        for fragment in fragments {
            self.queue.push(fragment).await;
        }
        {
            let mut pointers = self.pointers.write().await;
            pointers.forward_block = Some(new_tip);
            pointers.backward_block = Some(new_tip);
            pointers.latest_block = Some(new_tip);
        }
        let _ = self.events.send(SyncEvent::LiveBlock(new_tip));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    /// Replays spec.md Scenario 5's own numbers: a fresh chain with
    /// forward=0, backward=1000, one round wide enough to close the span
    /// in a single claim. Every height in `[0, 1000]` must be claimed
    /// exactly once, and the pointers must land in the synced state.
    #[test]
    fn single_round_claims_the_full_inclusive_span() {
        let (claimed, new_forward, new_backward) = compute_claim(0, 1000, 1000).unwrap();
        let set: BTreeSet<u64> = claimed.iter().copied().collect();
        assert_eq!(set.len(), 1001, "every height 0..=1000 must appear, with no duplicates");
        assert_eq!(set, (0..=1000).collect::<BTreeSet<u64>>());
        assert!(new_forward > new_backward, "pointers must cross to signal synced");
    }

    /// Multi-round backfill: each round must claim a disjoint slice, and
    /// the union across all rounds must cover the whole original span
    /// with no gaps or repeats, including the final round's meeting point.
    #[test]
    fn multi_round_backfill_covers_every_height_exactly_once() {
        let mut forward = 0u64;
        let mut backward = 1000u64;
        let mut seen: Vec<u64> = Vec::new();

        loop {
            let Some((claimed, new_forward, new_backward)) = compute_claim(forward, backward, 137) else {
                break;
            };
            seen.extend(claimed);
            forward = new_forward;
            backward = new_backward;
            if forward > backward {
                break;
            }
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..=1000).collect::<Vec<u64>>());
        assert!(forward > backward);
    }

    /// A tip refresh pushes `backward_block` out to a new, larger value
    /// (driver.rs's `maybe_refresh_tip`) — the refreshed tip itself must
    /// still get exactly one claimed row, the same inclusive-range rule
    /// as the initial span.
    #[test]
    fn refreshed_tip_is_claimed_inclusively() {
        let (claimed, new_forward, new_backward) = compute_claim(500, 500, 1000).unwrap();
        assert_eq!(claimed, vec![500]);
        assert!(new_forward > new_backward);
    }

    #[test]
    fn closed_range_claims_nothing() {
        assert!(compute_claim(501, 500, 1000).is_none());
    }

    #[test]
    fn single_remaining_height_at_zero_does_not_underflow() {
        let (claimed, new_forward, new_backward) = compute_claim(0, 0, 1000).unwrap();
        assert_eq!(claimed, vec![0]);
        assert_eq!(new_forward, 1);
        assert_eq!(new_backward, 0);
    }
}
