//! Bulk persistence: a bounded write queue drained by N writer workers,
//! each popping a batch, deduping it, and running one transaction per
//! table against Postgres (`sqlx::PgPool`).

pub mod dedup;
pub mod error;
pub mod queue;
pub mod writer;

pub use error::WriteError;
pub use queue::WriteQueue;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::config::Config;

/// Connects to Postgres and probes it with `SELECT 1` as a fail-fast
/// configuration check.
pub async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.writer_concurrency as u32 + 2)
        .acquire_timeout(config.rpc_timeout)
        .connect(&config.database_url)
        .await?;
    sqlx::query("SELECT 1").execute(&pool).await?;
    Ok(pool)
}

/// Spawns the permanent `writer_concurrency` pool plus a supervisor that
/// elastically scales additional writers up to `writer_concurrency_ceiling`
/// whenever queue depth exceeds `queue_scale_threshold`. Each permanent
/// worker loops until shutdown and drain; each elastic worker loops until
/// shutdown, drain, or depth falling back under the threshold.
pub fn spawn_writers(
    pool: PgPool,
    queue: Arc<WriteQueue>,
    writer_concurrency: usize,
    writer_concurrency_ceiling: usize,
    write_batch_size: usize,
    placeholder_limit: usize,
    retry_delay: Duration,
    queue_scale_threshold: usize,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let base = writer_concurrency.max(1);
    let mut handles: Vec<_> = (0..base)
        .map(|_| {
            tokio::spawn(writer_loop(
                pool.clone(),
                queue.clone(),
                write_batch_size,
                placeholder_limit,
                retry_delay,
                shutdown.clone(),
                None,
            ))
        })
        .collect();

    handles.push(tokio::spawn(scale_supervisor(
        pool,
        queue,
        base,
        writer_concurrency_ceiling.max(base),
        write_batch_size,
        placeholder_limit,
        retry_delay,
        queue_scale_threshold,
        shutdown,
    )));

    handles
}

/// Watches queue depth and spins up additional, self-terminating writers
/// above the permanent `base` pool once depth exceeds
/// `queue_scale_threshold`, capped at `ceiling` writers in total. Finished
/// elastic workers are pruned each tick so the count stays accurate.
async fn scale_supervisor(
    pool: PgPool,
    queue: Arc<WriteQueue>,
    base: usize,
    ceiling: usize,
    write_batch_size: usize,
    placeholder_limit: usize,
    retry_delay: Duration,
    queue_scale_threshold: usize,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut elastic: Vec<tokio::task::JoinHandle<()>> = Vec::new();
    loop {
        if *shutdown.borrow() {
            for handle in elastic {
                let _ = handle.await;
            }
            return;
        }

        elastic.retain(|handle| !handle.is_finished());

        if queue.depth() > queue_scale_threshold && base + elastic.len() < ceiling {
            info!(
                depth = queue.depth(),
                total_writers = base + elastic.len() + 1,
                "queue depth over threshold, scaling writers up"
            );
            elastic.push(tokio::spawn(writer_loop(
                pool.clone(),
                queue.clone(),
                write_batch_size,
                placeholder_limit,
                retry_delay,
                shutdown.clone(),
                Some(queue_scale_threshold),
            )));
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            _ = shutdown.changed() => {}
        }
    }
}

async fn writer_loop(
    pool: PgPool,
    queue: Arc<WriteQueue>,
    write_batch_size: usize,
    placeholder_limit: usize,
    retry_delay: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    scale_down_below: Option<usize>,
) {
    loop {
        if *shutdown.borrow() && queue.depth() == 0 {
            return;
        }
        if let Some(threshold) = scale_down_below {
            if queue.depth() <= threshold {
                return;
            }
        }

        let batch = tokio::select! {
            batch = queue.pop_batch(write_batch_size) => batch,
            _ = shutdown.changed() => {
                if *shutdown.borrow() && queue.depth() == 0 {
                    return;
                }
                continue;
            }
        };

        let staged = dedup::stage(&batch);
        match writer::write_batch(&pool, &staged, placeholder_limit).await {
            Ok(()) => {
                info!(fragments = batch.len(), "write cycle committed");
            }
            Err(err) if err.is_transient() => {
                writer::log_retry(0, &err);
                queue.requeue_front(batch).await;
                tokio::time::sleep(retry_delay).await;
            }
            Err(err) => {
                error!(error = %err, "fatal write failure, dropping batch");
                warn!("this cycle's fragments are lost");
            }
        }
    }
}
