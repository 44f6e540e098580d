//! Entry point: resolve configuration, connect to Postgres and the RPC
//! endpoint, wire the write queue, assembler and sync driver together,
//! and run until a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use chain_indexer::assembler::Assembler;
use chain_indexer::config::cli::{Cli, Command};
use chain_indexer::config::Config;
use chain_indexer::decode::Registry;
use chain_indexer::observability::Observability;
use chain_indexer::rpc::RpcClient;
use chain_indexer::store;
use chain_indexer::sync::{Driver, Shutdown, SyncConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(&cli)?;
    let _observability = Observability::init("chain_indexer", config.log_level)?;

    let pool = store::connect(&config).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Status => return print_status(&pool).await,
        Command::Run => {}
    }

    info!(rpc_url = %config.rpc_url, "starting indexer");

    let rpc = RpcClient::new(&config)?;
    let registry = Registry::default();
    let assembler = Assembler::new(rpc.clone(), registry, config.token_probe_concurrency);

    let queue = store::WriteQueue::new(config.queue_high_water);
    let (writer_shutdown_tx, writer_shutdown_rx) = tokio::sync::watch::channel(false);
    let writer_handles = store::spawn_writers(
        pool.clone(),
        queue.clone(),
        config.writer_concurrency,
        config.writer_concurrency_ceiling,
        config.write_batch_size,
        config.sql_placeholder_limit,
        config.retry_delay,
        config.queue_scale_threshold,
        writer_shutdown_rx,
    );

    let sync_config = SyncConfig {
        blocks_per_batch: config.blocks_per_batch,
        total_blocks_per_round: config.total_blocks_per_round,
        parallel_requests: config.parallel_requests,
        checkpoint_interval_batches: config.checkpoint_interval_batches,
        tip_refresh_interval_batches: config.tip_refresh_interval_batches,
        ws_watchdog: config.ws_watchdog,
        poll_interval: config.poll_interval,
        queue_high_water: config.queue_high_water,
    };

    let (events_tx, _events_rx) = chain_indexer::sync::events::channel();
    let shutdown = Shutdown::new();

    let driver = Arc::new(
        Driver::new(
            rpc,
            config.clone(),
            pool.clone(),
            queue.clone(),
            assembler,
            sync_config,
            events_tx,
            shutdown.clone(),
        )
        .await?,
    );

    let driver_handle = tokio::spawn(driver.clone().run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining");
        }
        result = driver_handle => {
            if let Err(err) = result {
                error!(error = %err, "sync driver task panicked");
            }
        }
    }

    shutdown.trigger();
    let _ = queue.wait_drained().await;
    let _ = writer_shutdown_tx.send(true);
    for handle in writer_handles {
        let _ = handle.await;
    }

    info!("shutdown complete");
    Ok(())
}

async fn print_status(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    match chain_indexer::sync::state::load(pool).await? {
        Some(state) => {
            println!(
                "forward_block={:?} backward_block={:?} latest_block={:?} is_synced={}",
                state.forward_block, state.backward_block, state.latest_block, state.is_synced
            );
        }
        None => println!("no indexer_state row yet"),
    }
    Ok(())
}
