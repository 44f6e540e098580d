//! WebSocket subscription to new heads, with a watchdog/reconnect loop:
//! a background task owns the subscription and republishes every new head
//! on a broadcast channel, restarting the connection whenever it stalls.

use std::time::Duration;

use futures::StreamExt;
use jsonrpsee::core::client::{Subscription, SubscriptionClientT};
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::Config;
use crate::rpc::error::RpcError;
use crate::rpc::types::RawBlock;

/// Emitted on the new-heads broadcast channel. `Lagged` surfaces the
/// number of heads a slow subscriber missed, mirroring
/// `broadcast::error::RecvError::Lagged`'s payload.
#[derive(Debug, Clone)]
pub enum HeadEvent {
    NewHead(Box<RawBlock>),
    Lagged(u64),
}

/// Runs the subscribe/watchdog/reconnect loop until `shutdown` resolves.
/// Never returns an error: a broken connection is logged and retried
/// rather than propagated, since losing the WS feed degrades the driver
/// to polling rather than stopping it.
pub async fn run_new_heads_loop(
    config: Config,
    sender: broadcast::Sender<HeadEvent>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let Some(ws_url) = config.ws_url.clone() else {
        warn!("no ws_url configured, new-heads feed disabled");
        return;
    };

    loop {
        if *shutdown.borrow() {
            return;
        }
        match run_once(&ws_url, config.ws_watchdog, &sender, &mut shutdown).await {
            Ok(()) => return,
            Err(err) => {
                warn!(error = %err, "new-heads subscription lost, reconnecting");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn run_once(
    ws_url: &str,
    watchdog: Duration,
    sender: &broadcast::Sender<HeadEvent>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<(), RpcError> {
    let client: WsClient = WsClientBuilder::default()
        .build(ws_url)
        .await
        .map_err(|e| RpcError::Transport(e.to_string()))?;

    let mut subscription: Subscription<RawBlock> = client
        .subscribe("eth_subscribe", rpc_params!["newHeads"], "eth_unsubscribe")
        .await
        .map_err(RpcError::from)?;

    info!(ws_url, "subscribed to newHeads");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            item = tokio::time::timeout(watchdog, subscription.next()) => {
                match item {
                    Ok(Some(Ok(block))) => {
                        let _ = sender.send(HeadEvent::NewHead(Box::new(block)));
                    }
                    Ok(Some(Err(err))) => {
                        return Err(RpcError::SubscriptionLost(err.to_string()));
                    }
                    Ok(None) => {
                        return Err(RpcError::SubscriptionLost("subscription stream ended".into()));
                    }
                    Err(_elapsed) => {
                        return Err(RpcError::SubscriptionLost(format!(
                            "no new head within watchdog window of {watchdog:?}"
                        )));
                    }
                }
            }
        }
    }
}
