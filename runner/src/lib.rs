//! The Apollo node runner: a heartbeat publisher, the suicide watchdog and
//! the task poller, driven by tickers with per-loop cancellation channels.

pub mod heartbeat;
pub mod node_info;
pub mod notify;
pub mod poller;
pub mod watchdog;

use std::{sync::Arc, time::Duration};

use apollo_client::api::ApiClient;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::info;

pub const NODE_UPDATE_PERIOD: Duration = Duration::from_secs(60);

pub struct RunnerContext {
    pub client: ApiClient,
    /// Last time the control plane acknowledged a state publication.
    pub last_success: Mutex<DateTime<Utc>>,
    /// Zero disables the watchdog.
    pub suicide_timeout: Duration,
    pub node_id: String,
}

impl RunnerContext {
    pub fn new(client: ApiClient, suicide_timeout: Duration, node_id: String) -> Self {
        Self {
            client,
            last_success: Mutex::new(Utc::now()),
            suicide_timeout,
            node_id,
        }
    }
}

/// Run the loops until an interrupt or terminate signal arrives, then close
/// every cancel channel and wait for the loops to wind down.
pub async fn run_until_done(ctx: Arc<RunnerContext>) -> anyhow::Result<()> {
    let mut handles = Vec::new();
    let mut cancel_senders: Vec<mpsc::Sender<()>> = Vec::new();

    if ctx.suicide_timeout.is_zero() {
        info!("watchdog is disabled");
    } else {
        info!(
            "starting the watchdog, timeout is {} sec",
            ctx.suicide_timeout.as_secs()
        );
        let (tx, rx) = mpsc::channel(1);
        cancel_senders.push(tx);
        handles.push(tokio::spawn(watchdog::run_suicider(ctx.clone(), rx)));
    }

    info!("starting the node state publisher");
    let (tx, rx) = mpsc::channel(1);
    cancel_senders.push(tx);
    handles.push(tokio::spawn(heartbeat::run_node_info_pusher(ctx.clone(), rx)));

    let (tx, rx) = mpsc::channel(1);
    cancel_senders.push(tx);
    handles.push(tokio::spawn(poller::run_task_poller(rx)));

    wait_for_signal().await?;
    info!("interrupt received, shutting down");

    // Closing the channels wakes every loop.
    drop(cancel_senders);
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn wait_for_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
