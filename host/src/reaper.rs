//! Periodic sweep of expired tokens. Errors are logged and the sweep
//! continues; the reaper never exits on a transient failure.

use std::time::Duration;

use apollo_lib::AbsoluteTime;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::HostState;

pub const REAPER_INTERVAL: Duration = Duration::from_secs(1000);

/// Start the background reaper. Dropping the returned sender (or sending
/// into it) stops the loop.
pub fn spawn_reaper(state: HostState) -> mpsc::Sender<()> {
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        info!("starting the background token reaper");
        let mut ticker = tokio::time::interval(REAPER_INTERVAL);
        // The first interval tick fires immediately; skip it so the sweep
        // cadence starts one full period after boot.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!("running the token reaper");
                    match state.tokens.reap_expired(AbsoluteTime::now()).await {
                        Ok(reaped) => info!("reaped {reaped} expired tokens"),
                        Err(e) => error!("encountered error while reaping tokens: {e}"),
                    }
                }
                _ = stop_rx.recv() => {
                    info!("stopping the reaper");
                    return;
                }
            }
        }
    });

    stop_tx
}
