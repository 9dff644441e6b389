use std::{os::unix::process::CommandExt, process::Command, sync::Arc};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::error;

use crate::{heartbeat::run_with_ticker, RunnerContext, NODE_UPDATE_PERIOD};

/// Periodically check whether the control plane has been unreachable past
/// the suicide deadline and, if so, fence the host.
pub async fn run_suicider(ctx: Arc<RunnerContext>, cancel: mpsc::Receiver<()>) {
    run_with_ticker(cancel, NODE_UPDATE_PERIOD, || {
        let ctx = ctx.clone();
        async move {
            let last_success = *ctx.last_success.lock().await;
            let outage = (Utc::now() - last_success).to_std().unwrap_or_default();
            if !ctx.suicide_timeout.is_zero() && outage > ctx.suicide_timeout {
                commit_suicide();
            }
            Ok(())
        }
    })
    .await
}

/// Hard-stop the node by replacing the process image with the shutdown
/// command. There is no recovery from here.
pub fn commit_suicide() -> ! {
    error!("control plane unreachable past the suicide deadline, halting the host");
    let err = Command::new("/sbin/shutdown").arg("-P").exec();
    // exec only returns on failure.
    panic!("failed to exec shutdown: {err}");
}
