use std::{future::Future, sync::Arc, time::Duration};

use apollo_lib::api::NodeStateRequest;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::error;

use crate::{node_info::collect_node_info, RunnerContext, NODE_UPDATE_PERIOD};

const MAX_RETRIES: u32 = 5;

/// Drive `work` on a fixed ticker. A failed iteration schedules a quick
/// retry after a tenth of the period; after five consecutive failures the
/// loop falls back to the ticker cadence until a success resets the count.
/// The loop exits when the cancel channel closes.
pub async fn run_with_ticker<F, Fut>(
    mut cancel: mpsc::Receiver<()>,
    period: Duration,
    mut work: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    // The first interval tick fires immediately.
    let mut ticker = tokio::time::interval(period);
    let (retry_tx, mut retry_rx) = mpsc::channel::<()>(1);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.recv() => return,
            _ = ticker.tick() => {}
            _ = retry_rx.recv() => {}
        }

        if work().await.is_err() {
            failures += 1;
            if failures < MAX_RETRIES {
                let retry_tx = retry_tx.clone();
                let delay = period / 10;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = retry_tx.try_send(());
                });
            }
        } else {
            failures = 0;
        }
    }
}

/// Publish the locally collected node state; a success moves the watchdog
/// deadline forward.
pub async fn run_node_info_pusher(ctx: Arc<RunnerContext>, cancel: mpsc::Receiver<()>) {
    run_with_ticker(cancel, NODE_UPDATE_PERIOD, || {
        let ctx = ctx.clone();
        async move {
            match submit_node_info(&ctx).await {
                Err(e) => {
                    error!("failed to send node update: {e}");
                    Err(e)
                }
                Ok(()) => {
                    *ctx.last_success.lock().await = Utc::now();
                    Ok(())
                }
            }
        }
    })
    .await
}

async fn submit_node_info(ctx: &RunnerContext) -> anyhow::Result<()> {
    let info = collect_node_info();
    ctx.client
        .post_node_state(&NodeStateRequest {
            node_id: ctx.node_id.clone(),
            info,
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn failures_schedule_quick_retries_then_back_off() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_loop = calls.clone();
        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        let handle = tokio::spawn(run_with_ticker(
            cancel_rx,
            Duration::from_secs(60),
            move || {
                let calls = calls_in_loop.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("down")
                }
            },
        ));

        // Immediate first attempt plus four quick retries at period/10.
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // After the retry budget only the ticker drives attempts.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        drop(cancel_tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_retry_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_loop = calls.clone();
        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        let handle = tokio::spawn(run_with_ticker(
            cancel_rx,
            Duration::from_secs(60),
            move || {
                let calls = calls_in_loop.clone();
                async move {
                    // Fail once, then succeed.
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("down")
                    }
                    Ok(())
                }
            },
        ));

        // First attempt fails, its retry succeeds, nothing else runs until
        // the next tick.
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(cancel_tx);
        handle.await.unwrap();
    }
}
