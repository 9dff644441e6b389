use tokio::sync::mpsc;

/// Task-assignment poller.
///
/// TODO: fetch task assignments from the control plane once the dispatch
/// protocol is settled; until then this only parks on its cancel channel.
pub async fn run_task_poller(mut cancel: mpsc::Receiver<()>) {
    let _ = cancel.recv().await;
}
