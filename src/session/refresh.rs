//! Debounced state-refresh notifications.
//!
//! Frames, reloads and restarts each invalidate client-side views of the
//! running app. Requests arriving within one debounce window collapse into
//! a single `<namespace>.refresh` event listing every distinct reason.

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dap::messages::ClientChannel;

/// Handle to the debounce task. Dropping it stops the task.
#[derive(Debug)]
pub struct RefreshScheduler {
    tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl RefreshScheduler {
    /// Spawn the debounce task. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(debounce: Duration, client: ClientChannel, event_name: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_debounce(rx, debounce, client, event_name, cancel.clone()));
        Self { tx, cancel }
    }

    /// Request a refresh for `reason`.
    pub fn schedule(&self, reason: &str) {
        if self.tx.send(reason.to_owned()).is_err() {
            debug!(reason, "refresh scheduler stopped");
        }
    }

    /// Stop the task; pending reasons are discarded.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_debounce(
    mut rx: mpsc::UnboundedReceiver<String>,
    debounce: Duration,
    client: ClientChannel,
    event_name: String,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            () = cancel.cancelled() => return,
            reason = rx.recv() => match reason {
                Some(reason) => reason,
                None => return,
            },
        };

        let mut reasons = vec![first];
        let window = tokio::time::sleep(debounce);
        tokio::pin!(window);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = &mut window => break,
                reason = rx.recv() => match reason {
                    Some(reason) => {
                        if !reasons.contains(&reason) {
                            reasons.push(reason);
                        }
                    }
                    None => break,
                },
            }
        }

        debug!(?reasons, "emitting refresh");
        client.event(&event_name, json!({ "reasons": reasons }));
    }
}
