use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Coalesces bursts of values: a value is emitted once no newer value has
/// arrived for `window`, and only the last value of a burst is emitted.
pub struct Debouncer<T> {
    input: mpsc::UnboundedSender<T>,
    join: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn spawn(window: Duration) -> (Self, mpsc::UnboundedReceiver<T>) {
        let (input, mut rx) = mpsc::unbounded_channel::<T>();
        let (output, settled) = mpsc::unbounded_channel::<T>();

        let join = tokio::spawn(async move {
            while let Some(mut latest) = rx.recv().await {
                loop {
                    tokio::select! {
                        next = rx.recv() => match next {
                            Some(value) => latest = value,
                            None => {
                                let _ = output.send(latest);
                                return;
                            }
                        },
                        _ = tokio::time::sleep(window) => {
                            if output.send(latest).is_err() {
                                return;
                            }
                            break;
                        }
                    }
                }
            }
        });

        (Self { input, join }, settled)
    }

    /// Returns `false` once the debouncer has shut down.
    pub fn push(&self, value: T) -> bool {
        self.input.send(value).is_ok()
    }

    /// Flushes any pending value and waits for the task to finish.
    pub async fn close(self) -> Result<(), tokio::task::JoinError> {
        drop(self.input);
        self.join.await
    }
}
