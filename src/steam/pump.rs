//! Drains the transport's callback queue and fans events out over the [`EventBus`].
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::events::{EventBus, SteamEvent};
use super::transport::EventQueue;

/// Single consumer of the transport's event queue.
///
/// Events are dispatched in arrival order. After each drain the task yields so the
/// scheduler and request futures keep making progress.
pub struct CallbackPump {
    queue: EventQueue,
    bus: EventBus,
}

impl CallbackPump {
    pub fn new(queue: EventQueue, bus: EventBus) -> Self {
        Self { queue, bus }
    }

    fn dispatch(&self, event: &SteamEvent) {
        let handled = self.bus.dispatch(event);
        trace!(kind = %event.kind(), handlers = handled, "dispatched steam callback");
    }

    /// Runs until `shutdown` fires or the transport drops its sender.
    /// Returns the number of events dispatched.
    pub async fn run(mut self, shutdown: CancellationToken) -> u64 {
        info!("callback pump started");
        let mut dispatched: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(dispatched, "callback pump: shutdown");
                    break;
                }
                next = self.queue.recv() => {
                    let Some(event) = next else {
                        debug!(dispatched, "callback queue closed; pump exiting");
                        break;
                    };
                    self.dispatch(&event);
                    dispatched += 1;
                    // drain whatever is already queued before yielding
                    while let Ok(event) = self.queue.try_recv() {
                        self.dispatch(&event);
                        dispatched += 1;
                    }
                    tokio::task::yield_now().await;
                }
            }
        }
        dispatched
    }
}
