pub mod bridge;
pub mod connection;
pub mod events;
pub mod keyvalue;
pub mod promotion;
pub mod pump;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

use std::sync::Arc;

use events::EventBus;
use pump::CallbackPump;
use session::{SessionConfig, SteamSession};
use transport::{EventQueue, SteamTransport};

/// Builds the session and the pump that drives it over one shared bus.
pub fn wire_session(
    transport: Arc<dyn SteamTransport>,
    queue: EventQueue,
    config: SessionConfig,
) -> (Arc<SteamSession>, CallbackPump) {
    let session = Arc::new(SteamSession::new(transport, config));
    let mut bus = EventBus::new();
    session.register(&mut bus);
    (session, CallbackPump::new(queue, bus))
}
