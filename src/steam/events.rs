//! Callback events delivered by the Steam transport and the bus that fans them out.
use std::collections::HashMap;
use std::fmt;

/// Asynchronous notifications raised by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SteamEvent {
    Connected,
    Disconnected { user_initiated: bool },
    LoggedOn { success: bool, detail: Option<String> },
    LoggedOff { reason: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    LoggedOn,
    LoggedOff,
}

impl SteamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SteamEvent::Connected => EventKind::Connected,
            SteamEvent::Disconnected { .. } => EventKind::Disconnected,
            SteamEvent::LoggedOn { .. } => EventKind::LoggedOn,
            SteamEvent::LoggedOff { .. } => EventKind::LoggedOff,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Connected => write!(f, "connected"),
            EventKind::Disconnected => write!(f, "disconnected"),
            EventKind::LoggedOn => write!(f, "logged_on"),
            EventKind::LoggedOff => write!(f, "logged_off"),
        }
    }
}

pub type EventHandler = Box<dyn Fn(&SteamEvent) + Send + Sync>;

/// Typed subscription table: event kind to handlers, invoked in subscription order.
///
/// Handlers run inline on the pump task and must only flip state.
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKind, Vec<EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(&SteamEvent) + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Returns how many handlers saw the event.
    pub fn dispatch(&self, event: &SteamEvent) -> usize {
        match self.handlers.get(&event.kind()) {
            Some(list) => {
                for handler in list {
                    handler(event);
                }
                list.len()
            }
            None => 0,
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map(Vec::len).unwrap_or(0)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<(EventKind, usize)> =
            self.handlers.iter().map(|(k, v)| (*k, v.len())).collect();
        counts.sort_by_key(|(k, _)| k.to_string());
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}
