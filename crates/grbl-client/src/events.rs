//! Observable side effects of a connection.

use tokio::sync::{broadcast, mpsc};

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The boot banner was recognized. Published once.
    Version(String),
    /// A command line is being written.
    Command(String),
    /// An inbound line after the banner, including lines captured as a
    /// command's response.
    Message(String),
}

/// Sink for connection events.
///
/// Publishing never blocks and never fails the connection; a publisher with
/// nobody listening drops the event.
pub trait EventPublisher: Send + Sync + 'static {
    /// Deliver an event.
    fn publish(&self, event: Event);
}

impl EventPublisher for broadcast::Sender<Event> {
    fn publish(&self, event: Event) {
        // Err only means there are no subscribers right now.
        let _ = self.send(event);
    }
}

impl EventPublisher for mpsc::UnboundedSender<Event> {
    fn publish(&self, event: Event) {
        let _ = self.send(event);
    }
}
