//! Event sink for downstream position and ledger engines.

use tickbook_types::{BookEvent, Trade};

/// Receives book events in the order the apply loop produces them.
pub trait Broker {
    fn send(&mut self, event: BookEvent);

    fn send_batch(&mut self, events: Vec<BookEvent>) {
        for event in events {
            self.send(event);
        }
    }
}

impl<B: Broker + ?Sized> Broker for &mut B {
    fn send(&mut self, event: BookEvent) {
        (**self).send(event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingBroker {
    events: Vec<BookEvent>,
}

impl RecordingBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[BookEvent] {
        &self.events
    }

    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.events.iter().filter_map(BookEvent::as_trade)
    }

    /// Drain everything recorded so far.
    pub fn take(&mut self) -> Vec<BookEvent> {
        std::mem::take(&mut self.events)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Broker for RecordingBroker {
    fn send(&mut self, event: BookEvent) {
        self.events.push(event);
    }

    fn send_batch(&mut self, events: Vec<BookEvent>) {
        self.events.extend(events);
    }
}
