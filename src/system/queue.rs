use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::common::{Message, Payload};

/// One unit of work for a process's event loop.
#[derive(Debug)]
pub enum Event {
    /// A frame that arrived on the listener.
    Network(Message),
    /// An event raised by an abstraction or a timer.
    Local(Message),
    Shutdown,
}

impl Event {
    /// Whether a drain after system destroy stops at this event: a hub
    /// lifecycle event or shutdown.
    pub fn ends_drain(&self) -> bool {
        match self {
            Event::Shutdown => true,
            Event::Network(message) => match &message.payload {
                Payload::NetworkMessage { message, .. } => message.payload.is_lifecycle(),
                _ => false,
            },
            Event::Local(_) => false,
        }
    }
}

/// Producer side of a process's event queue. Cheap to clone; every listener
/// connection and timer holds one.
#[derive(Clone, Debug)]
pub struct EventQueue {
    tx: UnboundedSender<Event>,
}

impl EventQueue {
    pub fn channel() -> (EventQueue, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventQueue { tx }, rx)
    }

    /// Returns false once the event loop has gone away.
    pub fn push(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn trigger(&self, message: Message) -> bool {
        self.push(Event::Local(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::AbstractionId;

    fn envelope(payload: Payload) -> Message {
        let app = AbstractionId::root("app");
        let inner = Message::new("sys", AbstractionId::root("hub"), app.clone(), payload);
        Message::new(
            "sys",
            AbstractionId::root("hub"),
            app.child("pl"),
            Payload::NetworkMessage {
                sender_host: "127.0.0.1".to_string(),
                sender_listening_port: 5000,
                message: Box::new(inner),
            },
        )
    }

    #[test]
    fn test_lifecycle_events_end_drain() {
        assert!(Event::Network(envelope(Payload::ProcDestroySystem)).ends_drain());
        assert!(Event::Network(envelope(Payload::ProcInitializeSystem { processes: vec![] })).ends_drain());
        assert!(Event::Shutdown.ends_drain());

        assert!(!Event::Network(envelope(Payload::EpInternalRead)).ends_drain());
        let app = AbstractionId::root("app");
        assert!(!Event::Local(Message::new("sys", app.clone(), app, Payload::ProcDestroySystem)).ends_drain());
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped() {
        let (queue, rx) = EventQueue::channel();
        assert!(queue.push(Event::Shutdown));
        drop(rx);
        assert!(!queue.push(Event::Shutdown));
    }
}
