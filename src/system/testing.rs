//! Fixtures for driving a single abstraction by hand in unit tests.

use std::time::Duration;

use crate::common::{AbstractionId, Message, Payload, Peers, ProcessId};

use super::abstraction::{Context, Outbox};

pub(crate) const HEARTBEAT: Duration = Duration::from_millis(100);

pub(crate) fn process(rank: u32) -> ProcessId {
    ProcessId::new("abc", rank, rank, "127.0.0.1", 5000 + rank as u16)
}

/// One process of an `n`-member system with ranks `1..=n`.
pub(crate) struct TestContext {
    pub me: ProcessId,
    pub hub: ProcessId,
    pub peers: Peers,
    pub outbox: Outbox,
}

impl TestContext {
    pub fn new(my_rank: u32, n: u32) -> Self {
        TestContext {
            me: process(my_rank),
            hub: ProcessId::new("hub", 0, 0, "127.0.0.1", 5000),
            peers: Peers::new((1..=n).map(process).collect()),
            outbox: Outbox::default(),
        }
    }

    pub fn ctx(&mut self) -> Context<'_> {
        Context::new(&self.me, &self.hub, &self.peers, "sys", HEARTBEAT, &mut self.outbox)
    }

    pub fn take(&mut self) -> Outbox {
        std::mem::take(&mut self.outbox)
    }

    /// Local events raised since the last take, other than link sends and
    /// broadcasts, as `(target, payload)`.
    pub fn triggered(&mut self) -> Vec<(AbstractionId, Payload)> {
        self.take()
            .events
            .into_iter()
            .filter(|m| !matches!(m.payload, Payload::PlSend { .. } | Payload::BebBroadcast { .. }))
            .map(|m| (m.to_abstraction_id, m.payload))
            .collect()
    }

    /// Point-to-point sends since the last take, as `(destination, payload)`.
    pub fn sent(&mut self) -> Vec<(ProcessId, Payload)> {
        self.take()
            .events
            .into_iter()
            .filter_map(|m| match m.payload {
                Payload::PlSend { destination, message } => Some((destination, message.payload)),
                _ => None,
            })
            .collect()
    }

    /// Broadcast payloads since the last take.
    pub fn broadcasts(&mut self) -> Vec<Payload> {
        self.take()
            .events
            .into_iter()
            .filter_map(|m| match m.payload {
                Payload::BebBroadcast { message } => Some(message.payload),
                _ => None,
            })
            .collect()
    }
}

pub(crate) fn local(to: &AbstractionId, payload: Payload) -> Message {
    Message::new("sys", to.clone(), to.clone(), payload)
}

pub(crate) fn pl_deliver(to: &AbstractionId, sender: &ProcessId, payload: Payload) -> Message {
    Message::new(
        "sys",
        to.child("pl"),
        to.clone(),
        Payload::PlDeliver {
            sender: Some(sender.clone()),
            message: Box::new(local(to, payload)),
        },
    )
}

pub(crate) fn beb_deliver(to: &AbstractionId, sender: &ProcessId, payload: Payload) -> Message {
    Message::new(
        "sys",
        to.child("beb"),
        to.clone(),
        Payload::BebDeliver {
            sender: sender.clone(),
            message: Box::new(local(to, payload)),
        },
    )
}
