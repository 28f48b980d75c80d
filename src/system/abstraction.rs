use std::time::Duration;

use crate::common::{AbstractionId, Message, Payload, Peers, ProcessId};
use crate::consensus::{EpochChange, EpochConsensus, UniformConsensus};
use crate::detector::{EventualLeaderDetector, EventuallyPerfectFailureDetector};
use crate::link::{BestEffortBroadcast, PerfectLink};
use crate::register::NNAtomicRegister;

use super::app::Application;

/// A protocol state machine hosted by a process.
///
/// `handle` consumes one event addressed to this abstraction and returns
/// whether it knew what to do with it. Everything a handler wants to happen
/// next goes through the context and is applied by the system once the
/// handler returns, so a handler never re-enters the dispatch loop.
pub trait Abstraction {
    fn id(&self) -> &AbstractionId;

    fn handle(&mut self, message: Message, ctx: &mut Context<'_>) -> bool;
}

/// The closed set of abstractions a process can host.
#[derive(Debug)]
pub enum AbstractionKind {
    App(Application),
    Pl(PerfectLink),
    Beb(BestEffortBroadcast),
    Epfd(EventuallyPerfectFailureDetector),
    Eld(EventualLeaderDetector),
    Ec(EpochChange),
    Ep(EpochConsensus),
    Uc(UniformConsensus),
    Nnar(NNAtomicRegister),
}

impl AbstractionKind {
    pub fn as_abstraction(&self) -> &dyn Abstraction {
        match self {
            AbstractionKind::App(a) => a,
            AbstractionKind::Pl(a) => a,
            AbstractionKind::Beb(a) => a,
            AbstractionKind::Epfd(a) => a,
            AbstractionKind::Eld(a) => a,
            AbstractionKind::Ec(a) => a,
            AbstractionKind::Ep(a) => a,
            AbstractionKind::Uc(a) => a,
            AbstractionKind::Nnar(a) => a,
        }
    }

    pub fn as_abstraction_mut(&mut self) -> &mut dyn Abstraction {
        match self {
            AbstractionKind::App(a) => a,
            AbstractionKind::Pl(a) => a,
            AbstractionKind::Beb(a) => a,
            AbstractionKind::Epfd(a) => a,
            AbstractionKind::Eld(a) => a,
            AbstractionKind::Ec(a) => a,
            AbstractionKind::Ep(a) => a,
            AbstractionKind::Uc(a) => a,
            AbstractionKind::Nnar(a) => a,
        }
    }

    pub fn id(&self) -> &AbstractionId {
        self.as_abstraction().id()
    }

    pub fn handle(&mut self, message: Message, ctx: &mut Context<'_>) -> bool {
        self.as_abstraction_mut().handle(message, ctx)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AbstractionKind::App(_) => Application::NAME,
            AbstractionKind::Pl(_) => PerfectLink::NAME,
            AbstractionKind::Beb(_) => BestEffortBroadcast::NAME,
            AbstractionKind::Epfd(_) => EventuallyPerfectFailureDetector::NAME,
            AbstractionKind::Eld(_) => EventualLeaderDetector::NAME,
            AbstractionKind::Ec(_) => EpochChange::NAME,
            AbstractionKind::Ep(_) => EpochConsensus::NAME,
            AbstractionKind::Uc(_) => UniformConsensus::NAME,
            AbstractionKind::Nnar(_) => NNAtomicRegister::NAME,
        }
    }
}

macro_rules! impl_from_abstraction {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for AbstractionKind {
                fn from(abstraction: $ty) -> Self {
                    AbstractionKind::$variant(abstraction)
                }
            }
        )*
    };
}

impl_from_abstraction! {
    App => Application,
    Pl => PerfectLink,
    Beb => BestEffortBroadcast,
    Epfd => EventuallyPerfectFailureDetector,
    Eld => EventualLeaderDetector,
    Ec => EpochChange,
    Ep => EpochConsensus,
    Uc => UniformConsensus,
    Nnar => NNAtomicRegister,
}

/// Side effects collected while one event is handled.
#[derive(Debug, Default)]
pub struct Outbox {
    pub(crate) events: Vec<Message>,
    pub(crate) transmissions: Vec<(ProcessId, Message)>,
    pub(crate) timers: Vec<(Duration, Message)>,
    pub(crate) registrations: Vec<AbstractionKind>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.transmissions.is_empty()
            && self.timers.is_empty()
            && self.registrations.is_empty()
    }
}

/// What a handler can see of its process, and where its output goes.
pub struct Context<'a> {
    pub me: &'a ProcessId,
    pub hub: &'a ProcessId,
    pub peers: &'a Peers,
    pub system_id: &'a str,
    pub heartbeat: Duration,
    outbox: &'a mut Outbox,
}

impl<'a> Context<'a> {
    pub fn new(
        me: &'a ProcessId,
        hub: &'a ProcessId,
        peers: &'a Peers,
        system_id: &'a str,
        heartbeat: Duration,
        outbox: &'a mut Outbox,
    ) -> Self {
        Context {
            me,
            hub,
            peers,
            system_id,
            heartbeat,
            outbox,
        }
    }

    pub fn is_me(&self, process: &ProcessId) -> bool {
        self.me == process
    }

    pub fn message(&self, from: &AbstractionId, to: AbstractionId, payload: Payload) -> Message {
        Message::new(self.system_id, from.clone(), to, payload)
    }

    /// Queues a local event for another abstraction of this process.
    pub fn trigger(&mut self, from: &AbstractionId, to: AbstractionId, payload: Payload) {
        let message = self.message(from, to, payload);
        self.outbox.events.push(message);
    }

    pub fn deliver_to_parent(&mut self, from: &AbstractionId, payload: Payload) {
        match from.parent() {
            Some(parent) => self.trigger(from, parent, payload),
            None => tracing::warn!(id = %from, payload = payload.name(), "root abstraction has no parent"),
        }
    }

    /// Sends `payload` to the abstraction with the same id on `destination`,
    /// through this abstraction's perfect link.
    pub fn send(&mut self, from: &AbstractionId, destination: &ProcessId, payload: Payload) {
        let inner = self.message(from, from.clone(), payload);
        self.trigger(
            from,
            from.child(PerfectLink::NAME),
            Payload::PlSend {
                destination: destination.clone(),
                message: Box::new(inner),
            },
        );
    }

    /// Sends `payload` to the abstraction with the same id on every member,
    /// through this abstraction's best-effort broadcast.
    pub fn broadcast(&mut self, from: &AbstractionId, payload: Payload) {
        let inner = self.message(from, from.clone(), payload);
        self.trigger(
            from,
            from.child(BestEffortBroadcast::NAME),
            Payload::BebBroadcast {
                message: Box::new(inner),
            },
        );
    }

    /// Hands a finished network envelope to the transport.
    pub fn transmit(&mut self, destination: ProcessId, envelope: Message) {
        self.outbox.transmissions.push((destination, envelope));
    }

    /// Posts `message` back onto the event queue after `delay`. Replaces any
    /// timer still pending for the same target.
    pub fn schedule(&mut self, delay: Duration, message: Message) {
        self.outbox.timers.push((delay, message));
    }

    pub fn register(&mut self, abstraction: impl Into<AbstractionKind>) {
        self.outbox.registrations.push(abstraction.into());
    }
}
