pub mod abstraction;
pub mod app;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use abstraction::{Abstraction, AbstractionKind, Context, Outbox};
pub use app::Application;
pub use processor::EventProcessor;
pub use queue::{Event, EventQueue};
pub use registry::Registry;
pub use timer::{Scheduler, TokioScheduler};

use std::collections::HashMap;
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{AbstractionId, Message, Payload, Peers, ProcessId, Segment, SystemError};
use crate::consensus::{EpochConsensus, UniformConsensus};
use crate::link::PerfectLink;
use crate::network::Transport;
use crate::register::NNAtomicRegister;
use crate::tracing_setup;

/*
    A System is one process's view of the world: its identity, the current
    membership and session, and the registry of abstractions it hosts. It
    owns no thread. The event processor feeds it one event at a time, and
    everything a handler produces is applied here once the handler returns:
    new abstractions are registered, timers armed, frames handed to the
    transport, and follow-up events appended to the queue.

    Events addressed to an epoch consensus that does not exist yet are
    parked. A faster peer can move to a new epoch and start talking in it
    before our own abort chain has created the instance; those messages are
    replayed as soon as the instance registers.
*/

/// Upper bound on parked events across all epochs.
pub const MAX_PARKED: usize = 4096;

/// What the event processor should do after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The system was destroyed; drop queued work except lifecycle events.
    Drain,
    Stop,
}

pub struct System {
    me: ProcessId,
    hub: ProcessId,
    heartbeat: Duration,
    system_id: Option<String>,
    peers: Peers,
    registry: Registry,
    parked: HashMap<AbstractionId, Vec<Message>>,
    parked_len: usize,
    queue: EventQueue,
    transport: Arc<dyn Transport>,
    scheduler: Box<dyn Scheduler>,
}

impl System {
    pub fn new(
        me: ProcessId,
        hub: ProcessId,
        heartbeat: Duration,
        queue: EventQueue,
        transport: Arc<dyn Transport>,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        System {
            me,
            hub,
            heartbeat,
            system_id: None,
            peers: Peers::default(),
            registry: Registry::new(),
            parked: HashMap::new(),
            parked_len: 0,
            queue,
            transport,
            scheduler,
        }
    }

    /// The envelope a process sends to the hub to announce itself.
    pub fn registration(me: &ProcessId) -> Message {
        let app = AbstractionId::root(Application::NAME);
        let inner = Message::new(
            "",
            app.clone(),
            app.clone(),
            Payload::ProcRegistration {
                owner: me.owner.clone(),
                index: me.index,
            },
        );
        Message::new(
            "",
            app.clone(),
            app.child(PerfectLink::NAME),
            Payload::NetworkMessage {
                sender_host: me.host.clone(),
                sender_listening_port: me.port,
                message: Box::new(inner),
            },
        )
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.me
    }

    pub fn peers(&self) -> &Peers {
        &self.peers
    }

    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.system_id.is_some()
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn abstraction(&self, id: &AbstractionId) -> Option<&AbstractionKind> {
        self.registry.get(id)
    }

    pub fn parked_len(&self) -> usize {
        self.parked_len
    }

    /// The registered abstractions, one per line, indented by depth.
    pub fn abstraction_tree(&self) -> String {
        let mut tree = String::new();
        for id in self.registry.ids() {
            let segments = id.segments();
            let depth = segments.len().saturating_sub(1);
            let label = match segments.last() {
                Some(Segment { name, key: Some(key) }) => format!("{}[{}]", name, key),
                Some(Segment { name, key: None }) => name.to_string(),
                None => continue,
            };
            let _ = writeln!(tree, "{}{}", "  ".repeat(depth), label);
        }
        tree
    }

    pub fn handle_event(&mut self, event: Event) -> Flow {
        match event {
            Event::Network(envelope) => self.on_network(envelope),
            Event::Local(message) => {
                self.dispatch(message);
                Flow::Continue
            }
            Event::Shutdown => Flow::Stop,
        }
    }

    /// Stops everything that would outlive the event loop.
    pub fn shutdown(&mut self) {
        self.scheduler.cancel_all();
    }

    fn on_network(&mut self, envelope: Message) -> Flow {
        let Payload::NetworkMessage { message, .. } = &envelope.payload else {
            tracing_setup::routing_failure(&self.me, &envelope, "not a network envelope");
            return Flow::Continue;
        };

        match &message.payload {
            Payload::ProcInitializeSystem { processes } => {
                let system_id = if message.system_id.is_empty() {
                    envelope.system_id.clone()
                } else {
                    message.system_id.clone()
                };
                if let Err(e) = self.initialize(system_id, processes.clone()) {
                    tracing::error!(process = %self.me, error = %e, "rejecting system initialization");
                }
                Flow::Continue
            }
            Payload::ProcDestroySystem => {
                self.destroy();
                Flow::Drain
            }
            _ => {
                self.dispatch(envelope);
                Flow::Continue
            }
        }
    }

    fn initialize(&mut self, system_id: String, processes: Vec<ProcessId>) -> Result<(), SystemError> {
        if processes.is_empty() {
            return Err(SystemError::EmptyMembership);
        }
        let me = processes
            .iter()
            .find(|p| p.has_address(&self.me.host, self.me.port))
            .cloned()
            .ok_or_else(|| SystemError::NotAMember {
                host: self.me.host.clone(),
                port: self.me.port,
            })?;

        if self.is_initialized() {
            tracing::info!(process = %self.me, "already initialized, starting over");
            self.reset();
        }

        self.me = me;
        self.peers = Peers::new(processes);
        self.system_id = Some(system_id);
        tracing_setup::system_initialized(&self.me, self.system_id.as_deref().unwrap_or_default(), &self.peers.members);

        self.with_context(|ctx| {
            let app = Application::new(ctx);
            ctx.register(app);
        });
        Ok(())
    }

    fn destroy(&mut self) {
        tracing_setup::system_destroyed(&self.me, self.system_id.as_deref());
        self.reset();
    }

    fn reset(&mut self) {
        self.scheduler.cancel_all();
        self.registry.clear();
        self.parked.clear();
        self.parked_len = 0;
        self.peers.clear();
        self.system_id = None;
    }

    fn dispatch(&mut self, message: Message) {
        let Some(system_id) = self.system_id.as_deref() else {
            tracing::debug!(process = %self.me, message = %message, "not initialized, dropping");
            return;
        };
        if message.system_id != system_id {
            tracing_setup::routing_failure(&self.me, &message, "foreign system id");
            return;
        }

        let to = message.to_abstraction_id.clone();
        if !self.registry.contains(&to) {
            self.instantiate(&to);
        }
        if !self.registry.contains(&to) {
            match self.parking_slot(&to) {
                Some(epoch) => self.park(epoch, message),
                None => tracing_setup::routing_failure(&self.me, &message, "no such abstraction"),
            }
            return;
        }

        let payload = message.payload.name();
        let mut outbox = Outbox::default();
        let outcome = {
            let Some(abstraction) = self.registry.get_mut(&to) else {
                return;
            };
            let system_id = self.system_id.as_deref().unwrap_or_default();
            let mut ctx = Context::new(&self.me, &self.hub, &self.peers, system_id, self.heartbeat, &mut outbox);
            panic::catch_unwind(AssertUnwindSafe(|| abstraction.handle(message, &mut ctx)))
        };

        match outcome {
            Ok(true) => self.apply(outbox),
            Ok(false) => {
                tracing::warn!(process = %self.me, id = %to, payload, "abstraction could not handle event");
                self.apply(outbox);
            }
            Err(_) => tracing_setup::handler_panicked(&self.me, &to, payload),
        }
    }

    /// Creates the consensus instance or register that `to` lives under, if
    /// it is missing.
    fn instantiate(&mut self, to: &AbstractionId) {
        if let Some(id) = self.missing_instance(to, UniformConsensus::NAME) {
            self.with_context(|ctx| {
                let uc = UniformConsensus::new(id, ctx);
                ctx.register(uc);
            });
        } else if let Some(id) = self.missing_instance(to, NNAtomicRegister::NAME) {
            self.with_context(|ctx| {
                let nnar = NNAtomicRegister::new(id, ctx);
                ctx.register(nnar);
            });
        }
    }

    fn missing_instance(&self, to: &AbstractionId, name: &str) -> Option<AbstractionId> {
        let (instance, _) = to.instance_prefix(name)?;
        let app = AbstractionId::root(Application::NAME);
        (instance.parent().as_ref() == Some(&app) && !self.registry.contains(&instance)).then_some(instance)
    }

    /// The epoch to park `to` under: a future epoch of a live consensus.
    fn parking_slot(&self, to: &AbstractionId) -> Option<AbstractionId> {
        let (epoch, key) = to.instance_prefix(EpochConsensus::NAME)?;
        let ets: u64 = key.parse().ok()?;
        let uc = epoch.parent()?;
        match self.registry.get(&uc) {
            Some(AbstractionKind::Uc(uc)) if ets > uc.ets() => Some(epoch),
            _ => None,
        }
    }

    fn park(&mut self, epoch: AbstractionId, message: Message) {
        if self.parked_len >= MAX_PARKED {
            tracing_setup::routing_failure(&self.me, &message, "parking is full");
            return;
        }
        tracing::debug!(process = %self.me, epoch = %epoch, message = %message, "parking until epoch starts");
        self.parked.entry(epoch).or_default().push(message);
        self.parked_len += 1;
    }

    fn release_parked(&mut self, id: &AbstractionId) {
        if let Some(messages) = self.parked.remove(id) {
            self.parked_len -= messages.len();
            for message in messages {
                self.queue.trigger(message);
            }
        }

        // Epochs older than the one that just started will never run here.
        let Some((uc, ets)) = Self::epoch_of(id) else {
            return;
        };
        let skipped: Vec<_> = self
            .parked
            .keys()
            .filter(|parked| Self::epoch_of(parked).is_some_and(|(other, other_ets)| other == uc && other_ets < ets))
            .cloned()
            .collect();
        for epoch in skipped {
            if let Some(messages) = self.parked.remove(&epoch) {
                tracing::debug!(process = %self.me, epoch = %epoch, count = messages.len(), "dropping parked events of a skipped epoch");
                self.parked_len -= messages.len();
            }
        }
    }

    fn epoch_of(id: &AbstractionId) -> Option<(AbstractionId, u64)> {
        let segment = id.last_segment()?;
        if segment.name != EpochConsensus::NAME {
            return None;
        }
        let ets = segment.key?.parse().ok()?;
        Some((id.parent()?, ets))
    }

    fn with_context(&mut self, f: impl FnOnce(&mut Context<'_>)) {
        let mut outbox = Outbox::default();
        {
            let system_id = self.system_id.as_deref().unwrap_or_default();
            let mut ctx = Context::new(&self.me, &self.hub, &self.peers, system_id, self.heartbeat, &mut outbox);
            f(&mut ctx);
        }
        self.apply(outbox);
    }

    fn apply(&mut self, outbox: Outbox) {
        let Outbox {
            events,
            transmissions,
            timers,
            registrations,
        } = outbox;

        for abstraction in registrations {
            let id = abstraction.id().clone();
            let kind = abstraction.kind();
            if self.registry.add(abstraction) {
                tracing_setup::abstraction_registered(&self.me, &id, kind);
                self.release_parked(&id);
            }
        }
        for (delay, message) in timers {
            self.scheduler.schedule(delay, message);
        }
        for (destination, envelope) in transmissions {
            tracing_setup::message_sent(&self.me, &destination, &envelope);
            self.transport.send(&destination, envelope);
        }
        for event in events {
            if !self.queue.trigger(event) {
                tracing::debug!(process = %self.me, "event loop is gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::system::testing::{process, HEARTBEAT};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(ProcessId, Message)>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, destination: &ProcessId, envelope: Message) {
            self.sent.lock().unwrap().push((destination.clone(), envelope));
        }
    }

    #[derive(Default)]
    struct ManualScheduler {
        pending: Arc<Mutex<Vec<Message>>>,
    }

    impl Scheduler for ManualScheduler {
        fn schedule(&mut self, _delay: Duration, message: Message) {
            self.pending.lock().unwrap().push(message);
        }

        fn cancel_all(&mut self) {
            self.pending.lock().unwrap().clear();
        }
    }

    struct Fixture {
        system: System,
        events: UnboundedReceiver<Event>,
        transport: Arc<RecordingTransport>,
        timers: Arc<Mutex<Vec<Message>>>,
    }

    impl Fixture {
        fn new(rank: u32) -> Self {
            let (queue, events) = EventQueue::channel();
            let transport = Arc::new(RecordingTransport::default());
            let scheduler = ManualScheduler::default();
            let timers = scheduler.pending.clone();
            let mut me = process(rank);
            me.rank = 0;
            let hub = ProcessId::new("hub", 0, 0, "127.0.0.1", 5000);
            let system = System::new(me, hub, HEARTBEAT, queue, transport.clone(), Box::new(scheduler));
            Fixture {
                system,
                events,
                transport,
                timers,
            }
        }

        fn from_hub(&self, system_id: &str, payload: Payload) -> Event {
            let app = AbstractionId::root("app");
            let inner = Message::new(system_id, AbstractionId::root("hub"), app.clone(), payload);
            Event::Network(Message::new(
                system_id,
                AbstractionId::root("hub"),
                app.child("pl"),
                Payload::NetworkMessage {
                    sender_host: "127.0.0.1".to_string(),
                    sender_listening_port: 5000,
                    message: Box::new(inner),
                },
            ))
        }

        fn initialize(&mut self) {
            let init = self.from_hub(
                "sys",
                Payload::ProcInitializeSystem {
                    processes: (1..=3).map(process).collect(),
                },
            );
            assert_eq!(self.system.handle_event(init), Flow::Continue);
        }

        /// Runs queued events to quiescence.
        fn settle(&mut self) -> usize {
            let mut handled = 0;
            while let Ok(event) = self.events.try_recv() {
                self.system.handle_event(event);
                handled += 1;
            }
            handled
        }
    }

    #[test_log::test]
    fn test_initialize_builds_application_stack() {
        let mut f = Fixture::new(2);
        assert!(!f.system.is_initialized());
        f.initialize();

        assert!(f.system.is_initialized());
        assert_eq!(f.system.system_id(), Some("sys"));
        assert_eq!(f.system.process_id(), &process(2));
        assert_eq!(f.system.peers().len(), 3);
        assert_eq!(f.system.abstraction_tree(), "app\n  beb\n    pl\n  pl\n");
    }

    #[test_log::test]
    fn test_initialize_rejects_foreign_membership() {
        let mut f = Fixture::new(7);
        f.initialize();
        assert!(!f.system.is_initialized());
        assert!(f.system.abstraction(&AbstractionId::root("app")).is_none());
    }

    #[test_log::test]
    fn test_propose_creates_consensus_instance() {
        let mut f = Fixture::new(1);
        f.initialize();
        let propose = f.from_hub(
            "sys",
            Payload::AppPropose {
                topic: "t".to_string(),
                value: "x".into(),
            },
        );
        f.system.handle_event(propose);
        f.settle();

        let uc = AbstractionId::from("app.uc[t]");
        assert!(matches!(f.system.abstraction(&uc), Some(AbstractionKind::Uc(_))));
        assert!(f.system.abstraction(&uc.child("ec").child("eld").child("epfd")).is_some());
        assert!(f.system.abstraction(&AbstractionId::from("app.uc[t].ep[0]")).is_some());
        // the failure detector armed its first timeout
        assert_eq!(f.timers.lock().unwrap().len(), 1);
    }

    #[test_log::test]
    fn test_peer_message_creates_register() {
        let mut f = Fixture::new(1);
        f.initialize();

        let nnar = AbstractionId::from("app.nnar[r]");
        let inner = Message::new("sys", nnar.clone(), nnar.clone(), Payload::NnarInternalRead { read_id: 1 });
        let envelope = Message::new(
            "sys",
            nnar.child("beb").child("pl"),
            nnar.child("beb").child("pl"),
            Payload::NetworkMessage {
                sender_host: "127.0.0.1".to_string(),
                sender_listening_port: 5002,
                message: Box::new(inner),
            },
        );
        f.system.handle_event(Event::Network(envelope));
        f.settle();

        assert!(f.system.abstraction(&nnar).is_some());
        let replies: Vec<_> = f
            .transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(destination, _)| destination.rank)
            .collect();
        assert_eq!(replies, vec![2]);
    }

    #[test_log::test]
    fn test_unknown_destination_is_dropped() {
        let mut f = Fixture::new(1);
        f.initialize();
        f.settle();

        let bogus = AbstractionId::from("app.nope");
        let message = Message::new("sys", bogus.clone(), bogus.clone(), Payload::EpAbort);
        f.system.handle_event(Event::Local(message));
        assert_eq!(f.settle(), 0);
        assert!(f.system.abstraction(&bogus).is_none());
        assert_eq!(f.system.parked_len(), 0);
    }

    #[test_log::test]
    fn test_foreign_system_id_is_dropped() {
        let mut f = Fixture::new(1);
        f.initialize();
        f.settle();

        let propose = f.from_hub(
            "other",
            Payload::AppPropose {
                topic: "t".to_string(),
                value: "x".into(),
            },
        );
        f.system.handle_event(propose);
        f.settle();
        assert!(f.system.abstraction(&AbstractionId::from("app.uc[t]")).is_none());
    }

    #[test_log::test]
    fn test_future_epoch_messages_are_parked_and_replayed() {
        let mut f = Fixture::new(1);
        f.initialize();
        let uc = AbstractionId::from("app.uc[t]");
        f.system.handle_event(Event::Local(Message::new(
            "sys",
            AbstractionId::root("app"),
            uc.clone(),
            Payload::UcPropose { value: "x".into() },
        )));
        f.settle();

        // rank 2 already runs epoch 5 and asks for our state
        let epoch = AbstractionId::from("app.uc[t].ep[5]");
        let read = Message::new("sys", epoch.clone(), epoch.clone(), Payload::EpInternalRead);
        let envelope = Message::new(
            "sys",
            epoch.child("beb").child("pl"),
            epoch.child("beb").child("pl"),
            Payload::NetworkMessage {
                sender_host: "127.0.0.1".to_string(),
                sender_listening_port: 5002,
                message: Box::new(read),
            },
        );
        f.system.handle_event(Event::Network(envelope));
        f.settle();
        assert_eq!(f.system.parked_len(), 1);
        f.transport.sent.lock().unwrap().clear();

        // our own epoch change catches up
        f.system.handle_event(Event::Local(Message::new(
            "sys",
            uc.child("ec"),
            uc.clone(),
            Payload::EcStartEpoch {
                new_timestamp: 5,
                new_leader: process(2),
            },
        )));
        f.settle();

        assert_eq!(f.system.parked_len(), 0);
        assert!(f.system.abstraction(&epoch).is_some());
        let sent = f.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, process(2));
    }

    #[test_log::test]
    fn test_destroy_clears_state_and_drains() {
        let mut f = Fixture::new(1);
        f.initialize();
        f.settle();

        let destroy = f.from_hub("sys", Payload::ProcDestroySystem);
        assert_eq!(f.system.handle_event(destroy), Flow::Drain);
        assert!(!f.system.is_initialized());
        assert!(f.system.peers().is_empty());
        assert_eq!(f.system.abstraction_tree(), "");
        assert!(f.timers.lock().unwrap().is_empty());

        // a fresh session can start right away
        f.initialize();
        assert!(f.system.is_initialized());
    }

    #[test]
    fn test_registration_envelope() {
        let me = ProcessId::new("abc", 2, 0, "127.0.0.1", 5005);
        let envelope = System::registration(&me);
        assert_eq!(envelope.to_abstraction_id.as_str(), "app.pl");
        match envelope.payload {
            Payload::NetworkMessage {
                sender_listening_port,
                message,
                ..
            } => {
                assert_eq!(sender_listening_port, 5005);
                assert_eq!(
                    message.payload,
                    Payload::ProcRegistration {
                        owner: "abc".to_string(),
                        index: 2
                    }
                );
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
