//! Simulator that runs a cluster of processes over an in-memory network
//!
//! Time is logical: nothing sleeps. Each step delivers every frame that was
//! in flight when the step began, runs every live process until its queue
//! is empty, then advances the clock by one tick and fires the timers that
//! came due. A frame sent during a step is delivered in the next one, so
//! one network hop costs one tick.
//!
//! A seeded harness shuffles each step's deliveries to exercise other
//! interleavings the algorithms must tolerate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use crate::common::{AbstractionId, Message, Payload, ProcessId, Value};
use crate::network::Transport;
use crate::system::{Event, EventProcessor, EventQueue, Scheduler, System};

/// Events a process may handle in one step before the harness moves on.
pub const STEP_EVENT_LIMIT: usize = 100_000;

pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A frame on the simulated wire.
#[derive(Clone, Debug)]
pub struct InFlight {
    pub from_port: u16,
    pub destination: ProcessId,
    pub envelope: Message,
}

/// A message a process sent to the hub.
#[derive(Clone, Debug)]
pub struct HubDelivery {
    pub from_port: u16,
    pub message: Message,
}

struct SimTransport {
    port: u16,
    network: Arc<Mutex<Vec<InFlight>>>,
}

impl Transport for SimTransport {
    fn send(&self, destination: &ProcessId, envelope: Message) {
        lock(&self.network).push(InFlight {
            from_port: self.port,
            destination: destination.clone(),
            envelope,
        });
    }
}

type TimerList = Arc<Mutex<Vec<(u64, Message)>>>;

struct SimScheduler {
    clock: Arc<AtomicU64>,
    timers: TimerList,
}

impl Scheduler for SimScheduler {
    fn schedule(&mut self, delay: Duration, message: Message) {
        let due = self.clock.load(Ordering::SeqCst) + delay.as_millis() as u64;
        let mut timers = lock(&self.timers);
        timers.retain(|(_, pending)| pending.to_abstraction_id != message.to_abstraction_id);
        timers.push((due, message));
    }

    fn cancel_all(&mut self) {
        lock(&self.timers).clear();
    }
}

/// One simulated process.
pub struct SimProcess {
    pub port: u16,
    pub crashed: bool,
    processor: EventProcessor,
    queue: EventQueue,
    timers: TimerList,
}

impl SimProcess {
    pub fn system(&self) -> &System {
        self.processor.system()
    }

    pub fn pending_timers(&self) -> usize {
        lock(&self.timers).len()
    }
}

/// A hub and `n` processes, wired through the simulated network.
pub struct Cluster {
    /// The processes, in rank order: `processes[i]` has rank `i + 1`
    pub processes: Vec<SimProcess>,

    pub hub: ProcessId,

    /// Session id the hub stamps on its messages
    pub system_id: String,

    /// Frames waiting for the next step
    pub network: Arc<Mutex<Vec<InFlight>>>,

    /// Everything the processes sent to the hub, in arrival order
    pub hub_inbox: Vec<HubDelivery>,

    pub tick: Duration,

    pub steps: usize,

    clock: Arc<AtomicU64>,
    rng: Option<StdRng>,
}

impl Cluster {
    /// An initialized cluster of `n` processes with in-order delivery.
    pub fn new(n: u32) -> Self {
        let mut cluster = Cluster::build(n, None);
        cluster.initialize("sys-1");
        cluster
    }

    /// Like `new`, but every step delivers its frames in a seeded random
    /// order.
    pub fn with_seed(n: u32, seed: u64) -> Self {
        let mut cluster = Cluster::build(n, Some(StdRng::seed_from_u64(seed)));
        cluster.initialize("sys-1");
        cluster
    }

    fn build(n: u32, rng: Option<StdRng>) -> Self {
        let hub = ProcessId::new("hub", 0, 0, "127.0.0.1", 5000);
        let network = Arc::new(Mutex::new(Vec::new()));
        let clock = Arc::new(AtomicU64::new(0));

        let processes = (1..=n)
            .map(|index| {
                let port = 5000 + index as u16;
                let (queue, events) = EventQueue::channel();
                let timers: TimerList = Arc::new(Mutex::new(Vec::new()));
                let transport = Arc::new(SimTransport {
                    port,
                    network: network.clone(),
                });
                let scheduler = Box::new(SimScheduler {
                    clock: clock.clone(),
                    timers: timers.clone(),
                });
                let system = System::new(
                    ProcessId::new("abc", index, 0, "127.0.0.1", port),
                    hub.clone(),
                    Duration::from_millis(100),
                    queue.clone(),
                    transport,
                    scheduler,
                );
                SimProcess {
                    port,
                    crashed: false,
                    processor: EventProcessor::new(system, events, CancellationToken::new()),
                    queue,
                    timers,
                }
            })
            .collect();

        Cluster {
            processes,
            hub,
            system_id: String::new(),
            network,
            hub_inbox: Vec::new(),
            tick: DEFAULT_TICK,
            steps: 0,
            clock,
            rng,
        }
    }

    /// The membership the hub announces: ranks follow process order.
    pub fn membership(&self) -> Vec<ProcessId> {
        self.processes
            .iter()
            .enumerate()
            .map(|(i, p)| ProcessId::new("abc", i as u32 + 1, i as u32 + 1, "127.0.0.1", p.port))
            .collect()
    }

    pub fn system(&self, i: usize) -> &System {
        self.processes[i].system()
    }

    pub fn now(&self) -> Duration {
        Duration::from_millis(self.clock.load(Ordering::SeqCst))
    }

    /// Starts session `system_id` on every process and lets it settle.
    pub fn initialize(&mut self, system_id: &str) {
        self.system_id = system_id.to_string();
        let processes = self.membership();
        for i in 0..self.processes.len() {
            self.hub_send(
                i,
                Payload::ProcInitializeSystem {
                    processes: processes.clone(),
                },
            );
        }
        self.step();
    }

    pub fn destroy(&mut self) {
        for i in 0..self.processes.len() {
            self.hub_send(i, Payload::ProcDestroySystem);
        }
        self.step();
    }

    /// Puts a hub request for process `i` on the wire.
    pub fn hub_send(&mut self, i: usize, payload: Payload) {
        let app = AbstractionId::root("app");
        let hub_id = AbstractionId::root("hub");
        let inner = Message::new(&self.system_id, hub_id.clone(), app.clone(), payload);
        let envelope = Message::new(
            &self.system_id,
            hub_id,
            app.child("pl"),
            Payload::NetworkMessage {
                sender_host: self.hub.host.clone(),
                sender_listening_port: self.hub.port,
                message: Box::new(inner),
            },
        );
        let destination = ProcessId::new("abc", i as u32 + 1, 0, "127.0.0.1", self.processes[i].port);
        lock(&self.network).push(InFlight {
            from_port: self.hub.port,
            destination,
            envelope,
        });
    }

    pub fn propose(&mut self, i: usize, topic: &str, value: &str) {
        self.hub_send(
            i,
            Payload::AppPropose {
                topic: topic.to_string(),
                value: value.into(),
            },
        );
    }

    pub fn write(&mut self, i: usize, register: &str, value: &str) {
        self.hub_send(
            i,
            Payload::AppWrite {
                register: register.to_string(),
                value: value.into(),
            },
        );
    }

    pub fn read(&mut self, i: usize, register: &str) {
        self.hub_send(i, Payload::AppRead { register: register.to_string() });
    }

    /// Stops process `i` for good: it handles nothing, and frames to or
    /// from it are lost from the next step on.
    pub fn crash(&mut self, i: usize) {
        let process = &mut self.processes[i];
        process.crashed = true;
        lock(&process.timers).clear();
        tracing::info!(port = process.port, "crashed");
    }

    pub fn step(&mut self) -> bool {
        self.steps += 1;

        let mut batch = std::mem::take(&mut *lock(&self.network));
        if let Some(rng) = self.rng.as_mut() {
            batch.shuffle(rng);
        }
        let delivered = batch.len();
        for flight in batch {
            self.deliver(flight);
        }
        let mut handled = self.run_processes();

        let now = self.clock.fetch_add(self.tick.as_millis() as u64, Ordering::SeqCst) + self.tick.as_millis() as u64;
        for process in self.processes.iter().filter(|p| !p.crashed) {
            let due: Vec<Message> = {
                let mut timers = lock(&process.timers);
                let (due, pending): (Vec<_>, Vec<_>) = timers.drain(..).partition(|(at, _)| *at <= now);
                *timers = pending;
                due.into_iter().map(|(_, message)| message).collect()
            };
            for message in due {
                process.queue.push(Event::Local(message));
            }
        }
        handled += self.run_processes();

        delivered > 0 || handled > 0
    }

    /// Steps until `done` holds or `max_steps` have run. Returns whether
    /// `done` held.
    pub fn run_until(&mut self, max_steps: usize, mut done: impl FnMut(&Cluster) -> bool) -> bool {
        for _ in 0..max_steps {
            if done(&*self) {
                return true;
            }
            self.step();
        }
        done(&*self)
    }

    pub fn run_for(&mut self, duration: Duration) {
        let steps = (duration.as_millis() / self.tick.as_millis().max(1)) as usize;
        for _ in 0..steps {
            self.step();
        }
    }

    fn deliver(&mut self, flight: InFlight) {
        if self.is_crashed(flight.from_port) {
            return;
        }
        if flight.destination.port == self.hub.port {
            if let Payload::NetworkMessage { message, .. } = flight.envelope.payload {
                self.hub_inbox.push(HubDelivery {
                    from_port: flight.from_port,
                    message: *message,
                });
            }
            return;
        }
        if let Some(process) = self
            .processes
            .iter()
            .find(|p| p.port == flight.destination.port && !p.crashed)
        {
            process.queue.push(Event::Network(flight.envelope));
        }
    }

    fn is_crashed(&self, port: u16) -> bool {
        self.processes.iter().any(|p| p.port == port && p.crashed)
    }

    fn run_processes(&mut self) -> usize {
        let mut handled = 0;
        for process in self.processes.iter_mut().filter(|p| !p.crashed) {
            let count = process.processor.process_pending(STEP_EVENT_LIMIT);
            if count == STEP_EVENT_LIMIT {
                tracing::warn!(port = process.port, "step event limit reached");
            }
            handled += count;
        }
        handled
    }

    fn index_of(&self, port: u16) -> Option<usize> {
        self.processes.iter().position(|p| p.port == port)
    }

    /// Consensus decisions reported to the hub, as `(process index, value)`.
    pub fn decisions(&self) -> Vec<(usize, Value)> {
        self.hub_inbox
            .iter()
            .filter_map(|delivery| match &delivery.message.payload {
                Payload::AppDecide { value } => Some((self.index_of(delivery.from_port)?, value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Completed register writes, as `(process index, register)`.
    pub fn write_returns(&self) -> Vec<(usize, String)> {
        self.hub_inbox
            .iter()
            .filter_map(|delivery| match &delivery.message.payload {
                Payload::AppWriteReturn { register } => Some((self.index_of(delivery.from_port)?, register.clone())),
                _ => None,
            })
            .collect()
    }

    /// Completed register reads, as `(process index, register, value)`.
    pub fn read_returns(&self) -> Vec<(usize, String, Value)> {
        self.hub_inbox
            .iter()
            .filter_map(|delivery| match &delivery.message.payload {
                Payload::AppReadReturn { register, value } => {
                    Some((self.index_of(delivery.from_port)?, register.clone(), value.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Broadcast values relayed to the hub, as `(process index, value)`.
    pub fn broadcast_values(&self) -> Vec<(usize, Value)> {
        self.hub_inbox
            .iter()
            .filter_map(|delivery| match &delivery.message.payload {
                Payload::AppValue { value } => Some((self.index_of(delivery.from_port)?, value.clone())),
                _ => None,
            })
            .collect()
    }
}
