use std::collections::HashSet;
use std::time::Duration;

use crate::common::{AbstractionId, Message, Payload, ProcessId};
use crate::link::PerfectLink;
use crate::system::{Abstraction, Context};

/*
    Eventually perfect failure detector, increasing-timeout flavour.

    Every `delay` we look at who answered the last round of heartbeats. A
    member that stayed silent becomes suspected; a suspected member that
    answered is restored. Having to restore someone means we suspected too
    early, so the delay grows by the heartbeat interval for every later
    round. Eventually the delay exceeds the real round-trip time and
    correct processes stop being suspected.
*/

#[derive(Debug)]
pub struct EventuallyPerfectFailureDetector {
    id: AbstractionId,
    alive: HashSet<ProcessId>,
    suspected: HashSet<ProcessId>,
    delay: Duration,
    delta: Duration,
}

impl EventuallyPerfectFailureDetector {
    pub const NAME: &'static str = "epfd";

    pub fn new(id: AbstractionId, ctx: &mut Context<'_>) -> Self {
        ctx.register(PerfectLink::new(id.child(PerfectLink::NAME)));
        let detector = EventuallyPerfectFailureDetector {
            id,
            alive: ctx.peers.iter().cloned().collect(),
            suspected: HashSet::new(),
            delay: ctx.heartbeat,
            delta: ctx.heartbeat,
        };
        detector.start_timer(ctx);
        detector
    }

    pub fn suspected(&self) -> &HashSet<ProcessId> {
        &self.suspected
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn start_timer(&self, ctx: &mut Context<'_>) {
        let timeout = ctx.message(&self.id, self.id.clone(), Payload::EpfdTimeout);
        ctx.schedule(self.delay, timeout);
    }

    fn on_timeout(&mut self, ctx: &mut Context<'_>) {
        if !self.alive.is_disjoint(&self.suspected) {
            self.delay += self.delta;
            tracing::debug!(id = %self.id, delay_ms = self.delay.as_millis() as u64, "suspected too early, backing off");
        }

        let peers = ctx.peers;
        for process in peers.iter() {
            let alive = self.alive.contains(process);
            let suspected = self.suspected.contains(process);
            if !alive && !suspected {
                self.suspected.insert(process.clone());
                tracing::info!(me = %ctx.me, process = %process, "suspect");
                ctx.deliver_to_parent(&self.id, Payload::EpfdSuspect { process: process.clone() });
            } else if alive && suspected {
                self.suspected.remove(process);
                tracing::info!(me = %ctx.me, process = %process, "restore");
                ctx.deliver_to_parent(&self.id, Payload::EpfdRestore { process: process.clone() });
            }
            ctx.send(&self.id, process, Payload::EpfdInternalHeartbeatRequest);
        }

        self.alive.clear();
        self.start_timer(ctx);
    }
}

impl Abstraction for EventuallyPerfectFailureDetector {
    fn id(&self) -> &AbstractionId {
        &self.id
    }

    fn handle(&mut self, message: Message, ctx: &mut Context<'_>) -> bool {
        match message.payload {
            Payload::EpfdTimeout => {
                self.on_timeout(ctx);
                true
            }
            Payload::PlDeliver {
                sender: Some(sender),
                message,
            } => match message.payload {
                Payload::EpfdInternalHeartbeatRequest => {
                    ctx.send(&self.id, &sender, Payload::EpfdInternalHeartbeatReply);
                    true
                }
                Payload::EpfdInternalHeartbeatReply => {
                    self.alive.insert(sender);
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}
