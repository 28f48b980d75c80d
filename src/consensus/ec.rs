use crate::common::{AbstractionId, Message, Payload, ProcessId};
use crate::detector::EventualLeaderDetector;
use crate::link::{BestEffortBroadcast, PerfectLink};
use crate::system::{Abstraction, Context};

/// Leader-based epoch change.
///
/// A process that becomes trusted starts a new epoch by broadcasting a
/// timestamp one membership-size above its last one; starting from its own
/// rank keeps timestamps unique across processes. Everyone accepts the
/// epoch only from the process they trust, and only if the timestamp is
/// newer than the last accepted one; otherwise they nack and the leader
/// tries again with a higher timestamp.
#[derive(Debug)]
pub struct EpochChange {
    id: AbstractionId,
    trusted: Option<ProcessId>,
    last_timestamp: u64,
    timestamp: u64,
}

impl EpochChange {
    pub const NAME: &'static str = "ec";

    pub fn new(id: AbstractionId, ctx: &mut Context<'_>) -> Self {
        ctx.register(PerfectLink::new(id.child(PerfectLink::NAME)));
        let beb = BestEffortBroadcast::new(id.child(BestEffortBroadcast::NAME), ctx);
        ctx.register(beb);
        let eld = EventualLeaderDetector::new(id.child(EventualLeaderDetector::NAME), ctx);
        ctx.register(eld);

        EpochChange {
            id,
            trusted: ctx.peers.leader().cloned(),
            last_timestamp: 0,
            timestamp: u64::from(ctx.me.rank),
        }
    }

    pub fn trusted(&self) -> Option<&ProcessId> {
        self.trusted.as_ref()
    }

    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    fn trusts_me(&self, ctx: &Context<'_>) -> bool {
        self.trusted.as_ref().is_some_and(|trusted| ctx.is_me(trusted))
    }

    fn start_new_epoch(&mut self, ctx: &mut Context<'_>) {
        self.timestamp += ctx.peers.len() as u64;
        tracing::debug!(me = %ctx.me, timestamp = self.timestamp, "proposing new epoch");
        ctx.broadcast(&self.id, Payload::EcInternalNewEpoch { timestamp: self.timestamp });
    }

    fn on_new_epoch(&mut self, sender: ProcessId, timestamp: u64, ctx: &mut Context<'_>) {
        if self.trusted.as_ref() == Some(&sender) && timestamp > self.last_timestamp {
            self.last_timestamp = timestamp;
            tracing::info!(me = %ctx.me, timestamp, leader = %sender, "start epoch");
            ctx.deliver_to_parent(
                &self.id,
                Payload::EcStartEpoch {
                    new_timestamp: timestamp,
                    new_leader: sender,
                },
            );
        } else {
            tracing::debug!(me = %ctx.me, timestamp, from = %sender, "refusing epoch");
            ctx.send(&self.id, &sender, Payload::EcInternalNack);
        }
    }
}

impl Abstraction for EpochChange {
    fn id(&self) -> &AbstractionId {
        &self.id
    }

    fn handle(&mut self, message: Message, ctx: &mut Context<'_>) -> bool {
        match message.payload {
            Payload::EldTrust { process } => {
                self.trusted = Some(process);
                if self.trusts_me(ctx) {
                    self.start_new_epoch(ctx);
                }
                true
            }
            Payload::BebDeliver { sender, message } => match message.payload {
                Payload::EcInternalNewEpoch { timestamp } => {
                    self.on_new_epoch(sender, timestamp, ctx);
                    true
                }
                _ => false,
            },
            Payload::PlDeliver { message, .. } => match message.payload {
                Payload::EcInternalNack => {
                    if self.trusts_me(ctx) {
                        self.start_new_epoch(ctx);
                    }
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::testing::{beb_deliver, local, pl_deliver, process, TestContext};

    fn epoch_change(t: &mut TestContext) -> EpochChange {
        let ec = EpochChange::new(AbstractionId::from("app.uc[t].ec"), &mut t.ctx());
        let outbox = t.take();
        let mut ids: Vec<_> = outbox.registrations.iter().map(|a| a.id().as_str().to_string()).collect();
        ids.sort();
        assert_eq!(
            ids,
            vec![
                "app.uc[t].ec.beb",
                "app.uc[t].ec.beb.pl",
                "app.uc[t].ec.eld",
                "app.uc[t].ec.eld.epfd",
                "app.uc[t].ec.eld.epfd.pl",
                "app.uc[t].ec.pl",
            ]
        );
        ec
    }

    #[test]
    fn test_initially_trusts_highest_rank() {
        let mut t = TestContext::new(1, 3);
        let ec = epoch_change(&mut t);
        assert_eq!(ec.trusted(), Some(&process(3)));
        assert_eq!(ec.last_timestamp(), 0);
    }

    #[test]
    fn test_trusted_process_starts_epoch() {
        let mut t = TestContext::new(2, 3);
        let mut ec = epoch_change(&mut t);
        let id = ec.id().clone();

        assert!(ec.handle(local(&id, Payload::EldTrust { process: process(2) }), &mut t.ctx()));
        assert_eq!(t.broadcasts(), vec![Payload::EcInternalNewEpoch { timestamp: 5 }]);

        // a nack makes it try again, one membership size higher
        assert!(ec.handle(pl_deliver(&id, &process(1), Payload::EcInternalNack), &mut t.ctx()));
        assert_eq!(t.broadcasts(), vec![Payload::EcInternalNewEpoch { timestamp: 8 }]);
    }

    #[test]
    fn test_untrusted_process_does_not_start_epoch() {
        let mut t = TestContext::new(1, 3);
        let mut ec = epoch_change(&mut t);
        let id = ec.id().clone();

        assert!(ec.handle(local(&id, Payload::EldTrust { process: process(2) }), &mut t.ctx()));
        assert!(t.broadcasts().is_empty());
        assert!(ec.handle(pl_deliver(&id, &process(3), Payload::EcInternalNack), &mut t.ctx()));
        assert!(t.broadcasts().is_empty());
    }

    #[test]
    fn test_accepts_newer_epoch_from_trusted() {
        let mut t = TestContext::new(1, 3);
        let mut ec = epoch_change(&mut t);
        let id = ec.id().clone();

        assert!(ec.handle(beb_deliver(&id, &process(3), Payload::EcInternalNewEpoch { timestamp: 6 }), &mut t.ctx()));
        assert_eq!(
            t.triggered(),
            vec![(
                AbstractionId::from("app.uc[t]"),
                Payload::EcStartEpoch {
                    new_timestamp: 6,
                    new_leader: process(3)
                }
            )]
        );
        assert_eq!(ec.last_timestamp(), 6);
    }

    #[test]
    fn test_nacks_stale_or_untrusted_epoch() {
        let mut t = TestContext::new(1, 3);
        let mut ec = epoch_change(&mut t);
        let id = ec.id().clone();
        ec.handle(beb_deliver(&id, &process(3), Payload::EcInternalNewEpoch { timestamp: 6 }), &mut t.ctx());
        t.take();

        // not newer
        ec.handle(beb_deliver(&id, &process(3), Payload::EcInternalNewEpoch { timestamp: 3 }), &mut t.ctx());
        assert_eq!(t.sent(), vec![(process(3), Payload::EcInternalNack)]);

        // not trusted
        ec.handle(beb_deliver(&id, &process(2), Payload::EcInternalNewEpoch { timestamp: 8 }), &mut t.ctx());
        assert_eq!(t.sent(), vec![(process(2), Payload::EcInternalNack)]);
        assert_eq!(ec.last_timestamp(), 6);
    }
}
