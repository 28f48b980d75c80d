use crate::common::{AbstractionId, Message, Payload, ProcessId, Value};
use crate::system::{Abstraction, Context};

use super::{EpochChange, EpochConsensus, EpochConsensusState};

/// Leader-driven uniform consensus for one topic.
///
/// Runs one epoch consensus at a time. When epoch change starts a new
/// epoch, the current one is aborted first and the new one is created from
/// the state the old one reports, which is what carries a possibly decided
/// value across leaders.
#[derive(Debug)]
pub struct UniformConsensus {
    id: AbstractionId,
    value: Value,
    proposed: bool,
    decided: bool,
    ets: u64,
    leader: ProcessId,
    next_epoch: Option<(u64, ProcessId)>,
}

impl UniformConsensus {
    pub const NAME: &'static str = "uc";

    pub fn new(id: AbstractionId, ctx: &mut Context<'_>) -> Self {
        let leader = ctx.peers.leader().unwrap_or(ctx.me).clone();

        let ec = EpochChange::new(id.child(EpochChange::NAME), ctx);
        ctx.register(ec);

        let uc = UniformConsensus {
            id,
            value: Value::undefined(),
            proposed: false,
            decided: false,
            ets: 0,
            leader,
            next_epoch: None,
        };
        let ep = EpochConsensus::new(uc.epoch_id(0), 0, uc.leader.clone(), EpochConsensusState::default(), ctx);
        ctx.register(ep);
        uc
    }

    pub fn ets(&self) -> u64 {
        self.ets
    }

    pub fn leader(&self) -> &ProcessId {
        &self.leader
    }

    pub fn is_decided(&self) -> bool {
        self.decided
    }

    fn epoch_id(&self, ets: u64) -> AbstractionId {
        self.id.indexed_child(EpochConsensus::NAME, ets)
    }

    fn try_propose(&mut self, ctx: &mut Context<'_>) {
        if self.proposed || !self.value.is_defined() || !ctx.is_me(&self.leader) {
            return;
        }
        self.proposed = true;
        tracing::debug!(id = %self.id, ets = self.ets, value = %self.value, "proposing in epoch");
        ctx.trigger(
            &self.id,
            self.epoch_id(self.ets),
            Payload::EpPropose {
                value: self.value.clone(),
            },
        );
    }

    fn on_start_epoch(&mut self, new_timestamp: u64, new_leader: ProcessId, ctx: &mut Context<'_>) {
        self.next_epoch = Some((new_timestamp, new_leader));
        ctx.trigger(&self.id, self.epoch_id(self.ets), Payload::EpAbort);
    }

    fn on_aborted(&mut self, ets: u64, state: EpochConsensusState, ctx: &mut Context<'_>) {
        if ets != self.ets {
            tracing::debug!(id = %self.id, ets, current = self.ets, "abort report from an old epoch");
            return;
        }
        let Some((next_ets, next_leader)) = self.next_epoch.take() else {
            tracing::warn!(id = %self.id, ets, "epoch aborted with no epoch to move to");
            return;
        };

        tracing::info!(me = %ctx.me, topic = %self.id, ets = next_ets, leader = %next_leader, "switching epoch");
        self.ets = next_ets;
        self.leader = next_leader;
        self.proposed = false;

        let ep = EpochConsensus::new(self.epoch_id(self.ets), self.ets, self.leader.clone(), state, ctx);
        ctx.register(ep);
        self.try_propose(ctx);
    }

    fn on_decide(&mut self, ets: u64, value: Value, ctx: &mut Context<'_>) {
        if ets != self.ets {
            tracing::debug!(id = %self.id, ets, current = self.ets, "decision from an old epoch");
            return;
        }
        if self.decided {
            return;
        }
        self.decided = true;
        tracing::info!(me = %ctx.me, topic = %self.id, value = %value, "decided");
        ctx.deliver_to_parent(&self.id, Payload::UcDecide { value });
    }
}

impl Abstraction for UniformConsensus {
    fn id(&self) -> &AbstractionId {
        &self.id
    }

    fn handle(&mut self, message: Message, ctx: &mut Context<'_>) -> bool {
        match message.payload {
            Payload::UcPropose { value } => {
                if self.value.is_defined() {
                    tracing::debug!(id = %self.id, "already proposed, ignoring");
                } else {
                    self.value = value;
                    self.try_propose(ctx);
                }
                true
            }
            Payload::EcStartEpoch {
                new_timestamp,
                new_leader,
            } => {
                self.on_start_epoch(new_timestamp, new_leader, ctx);
                true
            }
            Payload::EpAborted {
                ets,
                value_timestamp,
                value,
            } => {
                self.on_aborted(ets, EpochConsensusState::new(value_timestamp, value), ctx);
                true
            }
            Payload::EpDecide { ets, value } => {
                self.on_decide(ets, value, ctx);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::testing::{local, process, TestContext};

    fn consensus(t: &mut TestContext) -> UniformConsensus {
        let uc = UniformConsensus::new(AbstractionId::from("app.uc[t]"), &mut t.ctx());
        let outbox = t.take();
        let ids: Vec<_> = outbox.registrations.iter().map(|a| a.id().as_str().to_string()).collect();
        assert!(ids.contains(&"app.uc[t].ec".to_string()));
        assert!(ids.contains(&"app.uc[t].ep[0]".to_string()));
        uc
    }

    fn from_epoch(uc: &UniformConsensus, ets: u64, payload: Payload) -> Message {
        Message::new(
            "sys",
            uc.epoch_id(ets),
            uc.id().clone(),
            payload,
        )
    }

    #[test]
    fn test_leader_proposes_into_first_epoch() {
        let mut t = TestContext::new(3, 3);
        let mut uc = consensus(&mut t);
        let id = uc.id().clone();
        assert_eq!(uc.leader(), &process(3));

        assert!(uc.handle(local(&id, Payload::UcPropose { value: "x".into() }), &mut t.ctx()));
        assert_eq!(
            t.triggered(),
            vec![(AbstractionId::from("app.uc[t].ep[0]"), Payload::EpPropose { value: "x".into() })]
        );

        // a second proposal changes nothing
        uc.handle(local(&id, Payload::UcPropose { value: "y".into() }), &mut t.ctx());
        assert!(t.take().is_empty());
    }

    #[test]
    fn test_follower_does_not_propose() {
        let mut t = TestContext::new(1, 3);
        let mut uc = consensus(&mut t);
        let id = uc.id().clone();
        uc.handle(local(&id, Payload::UcPropose { value: "x".into() }), &mut t.ctx());
        assert!(t.take().is_empty());
    }

    #[test]
    fn test_epoch_switch_carries_state_and_proposes() {
        let mut t = TestContext::new(2, 3);
        let mut uc = consensus(&mut t);
        let id = uc.id().clone();
        uc.handle(local(&id, Payload::UcPropose { value: "x".into() }), &mut t.ctx());
        assert!(t.take().is_empty());

        let start = Message::new(
            "sys",
            id.child("ec"),
            id.clone(),
            Payload::EcStartEpoch {
                new_timestamp: 5,
                new_leader: process(2),
            },
        );
        uc.handle(start, &mut t.ctx());
        assert_eq!(t.triggered(), vec![(AbstractionId::from("app.uc[t].ep[0]"), Payload::EpAbort)]);

        let aborted = from_epoch(
            &uc,
            0,
            Payload::EpAborted {
                ets: 0,
                value_timestamp: 0,
                value: Value::undefined(),
            },
        );
        uc.handle(aborted, &mut t.ctx());
        assert_eq!(uc.ets(), 5);
        assert_eq!(uc.leader(), &process(2));

        let outbox = t.take();
        let registered: Vec<_> = outbox.registrations.iter().map(|a| a.id().as_str().to_string()).collect();
        assert!(registered.contains(&"app.uc[t].ep[5]".to_string()));
        let proposals: Vec<_> = outbox
            .events
            .iter()
            .filter(|m| matches!(m.payload, Payload::EpPropose { .. }))
            .map(|m| m.to_abstraction_id.as_str().to_string())
            .collect();
        assert_eq!(proposals, vec!["app.uc[t].ep[5]"]);
    }

    #[test]
    fn test_aborted_from_old_epoch_is_ignored() {
        let mut t = TestContext::new(1, 3);
        let mut uc = consensus(&mut t);
        let aborted = from_epoch(
            &uc,
            7,
            Payload::EpAborted {
                ets: 7,
                value_timestamp: 0,
                value: Value::undefined(),
            },
        );
        assert!(uc.handle(aborted, &mut t.ctx()));
        assert!(t.take().is_empty());
        assert_eq!(uc.ets(), 0);
    }

    #[test]
    fn test_decides_once() {
        let mut t = TestContext::new(1, 3);
        let mut uc = consensus(&mut t);

        let decide = from_epoch(&uc, 0, Payload::EpDecide { ets: 0, value: "x".into() });
        uc.handle(decide.clone(), &mut t.ctx());
        assert_eq!(
            t.triggered(),
            vec![(AbstractionId::root("app"), Payload::UcDecide { value: "x".into() })]
        );
        assert!(uc.is_decided());

        uc.handle(decide, &mut t.ctx());
        assert!(t.take().is_empty());
    }

    #[test]
    fn test_decision_from_old_epoch_is_ignored() {
        let mut t = TestContext::new(1, 3);
        let mut uc = consensus(&mut t);
        let decide = from_epoch(&uc, 3, Payload::EpDecide { ets: 3, value: "x".into() });
        assert!(uc.handle(decide, &mut t.ctx()));
        assert!(t.take().is_empty());
        assert!(!uc.is_decided());
    }
}
