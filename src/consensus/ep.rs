use crate::common::{AbstractionId, Message, Payload, ProcessId, Quorum, Value};
use crate::link::{BestEffortBroadcast, PerfectLink};
use crate::system::{Abstraction, Context};

use super::EpochConsensusState;

/// Read/write epoch consensus for one epoch.
///
/// Only the epoch's leader proposes. Once aborted the instance reports its
/// state to the parent and stays halted: every later input is ignored.
#[derive(Debug)]
pub struct EpochConsensus {
    id: AbstractionId,
    ets: u64,
    leader: ProcessId,
    state: EpochConsensusState,
    proposal: Value,
    states: Quorum<EpochConsensusState>,
    accepted: Quorum<()>,
    halted: bool,
}

impl EpochConsensus {
    pub const NAME: &'static str = "ep";

    pub fn new(
        id: AbstractionId,
        ets: u64,
        leader: ProcessId,
        state: EpochConsensusState,
        ctx: &mut Context<'_>,
    ) -> Self {
        ctx.register(PerfectLink::new(id.child(PerfectLink::NAME)));
        let beb = BestEffortBroadcast::new(id.child(BestEffortBroadcast::NAME), ctx);
        ctx.register(beb);

        EpochConsensus {
            id,
            ets,
            leader,
            state,
            proposal: Value::undefined(),
            states: Quorum::new(),
            accepted: Quorum::new(),
            halted: false,
        }
    }

    pub fn ets(&self) -> u64 {
        self.ets
    }

    pub fn leader(&self) -> &ProcessId {
        &self.leader
    }

    pub fn state(&self) -> &EpochConsensusState {
        &self.state
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    fn propose(&mut self, value: Value, ctx: &mut Context<'_>) -> bool {
        if !ctx.is_me(&self.leader) {
            tracing::warn!(id = %self.id, leader = %self.leader, "propose on a process that does not lead this epoch");
            return false;
        }
        self.proposal = value;
        ctx.broadcast(&self.id, Payload::EpInternalRead);
        true
    }

    fn on_state(&mut self, sender: ProcessId, state: EpochConsensusState, ctx: &mut Context<'_>) {
        self.states.add_reply(sender, state);
        if !self.states.is_complete(ctx.peers.len()) {
            return;
        }

        // Adopt the most recently accepted value, if anyone accepted one
        if let Some(highest) = EpochConsensusState::highest(self.states.take()) {
            if highest.value.is_defined() {
                self.proposal = highest.value;
            }
        }
        ctx.broadcast(
            &self.id,
            Payload::EpInternalWrite {
                value: self.proposal.clone(),
            },
        );
    }

    fn on_accept(&mut self, sender: ProcessId, ctx: &mut Context<'_>) {
        self.accepted.add_reply(sender, ());
        if !self.accepted.is_complete(ctx.peers.len()) {
            return;
        }
        self.accepted.reset();
        ctx.broadcast(
            &self.id,
            Payload::EpInternalDecided {
                value: self.proposal.clone(),
            },
        );
    }

    fn abort(&mut self, ctx: &mut Context<'_>) {
        tracing::debug!(id = %self.id, ets = self.ets, "epoch aborted");
        ctx.deliver_to_parent(
            &self.id,
            Payload::EpAborted {
                ets: self.ets,
                value_timestamp: self.state.value_timestamp,
                value: self.state.value.clone(),
            },
        );
        self.halted = true;
    }
}

impl Abstraction for EpochConsensus {
    fn id(&self) -> &AbstractionId {
        &self.id
    }

    fn handle(&mut self, message: Message, ctx: &mut Context<'_>) -> bool {
        if self.halted {
            tracing::debug!(id = %self.id, payload = message.payload.name(), "epoch halted, ignoring");
            return true;
        }

        match message.payload {
            Payload::EpPropose { value } => self.propose(value, ctx),
            Payload::EpAbort => {
                self.abort(ctx);
                true
            }
            Payload::BebDeliver { sender, message } => match message.payload {
                Payload::EpInternalRead => {
                    ctx.send(
                        &self.id,
                        &sender,
                        Payload::EpInternalState {
                            value_timestamp: self.state.value_timestamp,
                            value: self.state.value.clone(),
                        },
                    );
                    true
                }
                Payload::EpInternalWrite { value } => {
                    self.state = EpochConsensusState::new(self.ets, value);
                    ctx.send(&self.id, &sender, Payload::EpInternalAccept);
                    true
                }
                Payload::EpInternalDecided { value } => {
                    ctx.deliver_to_parent(&self.id, Payload::EpDecide { ets: self.ets, value });
                    true
                }
                _ => false,
            },
            Payload::PlDeliver {
                sender: Some(sender),
                message,
            } => match message.payload {
                Payload::EpInternalState { value_timestamp, value } => {
                    self.on_state(sender, EpochConsensusState::new(value_timestamp, value), ctx);
                    true
                }
                Payload::EpInternalAccept => {
                    self.on_accept(sender, ctx);
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}
