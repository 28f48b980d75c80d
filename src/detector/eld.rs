use std::collections::HashSet;

use crate::common::{AbstractionId, Message, Payload, ProcessId};
use crate::system::{Abstraction, Context};

use super::epfd::EventuallyPerfectFailureDetector;

/// Eventual leader detector: trusts the highest-rank member it does not
/// suspect, and announces every change of mind to its parent.
#[derive(Debug)]
pub struct EventualLeaderDetector {
    id: AbstractionId,
    suspected: HashSet<ProcessId>,
    leader: Option<ProcessId>,
}

impl EventualLeaderDetector {
    pub const NAME: &'static str = "eld";

    pub fn new(id: AbstractionId, ctx: &mut Context<'_>) -> Self {
        let epfd = EventuallyPerfectFailureDetector::new(id.child(EventuallyPerfectFailureDetector::NAME), ctx);
        ctx.register(epfd);
        EventualLeaderDetector {
            id,
            suspected: HashSet::new(),
            leader: None,
        }
    }

    pub fn leader(&self) -> Option<&ProcessId> {
        self.leader.as_ref()
    }

    fn update_leader(&mut self, ctx: &mut Context<'_>) {
        let peers = ctx.peers;
        let Some(candidate) = peers.leader_excluding(&self.suspected) else {
            tracing::debug!(id = %self.id, "every member is suspected");
            return;
        };
        if self.leader.as_ref() == Some(candidate) {
            return;
        }
        tracing::info!(me = %ctx.me, leader = %candidate, "trust");
        self.leader = Some(candidate.clone());
        ctx.deliver_to_parent(&self.id, Payload::EldTrust { process: candidate.clone() });
    }
}

impl Abstraction for EventualLeaderDetector {
    fn id(&self) -> &AbstractionId {
        &self.id
    }

    fn handle(&mut self, message: Message, ctx: &mut Context<'_>) -> bool {
        match message.payload {
            Payload::EpfdSuspect { process } => {
                self.suspected.insert(process);
                self.update_leader(ctx);
                true
            }
            Payload::EpfdRestore { process } => {
                self.suspected.remove(&process);
                self.update_leader(ctx);
                true
            }
            _ => false,
        }
    }
}
