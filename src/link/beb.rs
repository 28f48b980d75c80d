use crate::common::{AbstractionId, Message, Payload};
use crate::system::{Abstraction, Context};

use super::pl::PerfectLink;

/// Best-effort broadcast: one perfect-link send per member, ourselves
/// included.
#[derive(Debug)]
pub struct BestEffortBroadcast {
    id: AbstractionId,
}

impl BestEffortBroadcast {
    pub const NAME: &'static str = "beb";

    pub fn new(id: AbstractionId, ctx: &mut Context<'_>) -> Self {
        ctx.register(PerfectLink::new(id.child(PerfectLink::NAME)));
        BestEffortBroadcast { id }
    }

    fn broadcast(&self, message: Message, ctx: &mut Context<'_>) {
        let peers = ctx.peers;
        let link = self.id.child(PerfectLink::NAME);
        for destination in peers.iter() {
            ctx.trigger(
                &self.id,
                link.clone(),
                Payload::PlSend {
                    destination: destination.clone(),
                    message: Box::new(message.clone()),
                },
            );
        }
    }
}

impl Abstraction for BestEffortBroadcast {
    fn id(&self) -> &AbstractionId {
        &self.id
    }

    fn handle(&mut self, message: Message, ctx: &mut Context<'_>) -> bool {
        match message.payload {
            Payload::BebBroadcast { message } => {
                self.broadcast(*message, ctx);
                true
            }
            Payload::PlDeliver {
                sender: Some(sender),
                message,
            } => {
                ctx.deliver_to_parent(&self.id, Payload::BebDeliver { sender, message });
                true
            }
            Payload::PlDeliver { sender: None, message } => {
                tracing::warn!(id = %self.id, inner = message.payload.name(), "broadcast from a non-member");
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::testing::{local, pl_deliver, process, TestContext};

    #[test]
    fn test_broadcast_sends_to_every_member() {
        let mut t = TestContext::new(2, 3);
        let id = AbstractionId::from("app.beb");
        let mut beb = BestEffortBroadcast::new(id.clone(), &mut t.ctx());
        let outbox = t.take();
        assert_eq!(outbox.registrations.len(), 1);
        assert_eq!(outbox.registrations[0].id(), &id.child("pl"));

        let inner = local(&AbstractionId::root("app"), Payload::AppValue { value: "v".into() });
        assert!(beb.handle(local(&id, Payload::BebBroadcast { message: Box::new(inner) }), &mut t.ctx()));

        let destinations: Vec<_> = t.sent().into_iter().map(|(p, _)| p.rank).collect();
        assert_eq!(destinations, vec![1, 2, 3]);
    }

    #[test]
    fn test_deliver_from_member() {
        let mut t = TestContext::new(1, 3);
        let id = AbstractionId::from("app.beb");
        let mut beb = BestEffortBroadcast::new(id.clone(), &mut t.ctx());
        t.take();

        // the link delivers to its parent, this broadcast
        let mut delivery = pl_deliver(&AbstractionId::root("app"), &process(3), Payload::EpInternalRead);
        delivery.to_abstraction_id = id.clone();
        assert!(beb.handle(delivery, &mut t.ctx()));

        let triggered = t.triggered();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].0, AbstractionId::root("app"));
        match &triggered[0].1 {
            Payload::BebDeliver { sender, message } => {
                assert_eq!(sender, &process(3));
                assert_eq!(message.payload, Payload::EpInternalRead);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_deliver_without_sender_is_rejected() {
        let mut t = TestContext::new(1, 3);
        let id = AbstractionId::from("app.beb");
        let mut beb = BestEffortBroadcast::new(id.clone(), &mut t.ctx());
        t.take();

        let delivery = local(
            &id,
            Payload::PlDeliver {
                sender: None,
                message: Box::new(local(&id, Payload::EpInternalRead)),
            },
        );
        assert!(!beb.handle(delivery, &mut t.ctx()));
        assert!(t.take().is_empty());
    }
}
