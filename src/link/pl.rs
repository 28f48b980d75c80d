use crate::common::{AbstractionId, Message, Payload, ProcessId};
use crate::system::{Abstraction, Context};

/*
    The perfect link is the only abstraction that touches the network. On
    send it wraps the inner message into a network envelope stamped with our
    listening address and hands it to the transport; the envelope is
    addressed to this link's own id, so the peer's twin link picks it up.
    On receipt it resolves the sender by address and delivers the inner
    message to its parent.

    Delivery relies on TCP for ordering and on the transport for retries:
    a frame the transport cannot get out is lost, which the algorithms above
    tolerate as a crashed or slow peer.
*/

#[derive(Debug)]
pub struct PerfectLink {
    id: AbstractionId,
}

impl PerfectLink {
    pub const NAME: &'static str = "pl";

    pub fn new(id: AbstractionId) -> Self {
        PerfectLink { id }
    }

    fn send(&self, destination: ProcessId, message: Message, ctx: &mut Context<'_>) {
        let envelope = ctx.message(
            &self.id,
            self.id.clone(),
            Payload::NetworkMessage {
                sender_host: ctx.me.host.clone(),
                sender_listening_port: ctx.me.port,
                message: Box::new(message),
            },
        );
        ctx.transmit(destination, envelope);
    }

    fn deliver(&self, host: &str, port: u16, message: Message, ctx: &mut Context<'_>) {
        // The hub is not a member, so its messages arrive without a sender.
        let sender = ctx.peers.find_by_address(host, port).cloned();
        if sender.is_none() {
            tracing::trace!(host, port, "delivering from a non-member");
        }
        ctx.deliver_to_parent(
            &self.id,
            Payload::PlDeliver {
                sender,
                message: Box::new(message),
            },
        );
    }
}

impl Abstraction for PerfectLink {
    fn id(&self) -> &AbstractionId {
        &self.id
    }

    fn handle(&mut self, message: Message, ctx: &mut Context<'_>) -> bool {
        match message.payload {
            Payload::PlSend { destination, message } => {
                self.send(destination, *message, ctx);
                true
            }
            Payload::NetworkMessage {
                sender_host,
                sender_listening_port,
                message,
            } => {
                self.deliver(&sender_host, sender_listening_port, *message, ctx);
                true
            }
            _ => false,
        }
    }
}
