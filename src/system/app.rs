use crate::common::{AbstractionId, Message, Payload};
use crate::consensus::UniformConsensus;
use crate::link::{BestEffortBroadcast, PerfectLink};
use crate::register::NNAtomicRegister;

use super::abstraction::{Abstraction, Context};

/*
    The application is the root of every process's stack and its only
    contact with the hub. Hub requests arrive on `app.pl`; each is turned
    into an event for the abstraction that serves it, and results flow back
    to the hub over the same link.

    Consensus instances and registers are addressed by name
    (`app.uc[topic]`, `app.nnar[register]`) and come into existence the
    first time something is sent to them.
*/

#[derive(Debug)]
pub struct Application {
    id: AbstractionId,
}

impl Application {
    pub const NAME: &'static str = "app";

    pub fn new(ctx: &mut Context<'_>) -> Self {
        let id = AbstractionId::root(Self::NAME);
        ctx.register(PerfectLink::new(id.child(PerfectLink::NAME)));
        let beb = BestEffortBroadcast::new(id.child(BestEffortBroadcast::NAME), ctx);
        ctx.register(beb);
        Application { id }
    }

    fn on_hub_request(&mut self, request: Message, ctx: &mut Context<'_>) -> bool {
        match request.payload {
            Payload::AppBroadcast { value } => {
                ctx.broadcast(&self.id, Payload::AppValue { value });
                true
            }
            Payload::AppPropose { topic, value } => {
                let uc = self.id.indexed_child(UniformConsensus::NAME, &topic);
                ctx.trigger(&self.id, uc, Payload::UcPropose { value });
                true
            }
            Payload::AppWrite { register, value } => {
                let nnar = self.id.indexed_child(NNAtomicRegister::NAME, &register);
                ctx.trigger(&self.id, nnar, Payload::NnarWrite { value });
                true
            }
            Payload::AppRead { register } => {
                let nnar = self.id.indexed_child(NNAtomicRegister::NAME, &register);
                ctx.trigger(&self.id, nnar, Payload::NnarRead);
                true
            }
            _ => false,
        }
    }

    fn reply_to_hub(&self, payload: Payload, ctx: &mut Context<'_>) {
        let hub = ctx.hub;
        ctx.send(&self.id, hub, payload);
    }

    fn register_name(from: &AbstractionId) -> String {
        from.instance_key(NNAtomicRegister::NAME).unwrap_or_default().to_string()
    }
}

impl Abstraction for Application {
    fn id(&self) -> &AbstractionId {
        &self.id
    }

    fn handle(&mut self, message: Message, ctx: &mut Context<'_>) -> bool {
        let from = message.from_abstraction_id;
        match message.payload {
            Payload::PlDeliver { message, .. } => self.on_hub_request(*message, ctx),
            Payload::BebDeliver { message, .. } => match message.payload {
                Payload::AppValue { value } => {
                    self.reply_to_hub(Payload::AppValue { value }, ctx);
                    true
                }
                _ => false,
            },
            Payload::UcDecide { value } => {
                let topic = from.instance_key(UniformConsensus::NAME).unwrap_or_default();
                tracing::info!(me = %ctx.me, topic, value = %value, "consensus decided");
                self.reply_to_hub(Payload::AppDecide { value }, ctx);
                true
            }
            Payload::NnarWriteReturn => {
                let register = Self::register_name(&from);
                self.reply_to_hub(Payload::AppWriteReturn { register }, ctx);
                true
            }
            Payload::NnarReadReturn { value } => {
                let register = Self::register_name(&from);
                // The hub never sees an undefined value, so a read of a
                // register nobody wrote is left unanswered.
                if !value.is_defined() {
                    tracing::info!(me = %ctx.me, register = %register, "register has never been written");
                    return true;
                }
                self.reply_to_hub(Payload::AppReadReturn { register, value }, ctx);
                true
            }
            _ => false,
        }
    }
}
