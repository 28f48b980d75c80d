use crate::common::{AbstractionId, Message, Payload, ProcessId, Quorum, Value};
use crate::link::{BestEffortBroadcast, PerfectLink};
use crate::system::{Abstraction, Context};

use super::NnarEntry;

/*
    (N,N) atomic register, read-impose-write-majority.

    Reads and writes both run two majority phases. The first queries a
    majority for their entries and picks the newest. The second imposes an
    entry on a majority: a read writes back what it found, so no later read
    can return something older; a write imposes its own value one timestamp
    above the newest it saw, tagged with our rank to break ties.

    Every operation carries a fresh read id so replies to an earlier
    operation cannot complete the current one. A process runs one operation
    at a time; the hub does not issue a second before the first returns.
*/

#[derive(Debug)]
pub struct NNAtomicRegister {
    id: AbstractionId,
    entry: NnarEntry,
    read_id: u64,
    reading: bool,
    write_value: Value,
    read_value: Value,
    read_list: Quorum<NnarEntry>,
    acks: Quorum<()>,
}

impl NNAtomicRegister {
    pub const NAME: &'static str = "nnar";

    pub fn new(id: AbstractionId, ctx: &mut Context<'_>) -> Self {
        ctx.register(PerfectLink::new(id.child(PerfectLink::NAME)));
        let beb = BestEffortBroadcast::new(id.child(BestEffortBroadcast::NAME), ctx);
        ctx.register(beb);

        NNAtomicRegister {
            id,
            entry: NnarEntry::default(),
            read_id: 0,
            reading: false,
            write_value: Value::undefined(),
            read_value: Value::undefined(),
            read_list: Quorum::new(),
            acks: Quorum::new(),
        }
    }

    pub fn entry(&self) -> &NnarEntry {
        &self.entry
    }

    fn start(&mut self, reading: bool, ctx: &mut Context<'_>) {
        self.read_id += 1;
        self.reading = reading;
        self.acks.reset();
        self.read_list.reset();
        ctx.broadcast(&self.id, Payload::NnarInternalRead { read_id: self.read_id });
    }

    fn on_value(&mut self, sender: ProcessId, read_id: u64, entry: NnarEntry, ctx: &mut Context<'_>) {
        if read_id != self.read_id {
            tracing::trace!(id = %self.id, read_id, current = self.read_id, "stale value reply");
            return;
        }
        self.read_list.add_reply(sender, entry);
        if !self.read_list.is_complete(ctx.peers.len()) {
            return;
        }

        let highest = NnarEntry::highest(self.read_list.take()).unwrap_or_default();
        let imposed = if self.reading {
            self.read_value = highest.value.clone();
            highest
        } else {
            NnarEntry::new(highest.timestamp + 1, ctx.me.rank, self.write_value.clone())
        };
        ctx.broadcast(
            &self.id,
            Payload::NnarInternalWrite {
                read_id: self.read_id,
                timestamp: imposed.timestamp,
                writer_rank: imposed.writer_rank,
                value: imposed.value,
            },
        );
    }

    fn on_write(&mut self, sender: ProcessId, read_id: u64, entry: NnarEntry, ctx: &mut Context<'_>) {
        if entry.is_newer_than(&self.entry) {
            self.entry = entry;
        }
        ctx.send(&self.id, &sender, Payload::NnarInternalAck { read_id });
    }

    fn on_ack(&mut self, sender: ProcessId, read_id: u64, ctx: &mut Context<'_>) {
        if read_id != self.read_id {
            tracing::trace!(id = %self.id, read_id, current = self.read_id, "stale ack");
            return;
        }
        self.acks.add_reply(sender, ());
        if !self.acks.is_complete(ctx.peers.len()) {
            return;
        }
        self.acks.reset();

        if self.reading {
            self.reading = false;
            ctx.deliver_to_parent(
                &self.id,
                Payload::NnarReadReturn {
                    value: self.read_value.clone(),
                },
            );
        } else {
            ctx.deliver_to_parent(&self.id, Payload::NnarWriteReturn);
        }
    }
}

impl Abstraction for NNAtomicRegister {
    fn id(&self) -> &AbstractionId {
        &self.id
    }

    fn handle(&mut self, message: Message, ctx: &mut Context<'_>) -> bool {
        match message.payload {
            Payload::NnarRead => {
                self.start(true, ctx);
                true
            }
            Payload::NnarWrite { value } => {
                self.write_value = value;
                self.start(false, ctx);
                true
            }
            Payload::BebDeliver { sender, message } => match message.payload {
                Payload::NnarInternalRead { read_id } => {
                    ctx.send(
                        &self.id,
                        &sender,
                        Payload::NnarInternalValue {
                            read_id,
                            timestamp: self.entry.timestamp,
                            writer_rank: self.entry.writer_rank,
                            value: self.entry.value.clone(),
                        },
                    );
                    true
                }
                Payload::NnarInternalWrite {
                    read_id,
                    timestamp,
                    writer_rank,
                    value,
                } => {
                    self.on_write(sender, read_id, NnarEntry::new(timestamp, writer_rank, value), ctx);
                    true
                }
                _ => false,
            },
            Payload::PlDeliver {
                sender: Some(sender),
                message,
            } => match message.payload {
                Payload::NnarInternalValue {
                    read_id,
                    timestamp,
                    writer_rank,
                    value,
                } => {
                    self.on_value(sender, read_id, NnarEntry::new(timestamp, writer_rank, value), ctx);
                    true
                }
                Payload::NnarInternalAck { read_id } => {
                    self.on_ack(sender, read_id, ctx);
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}
