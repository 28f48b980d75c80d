pub mod nnar;

pub use nnar::*;

use crate::common::Value;

/// A register value tagged with the write that produced it. Writes are
/// ordered by timestamp, then by the writer's rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NnarEntry {
    pub timestamp: u64,
    pub writer_rank: u32,
    pub value: Value,
}

impl NnarEntry {
    pub fn new(timestamp: u64, writer_rank: u32, value: Value) -> Self {
        NnarEntry {
            timestamp,
            writer_rank,
            value,
        }
    }

    fn order_key(&self) -> (u64, u32) {
        (self.timestamp, self.writer_rank)
    }

    pub fn is_newer_than(&self, other: &NnarEntry) -> bool {
        self.order_key() > other.order_key()
    }

    pub fn highest(entries: impl IntoIterator<Item = NnarEntry>) -> Option<NnarEntry> {
        entries.into_iter().max_by_key(NnarEntry::order_key)
    }
}
