pub mod ec;
pub mod ep;
pub mod uc;

pub use ec::*;
pub use ep::*;
pub use uc::*;

use crate::common::Value;

/*
    Leader-driven uniform consensus, built from two pieces.

    Epoch change hands out epochs: an epoch is a (timestamp, leader) pair,
    timestamps only grow, and eventually every correct process agrees on one
    leader for good. Epoch consensus runs a single epoch: its leader reads the
    latest accepted state from a quorum, writes a value back to a quorum, and
    announces the decision. Aborting an epoch hands its state over to the
    next one, so a value that may have been decided is carried forward.

    Uniform consensus glues them together and decides at most once.
*/

/// What a process has accepted in epoch consensus: the epoch timestamp at
/// which it last accepted a write, and the value written.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EpochConsensusState {
    pub value_timestamp: u64,
    pub value: Value,
}

impl EpochConsensusState {
    pub fn new(value_timestamp: u64, value: Value) -> Self {
        EpochConsensusState {
            value_timestamp,
            value,
        }
    }

    /// The state with the greatest value timestamp. Epoch timestamps are
    /// unique per leader, so equal timestamps carry the same value.
    pub fn highest(states: impl IntoIterator<Item = EpochConsensusState>) -> Option<EpochConsensusState> {
        states.into_iter().max_by_key(|state| state.value_timestamp)
    }
}
