pub mod codec;
pub mod node;
pub mod transport;

pub use node::*;
pub use transport::*;

use crate::common::{Message, ProcessId};

/*
    Processes talk over plain TCP. Each frame is a 4-byte big-endian length
    followed by one bincode-encoded envelope. Links are point-to-point and
    FIFO while a connection lasts; there is no retransmission, so a frame
    that cannot be delivered is logged and lost. The algorithms above treat
    that exactly like a slow or crashed peer.
*/

/// Outbound side of the network as seen by a process.
pub trait Transport: Send + Sync {
    /// Queue `envelope` for `destination`. Never blocks the caller; failures
    /// are reported through logs only.
    fn send(&self, destination: &ProcessId, envelope: Message);
}
