/*
    A process hosting a stack of crash-tolerant distributed abstractions,
    driven by an external hub.

    From the bottom up: perfect links over TCP, best-effort broadcast, an
    eventually perfect failure detector and the leader detector built on it,
    epoch change and epoch consensus, and uniform consensus on top. Next to
    consensus sits an (N,N) atomic register. The application abstraction
    translates hub requests into events for that stack and reports results
    back.

    Processes are assumed to fail by crashing only, and a strict majority of
    them must stay up for consensus and the register to make progress.
*/

pub mod cli;
pub mod common;
pub mod config;
pub mod consensus;
pub mod detector;
pub mod link;
pub mod network;
pub mod register;
pub mod system;
pub mod test_harness;
pub mod tracing_setup;

pub use common::*;
