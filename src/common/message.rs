use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::id::AbstractionId;
use super::peers::ProcessId;
use super::value::Value;

/*
    Every event in a process, local or remote, is a Message: an envelope that
    names the session (system id), the abstraction that produced it, the
    abstraction it is addressed to, and a unique id. Routing only ever looks
    at `to_abstraction_id` and the payload variant.

    Messages that travel between processes are wrapped by a perfect link into
    a `NetworkMessage` payload carrying the sender's listening address; the
    inner message is what the peer's abstraction sees.
*/

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub system_id: String,
    pub from_abstraction_id: AbstractionId,
    pub to_abstraction_id: AbstractionId,
    pub message_uuid: Uuid,
    pub payload: Payload,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    // Transport and hub
    NetworkMessage {
        sender_host: String,
        sender_listening_port: u16,
        message: Box<Message>,
    },
    ProcRegistration {
        owner: String,
        index: u32,
    },
    ProcInitializeSystem {
        processes: Vec<ProcessId>,
    },
    ProcDestroySystem,

    // Application
    AppBroadcast {
        value: Value,
    },
    AppValue {
        value: Value,
    },
    AppPropose {
        topic: String,
        value: Value,
    },
    AppDecide {
        value: Value,
    },
    AppRead {
        register: String,
    },
    AppWrite {
        register: String,
        value: Value,
    },
    AppReadReturn {
        register: String,
        value: Value,
    },
    AppWriteReturn {
        register: String,
    },

    // Perfect link
    PlSend {
        destination: ProcessId,
        message: Box<Message>,
    },
    PlDeliver {
        sender: Option<ProcessId>,
        message: Box<Message>,
    },

    // Best-effort broadcast
    BebBroadcast {
        message: Box<Message>,
    },
    BebDeliver {
        sender: ProcessId,
        message: Box<Message>,
    },

    // Eventually perfect failure detector
    EpfdTimeout,
    EpfdInternalHeartbeatRequest,
    EpfdInternalHeartbeatReply,
    EpfdSuspect {
        process: ProcessId,
    },
    EpfdRestore {
        process: ProcessId,
    },

    // Eventual leader detector
    EldTrust {
        process: ProcessId,
    },

    // Epoch change
    EcInternalNewEpoch {
        timestamp: u64,
    },
    EcInternalNack,
    EcStartEpoch {
        new_timestamp: u64,
        new_leader: ProcessId,
    },

    // Epoch consensus
    EpPropose {
        value: Value,
    },
    EpAbort,
    EpAborted {
        ets: u64,
        value_timestamp: u64,
        value: Value,
    },
    EpDecide {
        ets: u64,
        value: Value,
    },
    EpInternalRead,
    EpInternalState {
        value_timestamp: u64,
        value: Value,
    },
    EpInternalWrite {
        value: Value,
    },
    EpInternalAccept,
    EpInternalDecided {
        value: Value,
    },

    // Uniform consensus
    UcPropose {
        value: Value,
    },
    UcDecide {
        value: Value,
    },

    // (N,N) atomic register
    NnarRead,
    NnarWrite {
        value: Value,
    },
    NnarReadReturn {
        value: Value,
    },
    NnarWriteReturn,
    NnarInternalRead {
        read_id: u64,
    },
    NnarInternalValue {
        read_id: u64,
        timestamp: u64,
        writer_rank: u32,
        value: Value,
    },
    NnarInternalWrite {
        read_id: u64,
        timestamp: u64,
        writer_rank: u32,
        value: Value,
    },
    NnarInternalAck {
        read_id: u64,
    },
}

impl Message {
    pub fn new(
        system_id: &str,
        from: AbstractionId,
        to: AbstractionId,
        payload: Payload,
    ) -> Self {
        Message {
            system_id: system_id.to_string(),
            from_abstraction_id: from,
            to_abstraction_id: to,
            message_uuid: Uuid::new_v4(),
            payload,
        }
    }
}

impl Payload {
    pub fn name(&self) -> &'static str {
        match self {
            Payload::NetworkMessage { .. } => "NetworkMessage",
            Payload::ProcRegistration { .. } => "ProcRegistration",
            Payload::ProcInitializeSystem { .. } => "ProcInitializeSystem",
            Payload::ProcDestroySystem => "ProcDestroySystem",
            Payload::AppBroadcast { .. } => "AppBroadcast",
            Payload::AppValue { .. } => "AppValue",
            Payload::AppPropose { .. } => "AppPropose",
            Payload::AppDecide { .. } => "AppDecide",
            Payload::AppRead { .. } => "AppRead",
            Payload::AppWrite { .. } => "AppWrite",
            Payload::AppReadReturn { .. } => "AppReadReturn",
            Payload::AppWriteReturn { .. } => "AppWriteReturn",
            Payload::PlSend { .. } => "PlSend",
            Payload::PlDeliver { .. } => "PlDeliver",
            Payload::BebBroadcast { .. } => "BebBroadcast",
            Payload::BebDeliver { .. } => "BebDeliver",
            Payload::EpfdTimeout => "EpfdTimeout",
            Payload::EpfdInternalHeartbeatRequest => "EpfdInternalHeartbeatRequest",
            Payload::EpfdInternalHeartbeatReply => "EpfdInternalHeartbeatReply",
            Payload::EpfdSuspect { .. } => "EpfdSuspect",
            Payload::EpfdRestore { .. } => "EpfdRestore",
            Payload::EldTrust { .. } => "EldTrust",
            Payload::EcInternalNewEpoch { .. } => "EcInternalNewEpoch",
            Payload::EcInternalNack => "EcInternalNack",
            Payload::EcStartEpoch { .. } => "EcStartEpoch",
            Payload::EpPropose { .. } => "EpPropose",
            Payload::EpAbort => "EpAbort",
            Payload::EpAborted { .. } => "EpAborted",
            Payload::EpDecide { .. } => "EpDecide",
            Payload::EpInternalRead => "EpInternalRead",
            Payload::EpInternalState { .. } => "EpInternalState",
            Payload::EpInternalWrite { .. } => "EpInternalWrite",
            Payload::EpInternalAccept => "EpInternalAccept",
            Payload::EpInternalDecided { .. } => "EpInternalDecided",
            Payload::UcPropose { .. } => "UcPropose",
            Payload::UcDecide { .. } => "UcDecide",
            Payload::NnarRead => "NnarRead",
            Payload::NnarWrite { .. } => "NnarWrite",
            Payload::NnarReadReturn { .. } => "NnarReadReturn",
            Payload::NnarWriteReturn => "NnarWriteReturn",
            Payload::NnarInternalRead { .. } => "NnarInternalRead",
            Payload::NnarInternalValue { .. } => "NnarInternalValue",
            Payload::NnarInternalWrite { .. } => "NnarInternalWrite",
            Payload::NnarInternalAck { .. } => "NnarInternalAck",
        }
    }

    /// Hub lifecycle events end a queue drain on system destroy.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Payload::ProcInitializeSystem { .. } | Payload::ProcDestroySystem
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} -> {}]",
            self.payload.name(),
            self.from_abstraction_id,
            self.to_abstraction_id
        )?;
        match &self.payload {
            Payload::NetworkMessage { message, .. }
            | Payload::PlSend { message, .. }
            | Payload::PlDeliver { message, .. }
            | Payload::BebBroadcast { message, .. }
            | Payload::BebDeliver { message, .. } => write!(f, "({})", message.payload.name()),
            _ => Ok(()),
        }
    }
}
