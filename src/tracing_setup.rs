use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::common::{AbstractionId, Message, ProcessId};

/// Install the global fmt subscriber. An explicit `filter` wins over
/// `RUST_LOG`; with neither, `info` is used.
pub fn init(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // A second call, e.g. from a test, keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Track a process joining a system
pub fn system_initialized(process: &ProcessId, system_id: &str, members: &[ProcessId]) {
    info!(
        target: "system_initialized",
        process = %process,
        system_id = system_id,
        members = ?members.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
    );
}

/// Track a process leaving its system
pub fn system_destroyed(process: &ProcessId, system_id: Option<&str>) {
    info!(
        target: "system_destroyed",
        process = %process,
        system_id = ?system_id,
    );
}

/// Track a new abstraction in a process's registry
pub fn abstraction_registered(process: &ProcessId, id: &AbstractionId, kind: &str) {
    debug!(
        target: "abstraction_registered",
        process = %process,
        id = %id,
        kind = kind,
    );
}

/// Track a frame handed to the transport
pub fn message_sent(from: &ProcessId, to: &ProcessId, envelope: &Message) {
    debug!(
        target: "message_sent",
        from = %from,
        to = %to,
        message = %envelope,
    );
}

/// Track an event nobody could take
pub fn routing_failure(process: &ProcessId, message: &Message, reason: &str) {
    warn!(
        target: "routing_failure",
        process = %process,
        message = %message,
        reason = reason,
    );
}

/// Track a handler that panicked; the process keeps running
pub fn handler_panicked(process: &ProcessId, id: &AbstractionId, payload: &str) {
    error!(
        target: "handler_panicked",
        process = %process,
        id = %id,
        payload = payload,
    );
}
