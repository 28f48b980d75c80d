use std::collections::HashSet;
use std::time::Duration;

use crate::cli::Args;
use crate::common::{ConfigError, ProcessId};

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(100);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to start the processes of one launcher.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeConfig {
    pub hub_host: String,
    pub hub_port: u16,
    pub host: String,
    pub ports: Vec<u16>,
    pub owner: String,
    pub heartbeat: Duration,
    pub connect_timeout: Duration,
}

/// One process as the launcher knows it before the hub assigns a rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessConfig {
    pub owner: String,
    pub index: u32,
    pub host: String,
    pub port: u16,
}

impl ProcessConfig {
    pub fn process_id(&self) -> ProcessId {
        ProcessId::new(&self.owner, self.index, 0, &self.host, self.port)
    }
}

impl NodeConfig {
    pub fn hub(&self) -> ProcessId {
        ProcessId::new("hub", 0, 0, &self.hub_host, self.hub_port)
    }

    /// Processes are indexed from 1 in port order.
    pub fn processes(&self) -> Vec<ProcessConfig> {
        self.ports
            .iter()
            .enumerate()
            .map(|(i, &port)| ProcessConfig {
                owner: self.owner.clone(),
                index: i as u32 + 1,
                host: self.host.clone(),
                port,
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.trim().is_empty() {
            return Err(ConfigError::EmptyOwner);
        }
        if self.heartbeat.is_zero() {
            return Err(ConfigError::ZeroHeartbeat);
        }

        let mut taken = HashSet::new();
        if self.hub_host == self.host {
            taken.insert(self.hub_port);
        }
        for &port in &self.ports {
            if port == 0 {
                return Err(ConfigError::InvalidPort(port));
            }
            if !taken.insert(port) {
                return Err(ConfigError::DuplicatePort(port));
            }
        }
        Ok(())
    }
}

impl TryFrom<Args> for NodeConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let config = NodeConfig {
            hub_host: args.hub_host,
            hub_port: args.hub_port,
            host: args.host,
            ports: vec![args.port1, args.port2, args.port3],
            owner: args.owner,
            heartbeat: Duration::from_millis(args.heartbeat_ms),
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }
}
