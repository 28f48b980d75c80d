use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one process as assigned by the hub.
///
/// Rank totally orders processes; membership lookups go by host and port
/// because that is all an inbound frame tells us about its sender.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId {
    pub owner: String,
    pub index: u32,
    pub rank: u32,
    pub host: String,
    pub port: u16,
}

impl ProcessId {
    pub fn new(owner: &str, index: u32, rank: u32, host: &str, port: u16) -> Self {
        ProcessId {
            owner: owner.to_string(),
            index,
            rank,
            host: host.to_string(),
            port,
        }
    }

    pub fn has_address(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}@{}:{}#{}", self.owner, self.index, self.host, self.port, self.rank)
    }
}

/// The current group membership, set by the hub on system initialization.
#[derive(Debug, Clone, Default)]
pub struct Peers {
    pub members: Vec<ProcessId>,
}

impl Peers {
    pub fn new(members: Vec<ProcessId>) -> Self {
        Peers { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessId> {
        self.members.iter()
    }

    pub fn find_by_address(&self, host: &str, port: u16) -> Option<&ProcessId> {
        self.members.iter().find(|p| p.has_address(host, port))
    }

    /// Highest-rank member, the initial leader of every consensus instance.
    pub fn leader(&self) -> Option<&ProcessId> {
        max_rank(self.members.iter())
    }

    /// Highest-rank member not in `suspected`.
    pub fn leader_excluding(&self, suspected: &HashSet<ProcessId>) -> Option<&ProcessId> {
        max_rank(self.members.iter().filter(|p| !suspected.contains(*p)))
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}

pub fn max_rank<'a>(processes: impl Iterator<Item = &'a ProcessId>) -> Option<&'a ProcessId> {
    processes.max_by_key(|p| p.rank)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers() -> Peers {
        Peers::new(vec![
            ProcessId::new("abc", 1, 1, "127.0.0.1", 5004),
            ProcessId::new("abc", 2, 3, "127.0.0.1", 5005),
            ProcessId::new("abc", 3, 2, "127.0.0.1", 5006),
        ])
    }

    #[test]
    fn test_leader_is_highest_rank() {
        let peers = peers();
        assert_eq!(peers.leader().unwrap().index, 2);
    }

    #[test]
    fn test_leader_excluding_suspected() {
        let peers = peers();
        let mut suspected = HashSet::new();
        suspected.insert(peers.members[1].clone());
        assert_eq!(peers.leader_excluding(&suspected).unwrap().rank, 2);

        suspected.extend(peers.members.iter().cloned());
        assert!(peers.leader_excluding(&suspected).is_none());
    }

    #[test]
    fn test_find_by_address() {
        let peers = peers();
        assert_eq!(peers.find_by_address("127.0.0.1", 5006).unwrap().index, 3);
        assert!(peers.find_by_address("127.0.0.2", 5006).is_none());
    }
}
