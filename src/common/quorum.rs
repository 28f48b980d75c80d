use std::collections::HashMap;

use super::peers::ProcessId;

/*
    A quorum is a strict majority of the known processes: more than n/2
    replies, with n/2 rounded down. Any two quorums intersect, which is what
    lets a crash-tolerant round learn the latest accepted state while up to
    f < n/2 processes are down.

    Replies are keyed by sender so a process never counts twice within one
    round. The collector is reset after each completed round.
*/

#[derive(Clone, Debug)]
pub struct Quorum<T> {
    replies: HashMap<ProcessId, T>,
}

impl<T> Default for Quorum<T> {
    fn default() -> Self {
        Quorum {
            replies: HashMap::new(),
        }
    }
}

impl<T> Quorum<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reply(&mut self, sender: ProcessId, reply: T) {
        self.replies.insert(sender, reply);
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    pub fn is_complete(&self, n: usize) -> bool {
        self.replies.len() > n / 2
    }

    pub fn reset(&mut self) {
        self.replies.clear();
    }

    /// Empties the collector and returns what it held.
    pub fn take(&mut self) -> Vec<T> {
        self.replies.drain().map(|(_, reply)| reply).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(rank: u32) -> ProcessId {
        ProcessId::new("abc", rank, rank, "127.0.0.1", 5000 + rank as u16)
    }

    #[test]
    fn test_strict_majority() {
        let mut quorum = Quorum::new();
        quorum.add_reply(process(1), ());
        assert!(!quorum.is_complete(3));
        quorum.add_reply(process(2), ());
        assert!(quorum.is_complete(3));

        // two out of four is not a majority
        assert!(!quorum.is_complete(4));
    }

    #[test]
    fn test_duplicate_sender_counts_once() {
        let mut quorum = Quorum::new();
        quorum.add_reply(process(1), 1);
        quorum.add_reply(process(1), 2);
        assert_eq!(quorum.len(), 1);
        assert_eq!(quorum.take(), vec![2]);
        assert!(quorum.is_empty());
    }
}
