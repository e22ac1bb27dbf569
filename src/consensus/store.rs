use std::collections::BTreeMap;

use super::message::{ConsensusMessage, Phase};

/// Per-replica message log. The ordered log only grows; the vote maps keep
/// the first prepare and the first commit each sender cast per sequence.
#[derive(Debug, Default)]
pub struct ReplicaLog {
    messages: Vec<ConsensusMessage>,
    prepares: BTreeMap<u64, BTreeMap<String, ConsensusMessage>>,
    commits: BTreeMap<u64, BTreeMap<String, ConsensusMessage>>,
}

impl ReplicaLog {
    pub fn new() -> Self {
        ReplicaLog::default()
    }

    pub fn append(&mut self, message: ConsensusMessage) {
        self.messages.push(message);
    }

    /// Logs a prepare or commit and counts it, unless the sender already has
    /// a vote of that phase for the sequence. Returns whether it was counted.
    pub fn record_vote(&mut self, message: ConsensusMessage) -> bool {
        let votes = match message.phase {
            Phase::Prepare => &mut self.prepares,
            Phase::Commit => &mut self.commits,
            Phase::PrePrepare => {
                self.append(message);
                return false;
            }
        };

        let by_sender = votes.entry(message.sequence).or_default();
        if by_sender.contains_key(&message.sender) {
            return false;
        }
        by_sender.insert(message.sender.clone(), message.clone());
        self.messages.push(message);
        true
    }

    pub fn pre_prepare(&self, sequence: u64, view: u64) -> Option<&ConsensusMessage> {
        self.messages.iter().find(|m| {
            m.phase == Phase::PrePrepare && m.sequence == sequence && m.view == view
        })
    }

    pub fn votes(&self, phase: Phase, sequence: u64) -> impl Iterator<Item = &ConsensusMessage> {
        let votes = match phase {
            Phase::Prepare => self.prepares.get(&sequence),
            Phase::Commit => self.commits.get(&sequence),
            Phase::PrePrepare => None,
        };
        votes.into_iter().flat_map(|by_sender| by_sender.values())
    }

    pub fn has_voted(&self, phase: Phase, sequence: u64, sender: &str) -> bool {
        self.votes(phase, sequence).any(|m| m.sender == sender)
    }

    pub fn messages(&self) -> &[ConsensusMessage] {
        &self.messages
    }

    /// The most recent `depth` entries, oldest first.
    pub fn tail(&self, depth: usize) -> &[ConsensusMessage] {
        let start = self.messages.len().saturating_sub(depth);
        &self.messages[start..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
