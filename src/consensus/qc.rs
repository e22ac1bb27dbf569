use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{
    message::{ConsensusMessage, Phase},
    peers::Peers,
    store::ReplicaLog,
};

/*
    A Quorum Certificate over ⟨phase, sequence, view, record⟩ is the set of
    votes for that exact tuple found in one replica's log. It is derived on
    demand and never stored apart from the ledger entry it justifies.
*/

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub phase: Phase,
    pub sequence: u64,
    pub view: u64,
    pub record: String,
    pub votes: Vec<ConsensusMessage>,
}

impl QuorumCertificate {
    pub fn collect(log: &ReplicaLog, phase: Phase, sequence: u64, view: u64, record: &str) -> Self {
        let votes = log
            .votes(phase, sequence)
            .filter(|vote| vote.matches(sequence, view, record))
            .cloned()
            .collect();
        QuorumCertificate {
            phase,
            sequence,
            view,
            record: record.to_string(),
            votes,
        }
    }

    pub fn signers(&self) -> BTreeSet<&str> {
        self.votes.iter().map(|vote| vote.sender.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.signers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn is_complete(&self, threshold: usize) -> bool {
        self.len() >= threshold
    }

    /// Re-checks every vote: right tuple, known member, valid signature,
    /// and at least `threshold` distinct signers.
    pub fn validate(&self, peers: &Peers, threshold: usize) -> bool {
        let mut signers = BTreeSet::new();
        for vote in &self.votes {
            if vote.phase != self.phase || !vote.matches(self.sequence, self.view, &self.record) {
                tracing::debug!(sender = %vote.sender, "QC vote does not match its tuple");
                return false;
            }
            if !peers.verify_message(vote).is_valid() {
                tracing::debug!(sender = %vote.sender, "QC vote signature verification failed");
                return false;
            }
            signers.insert(vote.sender.as_str());
        }
        signers.len() >= threshold
    }
}
