use serde::{Deserialize, Serialize};

use crate::common::error::ConsensusError;

/*
    With N replicas the protocol tolerates f = floor((N - 1) / 3) Byzantine
    replicas. A replica is prepared after 2f matching prepares, an instance is
    committed after 2f + 1 matching commits, and a collective attestation
    needs 2f + 1 partial signatures. The verification-count submission path
    expresses the same bound as ceil(2N / 3) of all replicas.
*/

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuorumStatus {
    Pending,
    Committed,
}

impl std::fmt::Display for QuorumStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuorumStatus::Pending => write!(f, "pending"),
            QuorumStatus::Committed => write!(f, "committed"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct QuorumPolicy {
    n: usize,
    f: usize,
}

pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Commit decision for `votes` distinct matching commits among `n` replicas
/// tolerating `f` faults.
pub fn decide(votes: usize, n: usize, f: usize) -> QuorumStatus {
    QuorumPolicy { n, f }.decide(votes)
}

impl QuorumPolicy {
    pub fn for_replicas(n: usize) -> Self {
        QuorumPolicy { n, f: max_faulty(n) }
    }

    pub fn with_faults(n: usize, f: usize) -> Result<Self, ConsensusError> {
        if n == 0 {
            return Err(ConsensusError::Config("a quorum needs at least one replica".to_string()));
        }
        if f > max_faulty(n) {
            return Err(ConsensusError::Config(format!(
                "{n} replicas tolerate at most {} faulty, not {f}",
                max_faulty(n)
            )));
        }
        Ok(QuorumPolicy { n, f })
    }

    pub fn replicas(&self) -> usize {
        self.n
    }

    pub fn max_faulty(&self) -> usize {
        self.f
    }

    pub fn prepare_threshold(&self) -> usize {
        2 * self.f
    }

    pub fn commit_threshold(&self) -> usize {
        2 * self.f + 1
    }

    pub fn required_approvals(&self) -> usize {
        2 * self.f + 1
    }

    /// ceil(2N / 3)
    pub fn consensus_threshold(&self) -> usize {
        (2 * self.n).div_ceil(3)
    }

    pub fn decide(&self, commits: usize) -> QuorumStatus {
        Self::status(commits >= self.commit_threshold())
    }

    /// Decision for the path that counts explicit verifications.
    pub fn decide_approvals(&self, approvals: usize) -> QuorumStatus {
        Self::status(approvals >= self.consensus_threshold())
    }

    fn status(reached: bool) -> QuorumStatus {
        if reached {
            QuorumStatus::Committed
        } else {
            QuorumStatus::Pending
        }
    }
}
