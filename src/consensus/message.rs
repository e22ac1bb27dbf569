use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::common::{decimal, identity::ReplicaIdentity};

/*
    Every protocol message carries the tuple ⟨phase, sequence, view, record⟩
    and the sender's RSA signature over its canonical encoding

        "<phase-tag>:<sequence>:<view>:<record>"

    with tags "pre-prepare", "prepare" and "commit". Including the tag keeps a
    prepare signature from being replayed as a commit for the same instance.
*/

pub trait Signable {
    fn signing_bytes(&self) -> Vec<u8>;
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    PrePrepare,
    Prepare,
    Commit,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub phase: Phase,
    pub sequence: u64,
    pub view: u64,
    pub record: String,
    #[serde(with = "decimal")]
    pub signature: BigUint,
    pub sender: String,
}

impl Phase {
    pub fn tag(&self) -> &'static str {
        match self {
            Phase::PrePrepare => "pre-prepare",
            Phase::Prepare => "prepare",
            Phase::Commit => "commit",
        }
    }
}

impl AsRef<[u8]> for Phase {
    fn as_ref(&self) -> &[u8] {
        self.tag().as_bytes()
    }
}

pub fn canonical_bytes(phase: Phase, sequence: u64, view: u64, record: &str) -> Vec<u8> {
    format!("{}:{}:{}:{}", phase.tag(), sequence, view, record).into_bytes()
}

impl ConsensusMessage {
    pub fn signed(
        phase: Phase,
        sequence: u64,
        view: u64,
        record: impl Into<String>,
        signer: &ReplicaIdentity,
    ) -> Self {
        let record = record.into();
        let signature = signer.sign(&canonical_bytes(phase, sequence, view, &record));
        ConsensusMessage {
            phase,
            sequence,
            view,
            record,
            signature,
            sender: signer.name().to_string(),
        }
    }

    /// Same instance and payload, regardless of phase or sender.
    pub fn matches(&self, sequence: u64, view: u64, record: &str) -> bool {
        self.sequence == sequence && self.view == view && self.record == record
    }
}

impl Signable for ConsensusMessage {
    fn signing_bytes(&self) -> Vec<u8> {
        canonical_bytes(self.phase, self.sequence, self.view, &self.record)
    }
}
