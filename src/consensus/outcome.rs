use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde::Serialize;

use super::{
    message::{ConsensusMessage, Phase},
    processor::{Delivery, Stage},
    quorum::QuorumStatus,
};
use crate::common::{
    crypto::{PublicKey, Verification},
    decimal,
    harn::{Attestation, AttestationStatus, PartialSignature},
};
use crate::ledger::ProcurementRecord;
use crate::reporting::SealedEnvelope;

/// What each recipient made of one broadcast.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct BroadcastReport {
    pub message: ConsensusMessage,
    pub receipts: Vec<Receipt>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct Receipt {
    pub recipient: String,
    pub delivery: Delivery,
}

impl BroadcastReport {
    pub fn accepted_by(&self) -> Vec<&str> {
        self.receipts
            .iter()
            .filter(|r| r.delivery == Delivery::Accepted)
            .map(|r| r.recipient.as_str())
            .collect()
    }

    pub fn dropped_by(&self) -> Vec<&str> {
        self.receipts
            .iter()
            .filter(|r| matches!(r.delivery, Delivery::Dropped(_)))
            .map(|r| r.recipient.as_str())
            .collect()
    }
}

/// Result of one stepped phase call. `broadcast` is absent when the node had
/// nothing to emit.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub node: String,
    pub sequence: u64,
    pub view: u64,
    pub broadcast: Option<BroadcastReport>,
    pub committed: Vec<String>,
    pub status: QuorumStatus,
}

impl PhaseReport {
    pub fn emitted(&self) -> bool {
        self.broadcast.is_some()
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct RecordOutcome {
    pub record: String,
    pub node: String,
    pub sequence: u64,
    pub view: u64,
    #[serde(with = "decimal")]
    pub signature: BigUint,
    pub prepares: usize,
    pub commits: usize,
    pub committed: Vec<String>,
    pub status: QuorumStatus,
    pub attestation: Option<Attestation>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct VerificationOutcome {
    pub record: String,
    pub node: String,
    pub is_primary: bool,
    #[serde(with = "decimal")]
    pub signature: BigUint,
    pub verifications: BTreeMap<String, Verification>,
    pub approvals: usize,
    pub threshold: usize,
    pub status: QuorumStatus,
    /// Assigned only once the record commits.
    pub sequence: Option<u64>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct StatusReport {
    pub node: String,
    pub sequence: u64,
    pub view: Option<u64>,
    pub record: Option<String>,
    pub stage: Stage,
    pub prepares: usize,
    pub commits: usize,
    pub prepare_threshold: usize,
    pub commit_threshold: usize,
    pub status: QuorumStatus,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct Checkpoint {
    pub replica: String,
    pub messages: Vec<ConsensusMessage>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct ViewChange {
    pub new_view: u64,
    pub primary: String,
    pub old_primary: String,
    pub checkpoints: Vec<Checkpoint>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct ItemRecord {
    #[serde(flatten)]
    pub record: ProcurementRecord,
    pub sequence: u64,
    #[serde(with = "decimal")]
    pub signature: BigUint,
    pub status: String,
    pub is_primary: bool,
    pub partial_signatures: Vec<PartialSignature>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct ItemQuery {
    pub node: String,
    pub item_id: Option<String>,
    pub count: usize,
    pub results: Vec<ItemRecord>,
}

/// Plaintext report sealed for the Procurement Officer.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct VerifiedReport {
    pub item_id: String,
    pub results: Vec<ReportEntry>,
    pub partial_signatures: Vec<PartialSignature>,
    #[serde(with = "decimal")]
    pub combined_signature: BigUint,
    pub verification_status: AttestationStatus,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct ReportEntry {
    pub holder: String,
    #[serde(flatten)]
    pub record: ProcurementRecord,
    #[serde(with = "decimal")]
    pub signature: BigUint,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct VerificationParameters {
    #[serde(with = "decimal")]
    pub combined_signature: BigUint,
    pub partial_signatures: Vec<PartialSignature>,
    pub verification_status: AttestationStatus,
    #[serde(with = "decimal")]
    pub pkg_n: BigUint,
    #[serde(with = "decimal")]
    pub pkg_e: BigUint,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct VerifiedQuery {
    pub encrypted_response: SealedEnvelope,
    pub verification_parameters: VerificationParameters,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub view: u64,
    pub sequence: u64,
    pub is_primary: bool,
    pub log_length: usize,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct SystemStatus {
    pub total_nodes: usize,
    pub max_faulty: usize,
    pub prepare_threshold: usize,
    pub commit_threshold: usize,
    pub consensus_threshold: usize,
    pub records_stored: usize,
    pub global_sequence_number: u64,
    pub harn_enabled: bool,
    pub nodes: Vec<NodeStatus>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct NodeDetail {
    pub name: String,
    pub public_key: PublicKey,
    #[serde(with = "decimal")]
    pub identity: BigUint,
    #[serde(with = "decimal")]
    pub random: BigUint,
}

/// Public key material only; private exponents and secret shares stay inside.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct NodeInfo {
    pub pkg: PublicKey,
    pub officer: PublicKey,
    pub nodes: Vec<NodeDetail>,
}
