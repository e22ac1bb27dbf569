pub mod record;
pub mod storage;

pub use record::*;
pub use storage::*;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::Serialize;

use crate::common::{decimal, harn::Attestation};
use crate::consensus::{qc::QuorumCertificate, quorum::QuorumStatus};

/// A finalized record as the process-wide ledger keeps it.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct LedgerEntry {
    pub record: String,
    #[serde(with = "decimal")]
    pub signature: BigUint,
    pub status: QuorumStatus,
    pub sequence: u64,
    pub view: u64,
    pub timestamp: DateTime<Utc>,
    /// Whether the proposer was the primary of its view.
    pub is_primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quorum_certificate: Option<QuorumCertificate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
}

impl LedgerEntry {
    pub fn to_persisted(&self) -> PersistedRecord {
        PersistedRecord {
            record: self.record.clone(),
            signature: self.signature.clone(),
            status: self.status.to_string(),
            sequence: self.sequence,
            view: self.view,
            timestamp: self.timestamp,
            is_primary: self.is_primary,
            partial_signatures: self.attestation.as_ref().map(|a| a.partials.clone()),
        }
    }
}

/// Append-only, insertion ordered, one entry per sequence number.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    sequences: BTreeSet<u64>,
}

impl Ledger {
    pub fn new() -> Self {
        Ledger::default()
    }

    /// Returns false, leaving the ledger untouched, if the sequence is
    /// already recorded.
    pub fn append(&mut self, entry: LedgerEntry) -> bool {
        if !self.sequences.insert(entry.sequence) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.sequences.contains(&sequence)
    }

    pub fn get(&self, sequence: u64) -> Option<&LedgerEntry> {
        self.entries.iter().find(|entry| entry.sequence == sequence)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive substring match on the record text.
    pub fn query(&self, keyword: &str) -> Vec<&LedgerEntry> {
        let keyword = keyword.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| entry.record.to_lowercase().contains(&keyword))
            .collect()
    }
}
