use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::Utc;
use num_bigint::BigUint;
use tracing::{debug, info, warn};

use super::{
    message::{ConsensusMessage, Phase},
    outcome::*,
    peers::{Peer, Peers},
    processor::{Replica, Stage},
    qc::QuorumCertificate,
    quorum::{QuorumPolicy, QuorumStatus},
};
use crate::common::{
    config::ClusterConfig,
    decimal,
    crypto::RsaKeyPair,
    error::ConsensusError,
    harn::{Attestation, PkgAuthority, SharedPkg},
    identity::ReplicaIdentity,
};
use crate::ledger::{Ledger, LedgerEntry, ProcurementRecord, RecordStore};
use crate::network::{InProcessNetwork, Network};
use crate::reporting::{self, DecryptedPayload, OfficerChannel};

/*
    The cluster owns every replica, the transport, the ledger and the record
    store. Each public operation is one logical step: it validates its input,
    lets the acting replica emit at most one message, fans that message out
    through the network and hands every envelope to its recipient before
    returning. Finalization is checked after every commit broadcast.
*/

pub struct ConsensusCluster {
    peers: Peers,
    replicas: Vec<Replica>,
    policy: QuorumPolicy,
    sequence: AtomicU64,
    ledger: Ledger,
    network: Box<dyn Network>,
    store: Box<dyn RecordStore>,
    pkg: SharedPkg,
    officer: OfficerChannel,
    harn_enabled: bool,
    checkpoint_depth: usize,
}

impl ConsensusCluster {
    pub fn from_config(
        config: &ClusterConfig,
        store: impl RecordStore + 'static,
    ) -> Result<Self, ConsensusError> {
        config.validate()?;
        let policy = config.quorum_policy()?;

        let replicas = config
            .replicas
            .iter()
            .map(|replica| ReplicaIdentity::from_config(replica).map(Replica::new))
            .collect::<Result<Vec<_>, _>>()?;
        let peers = Peers::new(
            replicas
                .iter()
                .map(|replica| Peer {
                    name: replica.name().to_string(),
                    public_key: replica.identity().public_key().clone(),
                    identity: replica.identity().identity().clone(),
                })
                .collect(),
        );

        let pkg = RsaKeyPair::from_primes(&config.pkg.p, &config.pkg.q, &config.pkg.e)
            .map_err(|e| ConsensusError::InvalidKey(format!("pkg: {e}")))?;
        let officer = RsaKeyPair::from_primes(&config.officer.p, &config.officer.q, &config.officer.e)
            .map_err(|e| ConsensusError::InvalidKey(format!("officer: {e}")))?;

        info!(
            replicas = peers.len(),
            max_faulty = policy.max_faulty(),
            harn = config.harn_enabled,
            "Cluster ready"
        );

        Ok(ConsensusCluster {
            peers,
            replicas,
            policy,
            sequence: AtomicU64::new(0),
            ledger: Ledger::new(),
            network: Box::new(InProcessNetwork),
            store: Box::new(store),
            pkg: Arc::new(PkgAuthority::new(pkg)),
            officer: OfficerChannel::new(officer),
            harn_enabled: config.harn_enabled,
            checkpoint_depth: config.checkpoint_depth,
        })
    }

    pub fn with_network(mut self, network: impl Network + 'static) -> Self {
        self.network = Box::new(network);
        self
    }

    pub fn peers(&self) -> &Peers {
        &self.peers
    }

    pub fn policy(&self) -> &QuorumPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn pkg(&self) -> &SharedPkg {
        &self.pkg
    }

    pub fn officer(&self) -> &OfficerChannel {
        &self.officer
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn replica(&self, name: &str) -> Option<&Replica> {
        self.peers.position(name).map(|i| &self.replicas[i])
    }

    pub fn global_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn index_of(&self, node: &str) -> Result<usize, ConsensusError> {
        self.peers
            .position(node)
            .ok_or_else(|| ConsensusError::unknown_node(node))
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn member_names(&self) -> Vec<String> {
        self.peers.names().map(str::to_string).collect()
    }

    /// Fans `message` out through the network and delivers every envelope.
    pub fn broadcast(&mut self, message: ConsensusMessage) -> BroadcastReport {
        let envelopes = self.network.broadcast(&message, &self.peers);
        let mut receipts = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let Some(index) = self.peers.position(&envelope.recipient) else {
                warn!(recipient = %envelope.recipient, "Envelope for unknown replica");
                continue;
            };
            let delivery = self.replicas[index].handle(&envelope.message, &self.peers);
            receipts.push(Receipt {
                recipient: envelope.recipient,
                delivery,
            });
        }
        BroadcastReport { message, receipts }
    }

    /// Primary of `node`'s current view proposes `record` under the next
    /// global sequence number.
    pub fn submit_pre_prepare(&mut self, node: &str, record: &str) -> Result<PhaseReport, ConsensusError> {
        let index = self.index_of(node)?;
        if record.trim().is_empty() {
            return Err(ConsensusError::InvalidInput("record must not be empty".to_string()));
        }
        let view = self.replicas[index].view();
        let primary = self.peers.get_leader(view);
        if primary != node {
            return Err(ConsensusError::NotPrimary {
                node: node.to_string(),
                primary: primary.to_string(),
            });
        }

        let sequence = self.next_sequence();
        let message = self.replicas[index].propose(sequence, record);
        let broadcast = self.broadcast(message);
        Ok(self.phase_report(Phase::PrePrepare, index, sequence, view, Some(broadcast), Vec::new()))
    }

    pub fn submit_prepare(&mut self, node: &str, sequence: u64, view: u64) -> Result<PhaseReport, ConsensusError> {
        let index = self.index_of(node)?;
        let broadcast = match self.replicas[index].prepare(sequence, view) {
            Some(message) => Some(self.broadcast(message)),
            None => {
                debug!(node, sequence, view, "Nothing to prepare");
                None
            }
        };
        Ok(self.phase_report(Phase::Prepare, index, sequence, view, broadcast, Vec::new()))
    }

    pub fn submit_commit(&mut self, node: &str, sequence: u64, view: u64) -> Result<PhaseReport, ConsensusError> {
        let index = self.index_of(node)?;
        let broadcast = self.replicas[index]
            .commit(sequence, view, &self.policy)
            .map(|message| self.broadcast(message));
        let committed = self.finalize(sequence)?;
        Ok(self.phase_report(Phase::Commit, index, sequence, view, broadcast, committed))
    }

    fn phase_report(
        &self,
        phase: Phase,
        index: usize,
        sequence: u64,
        view: u64,
        broadcast: Option<BroadcastReport>,
        committed: Vec<String>,
    ) -> PhaseReport {
        let replica = &self.replicas[index];
        PhaseReport {
            phase,
            node: replica.name().to_string(),
            sequence,
            view,
            broadcast,
            committed,
            status: stage_status(replica.stage(sequence)),
        }
    }

    /// Moves every replica holding enough commits for `sequence` to
    /// `Committed` once its store holds the record. The first one also writes
    /// the ledger entry. A replica whose save fails stays uncommitted and is
    /// retried on the next commit for `sequence`; the others still commit and
    /// the first save error is returned. Returns the replicas that committed
    /// during this call.
    fn finalize(&mut self, sequence: u64) -> Result<Vec<String>, ConsensusError> {
        let mut committed = Vec::new();
        let mut failure = None;
        for index in 0..self.replicas.len() {
            let Some(certificate) = self.replicas[index].ready_to_commit(sequence, &self.policy) else {
                continue;
            };
            let entry = match self.ledger.get(sequence) {
                Some(entry) => entry.clone(),
                None => self.ledger_entry(index, sequence, certificate),
            };

            // A replica counts as committed only once its copy is stored.
            let replica = self.replicas[index].name().to_string();
            if let Err(e) = self.store.append(&replica, entry.to_persisted()) {
                warn!(replica = %replica, sequence, error = %e, "Could not store committed record");
                failure.get_or_insert(e);
                continue;
            }
            self.replicas[index].mark_committed(sequence);
            if !self.ledger.contains(sequence) {
                info!(
                    sequence,
                    view = entry.view,
                    record = %entry.record,
                    "Record committed to the ledger"
                );
                self.ledger.append(entry);
            }
            committed.push(replica);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(committed),
        }
    }

    fn ledger_entry(&self, index: usize, sequence: u64, certificate: QuorumCertificate) -> LedgerEntry {
        let replica = &self.replicas[index];
        let (record, primary, signature, view) = match replica.instance(sequence) {
            Some(instance) => (
                instance.record.clone(),
                instance.primary.clone(),
                instance.primary_signature.clone(),
                instance.view,
            ),
            None => (certificate.record.clone(), String::new(), Default::default(), certificate.view),
        };
        let attestation = self
            .harn_enabled
            .then(|| self.attest(certificate.signers().into_iter(), &record));

        LedgerEntry {
            record,
            signature,
            status: QuorumStatus::Committed,
            sequence,
            view,
            timestamp: Utc::now(),
            is_primary: primary == self.peers.get_leader(view),
            quorum_certificate: Some(certificate),
            attestation,
        }
    }

    /// Harn attestation over `record` by the named replicas.
    fn attest<'a>(&self, signers: impl Iterator<Item = &'a str>, record: &str) -> Attestation {
        let partials = signers
            .filter_map(|name| self.replica(name))
            .map(|replica| replica.identity().harn_partial(&self.pkg, record.as_bytes()))
            .collect();
        self.pkg.combine(partials, self.policy.required_approvals())
    }

    /// Runs all three phases for `record`: the primary proposes, every backup
    /// prepares and every replica commits.
    pub fn submit_record(&mut self, node: &str, record: &str) -> Result<RecordOutcome, ConsensusError> {
        let pre_prepare = self.submit_pre_prepare(node, record)?;
        let (sequence, view) = (pre_prepare.sequence, pre_prepare.view);
        let signature = pre_prepare
            .broadcast
            .as_ref()
            .map(|b| b.message.signature.clone())
            .unwrap_or_default();

        let names = self.member_names();
        for name in names.iter().filter(|name| name.as_str() != node) {
            self.submit_prepare(name, sequence, view)?;
        }
        let mut committed = Vec::new();
        for name in &names {
            committed.extend(self.submit_commit(name, sequence, view)?.committed);
        }

        let index = self.index_of(node)?;
        let proposer = &self.replicas[index];
        let prepares = proposer.prepare_certificate(sequence).map_or(0, |qc| qc.len());
        let commits = proposer.commit_certificate(sequence).map_or(0, |qc| qc.len());
        let entry = self.ledger.get(sequence);

        Ok(RecordOutcome {
            record: record.to_string(),
            node: node.to_string(),
            sequence,
            view,
            signature,
            prepares,
            commits,
            committed,
            status: if entry.is_some() {
                QuorumStatus::Committed
            } else {
                QuorumStatus::Pending
            },
            attestation: entry.and_then(|e| e.attestation.clone()),
        })
    }

    /// Single-round variant: `node` signs the raw record, every other replica
    /// verifies it, and the record commits once verifications plus the
    /// proposer's own approval reach ceil(2N / 3).
    pub fn submit_with_verifications(
        &mut self,
        node: &str,
        record: &str,
    ) -> Result<VerificationOutcome, ConsensusError> {
        let index = self.index_of(node)?;
        if record.trim().is_empty() {
            return Err(ConsensusError::InvalidInput("record must not be empty".to_string()));
        }
        let proposer = &self.replicas[index];
        let view = proposer.view();
        let is_primary = self.peers.get_leader(view) == node;
        let signature = proposer.identity().sign(record.as_bytes());

        let verifications: BTreeMap<String, _> = self
            .peers
            .names()
            .filter(|name| *name != node)
            .map(|name| (name.to_string(), self.peers.verify(record.as_bytes(), &signature, node)))
            .collect();
        let verified: Vec<&str> = verifications
            .iter()
            .filter(|(_, v)| v.is_valid())
            .map(|(name, _)| name.as_str())
            .collect();
        let approvals = verified.len() + 1;
        let status = self.policy.decide_approvals(approvals);

        let mut sequence = None;
        if status == QuorumStatus::Committed {
            let seq = self.next_sequence();
            for replica in &mut self.replicas {
                replica.observe_sequence(seq);
            }
            let holders: Vec<&str> = std::iter::once(node).chain(verified.iter().copied()).collect();
            let attestation = self
                .harn_enabled
                .then(|| self.attest(holders.iter().copied(), record));
            let entry = LedgerEntry {
                record: record.to_string(),
                signature: signature.clone(),
                status,
                sequence: seq,
                view,
                timestamp: Utc::now(),
                is_primary,
                quorum_certificate: None,
                attestation,
            };
            for holder in &holders {
                self.store.append(holder, entry.to_persisted())?;
            }
            info!(node, sequence = seq, approvals, "Record committed by verification count");
            self.ledger.append(entry);
            sequence = Some(seq);
        } else {
            warn!(node, approvals, threshold = self.policy.consensus_threshold(), "Record left pending");
        }

        Ok(VerificationOutcome {
            record: record.to_string(),
            node: node.to_string(),
            is_primary,
            signature,
            verifications,
            approvals,
            threshold: self.policy.consensus_threshold(),
            status,
            sequence,
        })
    }

    pub fn query_status(&self, node: &str, sequence: u64) -> Result<StatusReport, ConsensusError> {
        let replica = &self.replicas[self.index_of(node)?];
        let instance = replica.instance(sequence);
        let prepares = replica.prepare_certificate(sequence).map_or(0, |qc| qc.len());
        let commits = replica.commit_certificate(sequence).map_or(0, |qc| qc.len());
        let stage = replica.stage(sequence);

        Ok(StatusReport {
            node: node.to_string(),
            sequence,
            view: instance.map(|i| i.view),
            record: instance.map(|i| i.record.clone()),
            stage,
            prepares,
            commits,
            prepare_threshold: self.policy.prepare_threshold(),
            commit_threshold: self.policy.commit_threshold(),
            status: stage_status(stage),
        })
    }

    /// Moves every replica to `new_view`. Only the primary of `new_view` may
    /// ask, and only for a view ahead of its own.
    pub fn initiate_view_change(&mut self, node: &str, new_view: u64) -> Result<ViewChange, ConsensusError> {
        let index = self.index_of(node)?;
        let current = self.replicas[index].view();
        if new_view <= current {
            return Err(ConsensusError::InvalidInput(format!(
                "view {new_view} is not ahead of current view {current}"
            )));
        }
        let expected = self.peers.get_leader(new_view).to_string();
        if expected != node {
            return Err(ConsensusError::NotNextPrimary {
                node: node.to_string(),
                expected,
            });
        }

        let old_primary = self.peers.get_leader(current).to_string();
        let checkpoints = self
            .replicas
            .iter()
            .map(|replica| Checkpoint {
                replica: replica.name().to_string(),
                messages: replica.log().tail(self.checkpoint_depth).to_vec(),
            })
            .collect();

        let floor = self.global_sequence();
        for replica in &mut self.replicas {
            replica.enter_view(new_view, floor);
        }
        info!(new_view, primary = %expected, %old_primary, "View changed");

        Ok(ViewChange {
            new_view,
            primary: expected,
            old_primary,
            checkpoints,
        })
    }

    /// Committed records in `node`'s store, optionally only those for one
    /// item. Identical rows are reported once.
    pub fn query_item(&self, node: &str, item_id: Option<&str>) -> Result<ItemQuery, ConsensusError> {
        self.index_of(node)?;
        let stored = self.store.load(node)?;

        let mut results: Vec<ItemRecord> = Vec::new();
        for persisted in stored.records {
            let record = ProcurementRecord::parse(&persisted.record);
            if item_id.is_some_and(|item| !record.is_item(item)) {
                continue;
            }
            let row = ItemRecord {
                record,
                sequence: persisted.sequence,
                signature: persisted.signature,
                status: persisted.status,
                is_primary: persisted.is_primary,
                partial_signatures: persisted.partial_signatures.unwrap_or_default(),
            };
            if !results.contains(&row) {
                results.push(row);
            }
        }

        Ok(ItemQuery {
            node: node.to_string(),
            item_id: item_id.map(str::to_string),
            count: results.len(),
            results,
        })
    }

    /// Gathers every stored record for `item_id` across all replicas, has
    /// each holder sign it with its Harn share, and seals the report for the
    /// Procurement Officer.
    pub fn verify_query(&self, item_id: &str) -> Result<VerifiedQuery, ConsensusError> {
        if item_id.trim().is_empty() {
            return Err(ConsensusError::InvalidInput("item id must not be empty".to_string()));
        }

        let mut results = Vec::new();
        let mut partials = Vec::new();
        for replica in &self.replicas {
            for persisted in self.store.load(replica.name())?.records {
                let record = ProcurementRecord::parse(&persisted.record);
                if !record.is_item(item_id) {
                    continue;
                }
                partials.push(replica.identity().harn_partial(&self.pkg, persisted.record.as_bytes()));
                results.push(ReportEntry {
                    holder: replica.name().to_string(),
                    record,
                    signature: persisted.signature,
                });
            }
        }
        if results.is_empty() {
            return Err(ConsensusError::ItemNotFound(item_id.to_string()));
        }

        let attestation = self.pkg.combine(partials, self.policy.required_approvals());
        let report = VerifiedReport {
            item_id: item_id.to_string(),
            results,
            partial_signatures: attestation.partials.clone(),
            combined_signature: attestation.combined.clone(),
            verification_status: attestation.status,
        };
        let envelope = self.officer.seal_json(&report)?;
        debug!(item_id, reduced = envelope.reduced, "Sealed report for the officer");

        Ok(VerifiedQuery {
            encrypted_response: envelope,
            verification_parameters: VerificationParameters {
                combined_signature: attestation.combined,
                partial_signatures: attestation.partials,
                verification_status: attestation.status,
                pkg_n: self.pkg.public_key().n.clone(),
                pkg_e: self.pkg.public_key().e.clone(),
            },
        })
    }

    pub fn decrypt_envelope(&self, ciphertext: &str) -> Result<DecryptedPayload, ConsensusError> {
        self.officer.open_decimal(ciphertext)
    }

    /// Encrypts `message` to `node` under the PKG modulus with its Harn
    /// identity as the exponent.
    pub fn identity_encrypt(&self, node: &str, message: &str) -> Result<BigUint, ConsensusError> {
        let replica = &self.replicas[self.index_of(node)?];
        Ok(self.pkg.encrypt(message, replica.identity().identity()))
    }

    /// Raises `ciphertext` to `node`'s secret share and runs the result
    /// through the officer's decode chain. The plaintext only comes back when
    /// identity times share is 1 modulo the group order; otherwise the chain
    /// reports whatever bytes came out.
    pub fn identity_decrypt(&self, node: &str, ciphertext: &str) -> Result<DecryptedPayload, ConsensusError> {
        let replica = &self.replicas[self.index_of(node)?];
        let c = decimal::parse(ciphertext.trim()).map_err(ConsensusError::InvalidInput)?;
        Ok(reporting::decode(self.pkg.decrypt(&c, replica.identity().identity())))
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            total_nodes: self.peers.len(),
            max_faulty: self.policy.max_faulty(),
            prepare_threshold: self.policy.prepare_threshold(),
            commit_threshold: self.policy.commit_threshold(),
            consensus_threshold: self.policy.consensus_threshold(),
            records_stored: self.ledger.len(),
            global_sequence_number: self.global_sequence(),
            harn_enabled: self.harn_enabled,
            nodes: self
                .replicas
                .iter()
                .map(|replica| NodeStatus {
                    name: replica.name().to_string(),
                    view: replica.view(),
                    sequence: replica.sequence(),
                    is_primary: replica.is_primary(&self.peers),
                    log_length: replica.log().len(),
                })
                .collect(),
        }
    }

    pub fn node_info(&self) -> NodeInfo {
        NodeInfo {
            pkg: self.pkg.public_key().clone(),
            officer: self.officer.public_key().clone(),
            nodes: self
                .replicas
                .iter()
                .map(|replica| NodeDetail {
                    name: replica.name().to_string(),
                    public_key: replica.identity().public_key().clone(),
                    identity: replica.identity().identity().clone(),
                    random: replica.identity().random().clone(),
                })
                .collect(),
        }
    }
}

fn stage_status(stage: Stage) -> QuorumStatus {
    if stage == Stage::Committed {
        QuorumStatus::Committed
    } else {
        QuorumStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::harn::AttestationStatus;
    use crate::ledger::{MemoryStore, RecordSet};
    use crate::network::PartitionedNetwork;
    use std::sync::atomic::AtomicBool;

    fn cluster() -> ConsensusCluster {
        ConsensusCluster::from_config(&ClusterConfig::default(), MemoryStore::new()).unwrap()
    }

    /// Refuses to save for one replica while `failing` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    impl RecordStore for FlakyStore {
        fn read(&self, replica: &str) -> Result<RecordSet, ConsensusError> {
            self.inner.read(replica)
        }

        fn save(&self, replica: &str, records: &RecordSet) -> Result<(), ConsensusError> {
            if replica == "B" && self.failing.load(Ordering::SeqCst) {
                return Err(ConsensusError::Storage("disk full".to_string()));
            }
            self.inner.save(replica, records)
        }
    }

    #[test]
    fn test_submit_record_commits_everywhere() {
        let mut cluster = cluster();
        let outcome = cluster.submit_record("A", "A:widget:10:5").unwrap();

        assert_eq!(outcome.sequence, 1);
        assert_eq!(outcome.view, 0);
        assert_eq!(outcome.status, QuorumStatus::Committed);
        assert_eq!(outcome.prepares, 3);
        assert!(outcome.commits >= 3);
        assert_eq!(outcome.committed, vec!["A", "B", "C", "D"]);
        assert_eq!(outcome.attestation.unwrap().status, AttestationStatus::Verified);

        assert_eq!(cluster.ledger().len(), 1);
        for name in ["A", "B", "C", "D"] {
            let stored = cluster.store().load(name).unwrap();
            assert_eq!(stored.records.len(), 1, "{name}");
            assert_eq!(stored.records[0].record, "A:widget:10:5");
            assert!(stored.records[0].is_primary);
        }
    }

    #[test]
    fn test_backup_cannot_propose() {
        let mut cluster = cluster();
        let err = cluster.submit_pre_prepare("B", "B:bolt:1:1").unwrap_err();
        assert_eq!(
            err,
            ConsensusError::NotPrimary {
                node: "B".to_string(),
                primary: "A".to_string()
            }
        );
        assert_eq!(cluster.global_sequence(), 0);
        assert!(cluster.replicas().iter().all(|r| r.log().is_empty()));
    }

    #[test]
    fn test_invalid_input() {
        let mut cluster = cluster();
        assert!(matches!(
            cluster.submit_pre_prepare("Z", "Z:x:1:1"),
            Err(ConsensusError::InvalidInput(_))
        ));
        assert!(matches!(
            cluster.submit_pre_prepare("A", "  "),
            Err(ConsensusError::InvalidInput(_))
        ));
        assert!(matches!(cluster.query_status("Q", 1), Err(ConsensusError::InvalidInput(_))));
        assert!(matches!(cluster.verify_query(""), Err(ConsensusError::InvalidInput(_))));
    }

    #[test]
    fn test_stepped_phases() {
        let mut cluster = cluster();
        let pre_prepare = cluster.submit_pre_prepare("A", "A:widget:10:5").unwrap();
        assert_eq!(pre_prepare.broadcast.as_ref().unwrap().accepted_by(), vec!["B", "C", "D"]);
        assert_eq!(pre_prepare.status, QuorumStatus::Pending);

        // one prepare is not enough for B to commit
        cluster.submit_prepare("B", 1, 0).unwrap();
        let early = cluster.submit_commit("B", 1, 0).unwrap();
        assert!(!early.emitted());
        assert_eq!(early.status, QuorumStatus::Pending);

        cluster.submit_prepare("C", 1, 0).unwrap();
        for node in ["A", "B"] {
            assert!(cluster.submit_commit(node, 1, 0).unwrap().emitted());
        }
        let status = cluster.query_status("B", 1).unwrap();
        assert_eq!(status.stage, Stage::AwaitingCommits);
        assert_eq!(status.commits, 2);
        assert_eq!(status.status, QuorumStatus::Pending);

        let last = cluster.submit_commit("C", 1, 0).unwrap();
        assert_eq!(last.status, QuorumStatus::Committed);
        assert_eq!(last.committed.len(), 4);
        assert_eq!(cluster.query_status("D", 1).unwrap().status, QuorumStatus::Committed);
    }

    #[test]
    fn test_failed_save_leaves_replica_uncommitted() {
        let store = Arc::new(FlakyStore::default());
        store.failing.store(true, Ordering::SeqCst);
        let mut cluster = ConsensusCluster::from_config(&ClusterConfig::default(), store.clone()).unwrap();

        cluster.submit_pre_prepare("A", "A:widget:10:5").unwrap();
        for node in ["B", "C"] {
            cluster.submit_prepare(node, 1, 0).unwrap();
        }
        for node in ["A", "B"] {
            cluster.submit_commit(node, 1, 0).unwrap();
        }
        assert!(matches!(
            cluster.submit_commit("C", 1, 0),
            Err(ConsensusError::Storage(_))
        ));

        // the replicas after B still committed
        for node in ["A", "C", "D"] {
            assert_eq!(cluster.query_status(node, 1).unwrap().stage, Stage::Committed, "{node}");
            assert_eq!(store.load(node).unwrap().records.len(), 1, "{node}");
        }
        assert_eq!(cluster.query_status("B", 1).unwrap().stage, Stage::AwaitingCommits);
        assert!(store.load("B").unwrap().records.is_empty());
        assert_eq!(cluster.ledger().len(), 1);

        // B commits on the next commit for the sequence, and only B
        store.failing.store(false, Ordering::SeqCst);
        let retry = cluster.submit_commit("D", 1, 0).unwrap();
        assert_eq!(retry.committed, vec!["B"]);
        assert_eq!(cluster.query_status("B", 1).unwrap().stage, Stage::Committed);
        for node in ["A", "B", "C", "D"] {
            assert_eq!(store.load(node).unwrap().records.len(), 1, "{node}");
        }
        assert_eq!(cluster.ledger().len(), 1);
    }

    #[test]
    fn test_prepare_without_pre_prepare_is_pending() {
        let mut cluster = cluster();
        let report = cluster.submit_prepare("B", 7, 0).unwrap();
        assert!(!report.emitted());
        assert_eq!(report.status, QuorumStatus::Pending);
        assert_eq!(cluster.query_status("B", 7).unwrap().stage, Stage::AwaitingPrePrepare);
    }

    #[test]
    fn test_partition_leaves_record_pending() {
        let mut cluster = cluster().with_network(PartitionedNetwork::isolating(["C", "D"]));
        let outcome = cluster.submit_record("A", "A:widget:10:5").unwrap();

        assert_eq!(outcome.status, QuorumStatus::Pending);
        assert!(cluster.ledger().is_empty());
        for _ in 0..3 {
            assert_eq!(cluster.query_status("A", 1).unwrap().status, QuorumStatus::Pending);
        }
        assert!(cluster.store().load("A").unwrap().records.is_empty());
    }

    #[test]
    fn test_single_isolated_replica_is_tolerated() {
        let mut cluster = cluster().with_network(PartitionedNetwork::isolating(["D"]));
        let outcome = cluster.submit_record("A", "A:widget:10:5").unwrap();

        assert_eq!(outcome.status, QuorumStatus::Committed);
        assert_eq!(outcome.committed, vec!["A", "B", "C"]);
        assert!(cluster.store().load("D").unwrap().records.is_empty());
    }

    #[test]
    fn test_view_change() {
        let mut cluster = cluster();
        cluster.submit_record("A", "A:widget:10:5").unwrap();

        assert_eq!(
            cluster.initiate_view_change("C", 1).unwrap_err(),
            ConsensusError::NotNextPrimary {
                node: "C".to_string(),
                expected: "B".to_string()
            }
        );
        assert!(matches!(
            cluster.initiate_view_change("A", 0),
            Err(ConsensusError::InvalidInput(_))
        ));

        let change = cluster.initiate_view_change("B", 1).unwrap();
        assert_eq!(change.primary, "B");
        assert_eq!(change.old_primary, "A");
        assert_eq!(change.checkpoints.len(), 4);
        assert!(change.checkpoints.iter().all(|c| !c.messages.is_empty()));
        assert!(cluster.replicas().iter().all(|r| r.view() == 1 && r.sequence() >= 1));

        let outcome = cluster.submit_record("B", "B:bolt:4:2").unwrap();
        assert_eq!(outcome.sequence, 2);
        assert_eq!(outcome.view, 1);
        assert_eq!(outcome.status, QuorumStatus::Committed);
    }

    #[test]
    fn test_checkpoint_depth_limits_audit_trail() {
        let mut config = ClusterConfig::default();
        config.checkpoint_depth = 2;
        let mut cluster = ConsensusCluster::from_config(&config, MemoryStore::new()).unwrap();
        cluster.submit_record("A", "A:widget:10:5").unwrap();

        let change = cluster.initiate_view_change("B", 1).unwrap();
        assert!(change.checkpoints.iter().all(|c| c.messages.len() == 2));
    }

    #[test]
    fn test_submit_with_verifications() {
        let mut cluster = cluster();
        let outcome = cluster.submit_with_verifications("C", "C:gear:3:9").unwrap();

        assert_eq!(outcome.approvals, 4);
        assert_eq!(outcome.threshold, 3);
        assert_eq!(outcome.status, QuorumStatus::Committed);
        assert!(!outcome.is_primary);
        assert_eq!(outcome.sequence, Some(1));
        assert!(outcome.verifications.values().all(|v| v.is_valid()));
        assert_eq!(cluster.store().load("A").unwrap().records.len(), 1);
        assert_eq!(cluster.ledger().len(), 1);
        assert!(cluster.replicas().iter().all(|r| r.sequence() == 1));

        let next = cluster.submit_record("A", "A:widget:1:1").unwrap();
        assert_eq!(next.sequence, 2);
        assert_eq!(cluster.ledger().len(), 2);
    }

    #[test]
    fn test_identity_cipher_for_a_replica() {
        let cluster = cluster();
        let identity = cluster.replica("B").unwrap().identity().identity().clone();
        let n = &cluster.pkg().public_key().n;

        let ciphertext = cluster.identity_encrypt("B", "hi").unwrap();
        assert_eq!(ciphertext, BigUint::from_bytes_be(b"hi").modpow(&identity, n));

        let opened = cluster.identity_decrypt("B", &ciphertext.to_string()).unwrap();
        let raw = cluster.pkg().decrypt(&ciphertext, &identity);
        assert_eq!(opened, reporting::decode(raw));

        assert!(matches!(cluster.identity_encrypt("Z", "hi"), Err(ConsensusError::InvalidInput(_))));
        assert!(matches!(
            cluster.identity_decrypt("B", "not a number"),
            Err(ConsensusError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_query_item_and_verify_query() {
        let mut cluster = cluster();
        cluster.submit_record("A", "A:widget:10:5").unwrap();
        cluster.submit_record("A", "A:bolt:2:1").unwrap();

        let all = cluster.query_item("B", None).unwrap();
        assert_eq!(all.count, 2);
        let widgets = cluster.query_item("B", Some("widget")).unwrap();
        assert_eq!(widgets.count, 1);
        assert_eq!(widgets.results[0].record.quantity, Some(10));
        assert_eq!(widgets.results[0].partial_signatures.len(), 3);

        let verified = cluster.verify_query("widget").unwrap();
        let params = &verified.verification_parameters;
        assert_eq!(params.partial_signatures.len(), 4);
        assert_eq!(params.verification_status, AttestationStatus::Verified);
        assert_eq!(params.pkg_n, cluster.pkg().public_key().n);
        // JSON reports are wider than the officer modulus
        assert!(verified.encrypted_response.reduced);

        assert_eq!(
            cluster.verify_query("sprocket").unwrap_err(),
            ConsensusError::ItemNotFound("sprocket".to_string())
        );
    }

    #[test]
    fn test_harn_disabled_skips_attestation() {
        let mut config = ClusterConfig::default();
        config.harn_enabled = false;
        let mut cluster = ConsensusCluster::from_config(&config, MemoryStore::new()).unwrap();
        let outcome = cluster.submit_record("A", "A:widget:10:5").unwrap();

        assert_eq!(outcome.status, QuorumStatus::Committed);
        assert!(outcome.attestation.is_none());
        let stored = cluster.store().load("A").unwrap();
        assert!(stored.records[0].partial_signatures.is_none());
    }

    #[test]
    fn test_system_status_and_node_info() {
        let mut cluster = cluster();
        cluster.submit_record("A", "A:widget:10:5").unwrap();

        let status = cluster.system_status();
        assert_eq!(status.total_nodes, 4);
        assert_eq!(status.records_stored, 1);
        assert_eq!(status.global_sequence_number, 1);
        assert_eq!(status.nodes.iter().filter(|n| n.is_primary).count(), 1);

        let info = serde_json::to_value(cluster.node_info()).unwrap();
        assert_eq!(info["nodes"][0]["identity"], "126");
        assert_eq!(info["nodes"][3]["random"], "921");
        assert!(info["nodes"][0].get("d").is_none());
    }
}
