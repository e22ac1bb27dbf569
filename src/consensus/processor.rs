use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{
    message::{ConsensusMessage, Phase},
    peers::Peers,
    qc::QuorumCertificate,
    quorum::{QuorumPolicy, QuorumStatus},
    store::ReplicaLog,
};
use crate::common::identity::ReplicaIdentity;

/*
    Each replica tracks one instance per sequence number:

        AwaitingPrePrepare -> AwaitingPrepares -> AwaitingCommits -> Committed

    A replica that drops a message (bad signature, wrong primary, stale view,
    conflicting proposal) simply does not advance. There is no rejected state
    and no timeout: an instance that never sees a quorum stays pending.
*/

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AwaitingPrePrepare,
    AwaitingPrepares,
    AwaitingCommits,
    Committed,
}

#[derive(Clone, Debug)]
pub struct Instance {
    pub view: u64,
    pub record: String,
    pub primary: String,
    pub primary_signature: BigUint,
    pub stage: Stage,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Accepted,
    Duplicate,
    Dropped(DropReason),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    InvalidSignature,
    NotFromPrimary,
    StaleView,
    ConflictingProposal,
}

pub struct Replica {
    identity: ReplicaIdentity,
    view: u64,
    sequence: u64,
    log: ReplicaLog,
    instances: BTreeMap<u64, Instance>,
}

impl Stage {
    pub fn next(&self) -> Self {
        match self {
            Stage::AwaitingPrePrepare => Stage::AwaitingPrepares,
            Stage::AwaitingPrepares => Stage::AwaitingCommits,
            Stage::AwaitingCommits => Stage::Committed,
            Stage::Committed => Stage::Committed,
        }
    }
}

impl Replica {
    pub fn new(identity: ReplicaIdentity) -> Self {
        Replica {
            identity,
            view: 0,
            sequence: 0,
            log: ReplicaLog::new(),
            instances: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn identity(&self) -> &ReplicaIdentity {
        &self.identity
    }

    pub fn view(&self) -> u64 {
        self.view
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn log(&self) -> &ReplicaLog {
        &self.log
    }

    pub fn instance(&self, sequence: u64) -> Option<&Instance> {
        self.instances.get(&sequence)
    }

    pub fn stage(&self, sequence: u64) -> Stage {
        self.instances
            .get(&sequence)
            .map_or(Stage::AwaitingPrePrepare, |instance| instance.stage)
    }

    pub fn is_primary(&self, peers: &Peers) -> bool {
        peers.get_leader(self.view) == self.name()
    }

    /// Signs and logs a pre-prepare for `record` at `sequence` in the current
    /// view. The caller has already checked that this replica is primary.
    pub fn propose(&mut self, sequence: u64, record: &str) -> ConsensusMessage {
        let message = ConsensusMessage::signed(
            Phase::PrePrepare,
            sequence,
            self.view,
            record,
            &self.identity,
        );
        let primary = self.name().to_string();
        self.sequence = self.sequence.max(sequence);
        self.instances.insert(
            sequence,
            Instance {
                view: self.view,
                record: record.to_string(),
                primary,
                primary_signature: message.signature.clone(),
                stage: Stage::AwaitingPrepares,
            },
        );
        self.log.append(message.clone());
        info!(replica = self.name(), sequence, view = self.view, "Proposed pre-prepare");
        message
    }

    /// Handles a message delivered by the transport.
    pub fn handle(&mut self, message: &ConsensusMessage, peers: &Peers) -> Delivery {
        let verification = peers.verify_message(message);
        if !verification.is_valid() {
            warn!(
                replica = self.name(),
                sender = %message.sender,
                phase = message.phase.tag(),
                sequence = message.sequence,
                "Dropped message with invalid signature"
            );
            return Delivery::Dropped(DropReason::InvalidSignature);
        }

        match message.phase {
            Phase::PrePrepare => self.handle_pre_prepare(message, peers),
            Phase::Prepare | Phase::Commit => self.handle_vote(message),
        }
    }

    fn handle_pre_prepare(&mut self, message: &ConsensusMessage, peers: &Peers) -> Delivery {
        if message.sender != peers.get_leader(message.view) {
            warn!(replica = self.name(), sender = %message.sender, "Pre-prepare not from primary");
            return Delivery::Dropped(DropReason::NotFromPrimary);
        }
        if message.view != self.view {
            warn!(
                replica = self.name(),
                view = message.view,
                current_view = self.view,
                "Pre-prepare for another view"
            );
            return Delivery::Dropped(DropReason::StaleView);
        }
        if let Some(instance) = self.instances.get(&message.sequence) {
            if instance.view == message.view && instance.record == message.record {
                return Delivery::Duplicate;
            }
            warn!(replica = self.name(), sequence = message.sequence, "Conflicting pre-prepare");
            return Delivery::Dropped(DropReason::ConflictingProposal);
        }

        self.sequence = self.sequence.max(message.sequence);
        self.instances.insert(
            message.sequence,
            Instance {
                view: message.view,
                record: message.record.clone(),
                primary: message.sender.clone(),
                primary_signature: message.signature.clone(),
                stage: Stage::AwaitingPrepares,
            },
        );
        self.log.append(message.clone());
        debug!(replica = self.name(), sequence = message.sequence, "Accepted pre-prepare");
        Delivery::Accepted
    }

    fn handle_vote(&mut self, message: &ConsensusMessage) -> Delivery {
        if self.log.record_vote(message.clone()) {
            debug!(
                replica = self.name(),
                sender = %message.sender,
                phase = message.phase.tag(),
                sequence = message.sequence,
                "Recorded vote"
            );
            Delivery::Accepted
        } else {
            Delivery::Duplicate
        }
    }

    /// Emits this replica's prepare for an accepted pre-prepare. Returns
    /// `None` when there is nothing to prepare: no accepted pre-prepare for
    /// `(sequence, view)`, this replica proposed it, or it already prepared.
    pub fn prepare(&mut self, sequence: u64, view: u64) -> Option<ConsensusMessage> {
        let instance = self.instances.get(&sequence)?;
        if instance.view != view || instance.primary == self.name() {
            return None;
        }
        if self.log.has_voted(Phase::Prepare, sequence, self.name()) {
            return None;
        }

        let message =
            ConsensusMessage::signed(Phase::Prepare, sequence, view, &instance.record, &self.identity);
        self.log.record_vote(message.clone());
        debug!(replica = self.name(), sequence, view, "Emitted prepare");
        Some(message)
    }

    pub fn prepare_certificate(&self, sequence: u64) -> Option<QuorumCertificate> {
        let instance = self.instances.get(&sequence)?;
        Some(QuorumCertificate::collect(
            &self.log,
            Phase::Prepare,
            sequence,
            instance.view,
            &instance.record,
        ))
    }

    pub fn commit_certificate(&self, sequence: u64) -> Option<QuorumCertificate> {
        let instance = self.instances.get(&sequence)?;
        Some(QuorumCertificate::collect(
            &self.log,
            Phase::Commit,
            sequence,
            instance.view,
            &instance.record,
        ))
    }

    /// Emits this replica's commit once it holds `PREPARE_THRESHOLD` matching
    /// prepares for the instance.
    pub fn commit(&mut self, sequence: u64, view: u64, policy: &QuorumPolicy) -> Option<ConsensusMessage> {
        let prepares = self.prepare_certificate(sequence)?;
        let instance = self.instances.get_mut(&sequence)?;
        if instance.view != view || self.log.has_voted(Phase::Commit, sequence, self.identity.name()) {
            return None;
        }
        if !prepares.is_complete(policy.prepare_threshold()) {
            debug!(
                replica = self.identity.name(),
                sequence,
                prepares = prepares.len(),
                required = policy.prepare_threshold(),
                "Not prepared yet"
            );
            return None;
        }

        if instance.stage == Stage::AwaitingPrepares {
            instance.stage = instance.stage.next();
        }
        let message =
            ConsensusMessage::signed(Phase::Commit, sequence, view, &instance.record, &self.identity);
        self.log.record_vote(message.clone());
        debug!(replica = self.identity.name(), sequence, view, "Emitted commit");
        Some(message)
    }

    /// The commit certificate for `sequence` once the policy decides it is
    /// committed, while the instance has not been marked `Committed` yet.
    pub fn ready_to_commit(&self, sequence: u64, policy: &QuorumPolicy) -> Option<QuorumCertificate> {
        if self.stage(sequence) == Stage::Committed {
            return None;
        }
        let commits = self.commit_certificate(sequence)?;
        (policy.decide(commits.len()) == QuorumStatus::Committed).then_some(commits)
    }

    pub fn mark_committed(&mut self, sequence: u64) {
        let name = self.identity.name().to_string();
        if let Some(instance) = self.instances.get_mut(&sequence) {
            instance.stage = Stage::Committed;
            info!(replica = %name, sequence, view = instance.view, "Committed");
        }
    }

    /// Moves the local counter forward to `sequence`, never back.
    pub fn observe_sequence(&mut self, sequence: u64) {
        self.sequence = self.sequence.max(sequence);
    }

    /// Adopts `view`. Sequence numbers carry over: the local counter only
    /// moves forward, to `sequence_floor` at most.
    pub fn enter_view(&mut self, view: u64, sequence_floor: u64) {
        self.view = view;
        self.observe_sequence(sequence_floor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::ClusterConfig;
    use crate::consensus::peers::Peer;

    fn replicas() -> (Vec<Replica>, Peers) {
        let config = ClusterConfig::default();
        let replicas: Vec<Replica> = config
            .replicas
            .iter()
            .map(|c| Replica::new(ReplicaIdentity::from_config(c).unwrap()))
            .collect();
        let peers = Peers::new(
            replicas
                .iter()
                .map(|r| Peer {
                    name: r.name().to_string(),
                    public_key: r.identity().public_key().clone(),
                    identity: r.identity().identity().clone(),
                })
                .collect(),
        );
        (replicas, peers)
    }

    #[test]
    fn test_handle_pre_prepare() {
        let (mut replicas, peers) = replicas();
        let pre_prepare = replicas[0].propose(1, "A:widget:10:5");

        assert_eq!(replicas[1].handle(&pre_prepare, &peers), Delivery::Accepted);
        assert_eq!(replicas[1].stage(1), Stage::AwaitingPrepares);
        assert_eq!(replicas[1].sequence(), 1);
        assert_eq!(replicas[1].handle(&pre_prepare, &peers), Delivery::Duplicate);
    }

    #[test]
    fn test_drops_forged_pre_prepare() {
        let (mut replicas, peers) = replicas();
        let mut forged = replicas[0].propose(1, "A:widget:10:5");
        forged.record = "A:widget:1000:5".to_string();

        assert_eq!(
            replicas[1].handle(&forged, &peers),
            Delivery::Dropped(DropReason::InvalidSignature)
        );
        assert_eq!(replicas[1].stage(1), Stage::AwaitingPrePrepare);
        assert!(replicas[1].prepare(1, 0).is_none());
    }

    #[test]
    fn test_drops_pre_prepare_from_backup() {
        let (mut replicas, peers) = replicas();
        // B signs validly but is not the primary of view 0
        let message = replicas[1].propose(1, "B:bolt:1:1");
        assert_eq!(
            replicas[2].handle(&message, &peers),
            Delivery::Dropped(DropReason::NotFromPrimary)
        );
    }

    #[test]
    fn test_drops_unknown_sender() {
        let (mut replicas, peers) = replicas();
        let mut message = replicas[0].propose(1, "A:widget:10:5");
        message.sender = "Z".to_string();
        assert_eq!(
            replicas[1].handle(&message, &peers),
            Delivery::Dropped(DropReason::InvalidSignature)
        );
    }

    #[test]
    fn test_commit_requires_prepared() {
        let (mut replicas, peers) = replicas();
        let policy = QuorumPolicy::for_replicas(4);
        let pre_prepare = replicas[0].propose(1, "A:widget:10:5");
        for replica in replicas.iter_mut().skip(1) {
            replica.handle(&pre_prepare, &peers);
        }

        let prepare_b = replicas[1].prepare(1, 0).unwrap();
        assert!(replicas[1].prepare(1, 0).is_none());
        // B holds only its own prepare
        assert!(replicas[1].commit(1, 0, &policy).is_none());

        let prepare_c = replicas[2].prepare(1, 0).unwrap();
        replicas[1].handle(&prepare_c, &peers);
        replicas[2].handle(&prepare_b, &peers);

        let commit_b = replicas[1].commit(1, 0, &policy).unwrap();
        assert_eq!(commit_b.phase, Phase::Commit);
        assert_eq!(replicas[1].stage(1), Stage::AwaitingCommits);
        assert!(replicas[1].commit(1, 0, &policy).is_none());
    }

    #[test]
    fn test_ready_to_commit_needs_commit_quorum() {
        let (mut replicas, peers) = replicas();
        let policy = QuorumPolicy::for_replicas(4);
        let pre_prepare = replicas[0].propose(1, "A:widget:10:5");
        for replica in replicas.iter_mut().skip(1) {
            replica.handle(&pre_prepare, &peers);
        }
        let prepares: Vec<_> = (1..4).filter_map(|i| replicas[i].prepare(1, 0)).collect();
        for prepare in &prepares {
            for replica in replicas.iter_mut() {
                replica.handle(prepare, &peers);
            }
        }

        let commit_b = replicas[1].commit(1, 0, &policy).unwrap();
        let commit_c = replicas[2].commit(1, 0, &policy).unwrap();
        let commit_d = replicas[3].commit(1, 0, &policy).unwrap();

        replicas[0].handle(&commit_b, &peers);
        replicas[0].handle(&commit_c, &peers);
        assert!(replicas[0].ready_to_commit(1, &policy).is_none());

        replicas[0].handle(&commit_d, &peers);
        let certificate = replicas[0].ready_to_commit(1, &policy).unwrap();
        assert_eq!(certificate.len(), 3);
        assert_eq!(replicas[0].stage(1), Stage::AwaitingPrepares);

        replicas[0].mark_committed(1);
        assert_eq!(replicas[0].stage(1), Stage::Committed);
        assert!(replicas[0].ready_to_commit(1, &policy).is_none());
    }

    #[test]
    fn test_primary_does_not_prepare() {
        let (mut replicas, _) = replicas();
        replicas[0].propose(1, "A:widget:10:5");
        assert!(replicas[0].prepare(1, 0).is_none());
    }

    #[test]
    fn test_enter_view_keeps_sequence() {
        let (mut replicas, _) = replicas();
        replicas[0].propose(5, "A:widget:10:5");
        replicas[0].enter_view(1, 3);
        assert_eq!(replicas[0].view(), 1);
        assert_eq!(replicas[0].sequence(), 5);
        replicas[0].enter_view(2, 9);
        assert_eq!(replicas[0].sequence(), 9);
        replicas[0].observe_sequence(4);
        assert_eq!(replicas[0].sequence(), 9);
    }
}
