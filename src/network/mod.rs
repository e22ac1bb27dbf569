use std::collections::BTreeSet;

use crate::consensus::{message::ConsensusMessage, peers::Peers};

/*
    Transport is in-process, point-to-point and synchronous: a broadcast
    returns one envelope per recipient and the cluster hands each envelope to
    its replica before the next logical step starts. The broadcaster has
    already logged its own copy, so it is never a recipient.

    There are no timeouts and no retransmission. A message the network does
    not deliver is simply gone, and the instance waiting on it stays pending.
*/

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Envelope {
    pub recipient: String,
    pub message: ConsensusMessage,
}

pub trait Network: Send + Sync {
    fn broadcast(&self, message: &ConsensusMessage, peers: &Peers) -> Vec<Envelope>;
}

/// Delivers every broadcast to every other member.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessNetwork;

impl Network for InProcessNetwork {
    fn broadcast(&self, message: &ConsensusMessage, peers: &Peers) -> Vec<Envelope> {
        peers
            .names()
            .filter(|name| *name != message.sender)
            .map(|name| Envelope {
                recipient: name.to_string(),
                message: message.clone(),
            })
            .collect()
    }
}

/// Cuts the listed replicas off: nothing they send leaves, nothing sent to
/// them arrives.
#[derive(Debug, Clone, Default)]
pub struct PartitionedNetwork {
    isolated: BTreeSet<String>,
}

impl PartitionedNetwork {
    pub fn isolating<I, S>(replicas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PartitionedNetwork {
            isolated: replicas.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_isolated(&self, replica: &str) -> bool {
        self.isolated.contains(replica)
    }
}

impl Network for PartitionedNetwork {
    fn broadcast(&self, message: &ConsensusMessage, peers: &Peers) -> Vec<Envelope> {
        if self.is_isolated(&message.sender) {
            return Vec::new();
        }
        InProcessNetwork
            .broadcast(message, peers)
            .into_iter()
            .filter(|envelope| !self.is_isolated(&envelope.recipient))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{config::ClusterConfig, identity::ReplicaIdentity};
    use crate::consensus::{message::Phase, peers::Peer};

    fn setup() -> (Vec<ReplicaIdentity>, Peers) {
        let identities: Vec<ReplicaIdentity> = ClusterConfig::default()
            .replicas
            .iter()
            .map(|c| ReplicaIdentity::from_config(c).unwrap())
            .collect();
        let peers = Peers::new(
            identities
                .iter()
                .map(|id| Peer {
                    name: id.name().to_string(),
                    public_key: id.public_key().clone(),
                    identity: id.identity().clone(),
                })
                .collect(),
        );
        (identities, peers)
    }

    fn recipients(envelopes: &[Envelope]) -> Vec<&str> {
        envelopes.iter().map(|e| e.recipient.as_str()).collect()
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let (identities, peers) = setup();
        let message = ConsensusMessage::signed(Phase::Prepare, 1, 0, "A:widget:10:5", &identities[1]);

        let envelopes = InProcessNetwork.broadcast(&message, &peers);
        assert_eq!(recipients(&envelopes), vec!["A", "C", "D"]);
        assert!(envelopes.iter().all(|e| e.message == message));
    }

    #[test]
    fn test_partition_drops_both_directions() {
        let (identities, peers) = setup();
        let network = PartitionedNetwork::isolating(["C"]);

        let from_a = ConsensusMessage::signed(Phase::PrePrepare, 1, 0, "A:widget:10:5", &identities[0]);
        assert_eq!(recipients(&network.broadcast(&from_a, &peers)), vec!["B", "D"]);

        let from_c = ConsensusMessage::signed(Phase::Prepare, 1, 0, "A:widget:10:5", &identities[2]);
        assert!(network.broadcast(&from_c, &peers).is_empty());
    }
}
