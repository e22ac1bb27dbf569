use num_bigint::BigUint;

use super::message::{ConsensusMessage, Signable};
use crate::common::crypto::{PublicKey, Verification};

/// Public directory of the fixed replica set, in primary rotation order.
#[derive(Debug, Clone)]
pub struct Peers {
    pub members: Vec<Peer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub name: String,
    pub public_key: PublicKey,
    pub identity: BigUint,
}

impl Peers {
    pub fn new(members: Vec<Peer>) -> Self {
        Peers { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Primary of `view`: members[view mod N].
    pub fn get_leader(&self, view_num: u64) -> &str {
        &self.members[(view_num % self.members.len() as u64) as usize].name
    }

    pub fn is_member(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|peer| peer.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Peer> {
        self.members.iter().find(|peer| peer.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|peer| peer.name.as_str())
    }

    /// Checks `signature` over `message` against the claimed signer's public
    /// key. Unknown signers fail closed.
    pub fn verify(&self, message: &[u8], signature: &BigUint, signer: &str) -> Verification {
        match self.get(signer) {
            Some(peer) => peer.public_key.verify(message, signature),
            None => Verification::unknown_signer(message),
        }
    }

    pub fn verify_message(&self, message: &ConsensusMessage) -> Verification {
        self.verify(&message.signing_bytes(), &message.signature, &message.sender)
    }
}
