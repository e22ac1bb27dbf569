use num_bigint::BigUint;

use super::{
    config::ReplicaConfig,
    crypto::{PublicKey, RsaKeyPair},
    error::ConsensusError,
    harn::{PartialSignature, PkgAuthority},
};

/// Everything a replica signs with: its RSA keypair plus the Harn identity
/// integer and fixed random value.
#[derive(Debug)]
pub struct ReplicaIdentity {
    name: String,
    keypair: RsaKeyPair,
    identity: BigUint,
    random: BigUint,
}

impl ReplicaIdentity {
    pub fn new(name: impl Into<String>, keypair: RsaKeyPair, identity: BigUint, random: BigUint) -> Self {
        ReplicaIdentity {
            name: name.into(),
            keypair,
            identity,
            random,
        }
    }

    pub fn from_config(config: &ReplicaConfig) -> Result<Self, ConsensusError> {
        let keypair = RsaKeyPair::from_primes(&config.p, &config.q, &config.e).map_err(|e| {
            ConsensusError::InvalidKey(format!("replica {}: {e}", config.name))
        })?;
        Ok(Self::new(
            config.name.clone(),
            keypair,
            config.identity.clone(),
            config.random.clone(),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public_key()
    }

    pub fn identity(&self) -> &BigUint {
        &self.identity
    }

    pub fn random(&self) -> &BigUint {
        &self.random
    }

    pub fn sign(&self, message: &[u8]) -> BigUint {
        self.keypair.sign(message)
    }

    pub fn harn_partial(&self, pkg: &PkgAuthority, message: &[u8]) -> PartialSignature {
        PartialSignature {
            signature: pkg.partial_sign(&self.identity, &self.random, message),
            signed_by: self.name.clone(),
        }
    }
}
