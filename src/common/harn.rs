use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};

use super::{
    crypto::{hash_to_int, PublicKey, RsaKeyPair},
    decimal,
};

/*
    Harn identity-based multi-signature. The Private Key Generator (PKG) holds
    a master RSA keypair and hands every identity a secret share

        g_i = identity_i ^ d_pkg mod n_pkg

    A signer with fixed random value r_i produces the partial

        partial_i = g_i * r_i ^ (H(m) mod n_pkg) mod n_pkg

    and the collective attestation is the product of the partials mod n_pkg.

    Known limitation: an attestation is reported "verified" purely on the size
    of the signer set. Nothing checks the combined value against a Harn
    verification equation under the PKG public key.
*/

/// Master key material of the Private Key Generator. Read-only once built.
#[derive(Debug)]
pub struct PkgAuthority {
    keypair: RsaKeyPair,
}

pub type SharedPkg = Arc<PkgAuthority>;

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PartialSignature {
    #[serde(with = "decimal")]
    pub signature: BigUint,
    pub signed_by: String,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationStatus {
    Verified,
    Pending,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Attestation {
    #[serde(with = "decimal")]
    pub combined: BigUint,
    pub partials: Vec<PartialSignature>,
    pub status: AttestationStatus,
}

impl PkgAuthority {
    pub fn new(keypair: RsaKeyPair) -> Self {
        PkgAuthority { keypair }
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public_key()
    }

    fn modulus(&self) -> &BigUint {
        &self.keypair.public_key().n
    }

    /// Secret share for `identity`: identity^d mod n.
    pub fn secret_key(&self, identity: &BigUint) -> BigUint {
        identity.modpow(self.keypair.private_exponent(), self.modulus())
    }

    pub fn partial_sign(&self, identity: &BigUint, random: &BigUint, message: &[u8]) -> BigUint {
        let n = self.modulus();
        let h = hash_to_int(message, n);
        (self.secret_key(identity) * random.modpow(&h, n)) % n
    }

    /// Multiplies the partials together. `required` is the approval count
    /// that separates a verified attestation from a pending one.
    pub fn combine(&self, partials: Vec<PartialSignature>, required: usize) -> Attestation {
        let n = self.modulus();
        let combined = partials
            .iter()
            .fold(BigUint::one(), |acc, partial| (acc * &partial.signature) % n);
        let status = if partials.len() >= required {
            AttestationStatus::Verified
        } else {
            AttestationStatus::Pending
        };

        Attestation {
            combined,
            partials,
            status,
        }
    }

    /// Identity-based encryption: the recipient's identity is the exponent.
    /// The message is read as a big-endian integer and reduced mod n_pkg.
    pub fn encrypt(&self, message: &str, identity: &BigUint) -> BigUint {
        let n = self.modulus();
        let m = BigUint::from_bytes_be(message.as_bytes()) % n;
        m.modpow(identity, n)
    }

    /// Decrypts with the identity's secret share, returning the minimal
    /// big-endian bytes of the result.
    pub fn decrypt(&self, ciphertext: &BigUint, identity: &BigUint) -> Vec<u8> {
        let m = ciphertext.modpow(&self.secret_key(identity), self.modulus());
        super::minimal_bytes(&m)
    }
}

impl Attestation {
    pub fn signers(&self) -> Vec<&str> {
        self.partials.iter().map(|p| p.signed_by.as_str()).collect()
    }

    pub fn is_verified(&self) -> bool {
        self.status == AttestationStatus::Verified
    }
}
