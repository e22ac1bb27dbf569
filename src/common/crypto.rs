use std::fmt;

use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};
use sha2::{Digest as ShaDigest, Sha256};

use super::{decimal, error::ConsensusError};

/*
    Signatures are textbook RSA over a SHA-256 digest: no padding, no
    randomisation. sign(m) = (H(m) mod n)^d mod n, and a signature is valid iff
    sig^e mod n recovers the same reduced digest. The missing padding keeps the
    scheme multiplicative, which the threshold attestation relies on.
*/

pub type Digest = [u8; 32];

pub fn digest(message: &[u8]) -> Digest {
    Sha256::digest(message).into()
}

/// Reads the SHA-256 digest of `message` as a big-endian integer, reduced
/// modulo `modulus` when it would not fit.
pub fn hash_to_int(message: &[u8], modulus: &BigUint) -> BigUint {
    let h = BigUint::from_bytes_be(&digest(message));
    if &h >= modulus {
        h % modulus
    } else {
        h
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(with = "decimal")]
    pub e: BigUint,
    #[serde(with = "decimal")]
    pub n: BigUint,
}

pub struct RsaKeyPair {
    public: PublicKey,
    d: BigUint,
}

/// Outcome of every signature check: validity plus the values that decided it.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct Verification {
    pub valid: bool,
    #[serde(with = "decimal")]
    pub original_hash: BigUint,
    #[serde(with = "decimal::option")]
    pub recovered_hash: Option<BigUint>,
    pub key: Option<PublicKey>,
}

impl RsaKeyPair {
    pub fn from_primes(p: &BigUint, q: &BigUint, e: &BigUint) -> Result<Self, ConsensusError> {
        let one = BigUint::one();
        if p <= &one || q <= &one {
            return Err(ConsensusError::InvalidKey(
                "primes must be greater than one".to_string(),
            ));
        }
        if p == q {
            return Err(ConsensusError::InvalidKey("p and q must differ".to_string()));
        }

        let n = p * q;
        let phi = (p - &one) * (q - &one);
        let d = e.modinv(&phi).ok_or_else(|| {
            ConsensusError::InvalidKey(format!("e={e} is not invertible modulo phi(n)"))
        })?;

        Ok(RsaKeyPair {
            public: PublicKey { e: e.clone(), n },
            d,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn private_exponent(&self) -> &BigUint {
        &self.d
    }

    pub fn sign(&self, message: &[u8]) -> BigUint {
        let h = hash_to_int(message, &self.public.n);
        h.modpow(&self.d, &self.public.n)
    }

    /// Raw private-key exponentiation. The input must already be below `n`.
    pub fn decrypt(&self, ciphertext: &BigUint) -> BigUint {
        ciphertext.modpow(&self.d, &self.public.n)
    }
}

impl fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl PublicKey {
    pub fn verify(&self, message: &[u8], signature: &BigUint) -> Verification {
        let original_hash = hash_to_int(message, &self.n);
        let recovered_hash = signature.modpow(&self.e, &self.n);
        Verification {
            valid: original_hash == recovered_hash,
            original_hash,
            recovered_hash: Some(recovered_hash),
            key: Some(self.clone()),
        }
    }

    /// Raw public-key exponentiation. The input must already be below `n`.
    pub fn encrypt(&self, plaintext: &BigUint) -> BigUint {
        plaintext.modpow(&self.e, &self.n)
    }
}

impl Verification {
    /// Fail-closed outcome for a signer nobody knows a key for.
    pub fn unknown_signer(message: &[u8]) -> Self {
        Verification {
            valid: false,
            original_hash: BigUint::from_bytes_be(&digest(message)),
            recovered_hash: None,
            key: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}
