use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;

use super::{
    config::{ClusterConfig, KeyConfig, ReplicaConfig, DEFAULT_CHECKPOINT_DEPTH},
    crypto::RsaKeyPair,
    error::ConsensusError,
};

const SMALL_PRIMES: [u32; 15] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47];
const MILLER_RABIN_ROUNDS: usize = 32;
const MIN_PRIME_BITS: u64 = 16;

/// Miller-Rabin probable-prime test with `rounds` random witnesses.
pub fn is_probable_prime<R: Rng + ?Sized>(candidate: &BigUint, rounds: usize, rng: &mut R) -> bool {
    let one = BigUint::one();
    let two = BigUint::from(2u32);
    if candidate < &two {
        return false;
    }
    for small in SMALL_PRIMES {
        let small = BigUint::from(small);
        if candidate == &small {
            return true;
        }
        if (candidate % &small).is_zero() {
            return false;
        }
    }

    let n_minus_one = candidate - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, candidate);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, candidate);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Draws odd `bits`-sized candidates until one passes Miller-Rabin.
pub fn generate_prime<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> BigUint {
    let top = BigUint::one() << (bits - 1);
    loop {
        let candidate = rng.gen_biguint(bits) | &top | BigUint::one();
        if is_probable_prime(&candidate, MILLER_RABIN_ROUNDS, rng) {
            return candidate;
        }
    }
}

/// Fresh primes for an RSA keypair with public exponent `e`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKey {
    pub p: BigUint,
    pub q: BigUint,
    pub e: BigUint,
}

impl GeneratedKey {
    pub fn keypair(&self) -> Result<RsaKeyPair, ConsensusError> {
        RsaKeyPair::from_primes(&self.p, &self.q, &self.e)
    }
}

pub fn generate_key<R: Rng + ?Sized>(
    prime_bits: u64,
    e: &BigUint,
    rng: &mut R,
) -> Result<GeneratedKey, ConsensusError> {
    if prime_bits < MIN_PRIME_BITS {
        return Err(ConsensusError::InvalidKey(format!(
            "primes need at least {MIN_PRIME_BITS} bits, got {prime_bits}"
        )));
    }
    if e <= &BigUint::one() {
        return Err(ConsensusError::InvalidKey("e must be greater than one".to_string()));
    }

    loop {
        let p = generate_prime(prime_bits, rng);
        let q = generate_prime(prime_bits, rng);
        if p == q {
            continue;
        }
        let key = GeneratedKey { p, q, e: e.clone() };
        // e sharing a factor with phi(n) just means another draw
        if key.keypair().is_ok() {
            return Ok(key);
        }
    }
}

impl From<GeneratedKey> for KeyConfig {
    fn from(key: GeneratedKey) -> Self {
        KeyConfig {
            p: key.p,
            q: key.q,
            e: key.e,
        }
    }
}

/// A complete deployment with fresh keys: replicas named A, B, C, ... with
/// identities from 126 upward, plus PKG and officer keys.
pub fn generate_config<R: Rng + ?Sized>(
    replicas: usize,
    prime_bits: u64,
    e: &BigUint,
    rng: &mut R,
) -> Result<ClusterConfig, ConsensusError> {
    if replicas == 0 || replicas > 26 {
        return Err(ConsensusError::Config(format!(
            "between 1 and 26 replicas can be generated, not {replicas}"
        )));
    }

    let mut members = Vec::with_capacity(replicas);
    for (i, name) in ('A'..='Z').take(replicas).enumerate() {
        let key = generate_key(prime_bits, e, rng)?;
        members.push(ReplicaConfig {
            name: name.to_string(),
            p: key.p,
            q: key.q,
            e: key.e,
            identity: BigUint::from(126 + i as u64),
            random: BigUint::from(rng.gen_range(2u64..1_000_000)),
        });
    }

    let config = ClusterConfig {
        replicas: members,
        pkg: generate_key(prime_bits, e, rng)?.into(),
        officer: generate_key(prime_bits, e, rng)?.into(),
        max_faulty: None,
        checkpoint_depth: DEFAULT_CHECKPOINT_DEPTH,
        harn_enabled: true,
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_known_primes_and_composites() {
        let mut rng = StdRng::seed_from_u64(7);
        for prime in [2u32, 3, 47, 53, 7919, 104_729] {
            assert!(is_probable_prime(&BigUint::from(prime), 16, &mut rng), "{prime}");
        }
        for composite in [0u32, 1, 4, 49, 561, 7917, 104_730] {
            assert!(!is_probable_prime(&BigUint::from(composite), 16, &mut rng), "{composite}");
        }
    }

    #[test]
    fn test_generated_key_signs() {
        let mut rng = StdRng::seed_from_u64(42);
        let key = generate_key(64, &BigUint::from(65_537u32), &mut rng).unwrap();
        assert_eq!(key.p.bits(), 64);
        assert_eq!(key.q.bits(), 64);

        let keypair = key.keypair().unwrap();
        let signature = keypair.sign(b"widget");
        assert!(keypair.public_key().verify(b"widget", &signature).is_valid());
    }

    #[test]
    fn test_rejects_tiny_primes() {
        let mut rng = StdRng::seed_from_u64(1);
        let result = generate_key(8, &BigUint::from(3u32), &mut rng);
        assert!(matches!(result, Err(ConsensusError::InvalidKey(_))));
    }

    #[test]
    fn test_generated_config_is_usable() {
        let mut rng = StdRng::seed_from_u64(9);
        let config = generate_config(4, 48, &BigUint::from(65_537u32), &mut rng).unwrap();
        assert_eq!(config.replicas.len(), 4);
        assert_eq!(config.replicas[3].name, "D");
        assert_eq!(config.replicas[0].identity, BigUint::from(126u32));
        assert_eq!(config.quorum_policy().unwrap().max_faulty(), 1);

        let yaml = config.to_yaml().unwrap();
        assert_eq!(ClusterConfig::from_yaml_str(&yaml).unwrap(), config);
        assert!(generate_config(0, 48, &BigUint::from(3u32), &mut rng).is_err());
    }
}
