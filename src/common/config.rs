use std::{collections::HashSet, path::Path};

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use super::{decimal, error::ConsensusError};
use crate::consensus::quorum::QuorumPolicy;

pub const DEFAULT_CHECKPOINT_DEPTH: usize = 10;

/// Static description of a deployment. Big integers are decimal strings in
/// YAML so that values wider than 64 bits survive parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub replicas: Vec<ReplicaConfig>,
    pub pkg: KeyConfig,
    pub officer: KeyConfig,
    /// Tolerated faulty replicas. Derived from the replica count when absent.
    #[serde(default)]
    pub max_faulty: Option<usize>,
    #[serde(default = "default_checkpoint_depth")]
    pub checkpoint_depth: usize,
    #[serde(default = "default_harn_enabled")]
    pub harn_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub name: String,
    #[serde(with = "decimal")]
    pub p: BigUint,
    #[serde(with = "decimal")]
    pub q: BigUint,
    #[serde(with = "decimal")]
    pub e: BigUint,
    #[serde(with = "decimal")]
    pub identity: BigUint,
    #[serde(with = "decimal")]
    pub random: BigUint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    #[serde(with = "decimal")]
    pub p: BigUint,
    #[serde(with = "decimal")]
    pub q: BigUint,
    #[serde(with = "decimal")]
    pub e: BigUint,
}

fn default_checkpoint_depth() -> usize {
    DEFAULT_CHECKPOINT_DEPTH
}

fn default_harn_enabled() -> bool {
    true
}

fn big(digits: &str) -> BigUint {
    BigUint::parse_bytes(digits.as_bytes(), 10).unwrap_or_default()
}

impl ClusterConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConsensusError> {
        let config: ClusterConfig =
            serde_yaml::from_str(content).map_err(|e| ConsensusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConsensusError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConsensusError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> Result<String, ConsensusError> {
        serde_yaml::to_string(self).map_err(|e| ConsensusError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.replicas.is_empty() {
            return Err(ConsensusError::Config("at least one replica is required".to_string()));
        }
        let mut names = HashSet::new();
        for replica in &self.replicas {
            if replica.name.trim().is_empty() {
                return Err(ConsensusError::Config("replica names must not be empty".to_string()));
            }
            if replica.name.contains(':') {
                return Err(ConsensusError::Config(format!(
                    "replica name {} must not contain ':'",
                    replica.name
                )));
            }
            if !names.insert(replica.name.as_str()) {
                return Err(ConsensusError::Config(format!(
                    "duplicate replica name {}",
                    replica.name
                )));
            }
        }
        if self.checkpoint_depth == 0 {
            return Err(ConsensusError::Config("checkpoint_depth must be positive".to_string()));
        }
        self.quorum_policy().map(|_| ())
    }

    pub fn quorum_policy(&self) -> Result<QuorumPolicy, ConsensusError> {
        let n = self.replicas.len();
        match self.max_faulty {
            Some(f) => QuorumPolicy::with_faults(n, f),
            None => Ok(QuorumPolicy::for_replicas(n)),
        }
    }
}

impl Default for ClusterConfig {
    /// The four-replica procurement deployment: replicas A-D, f = 1.
    fn default() -> Self {
        let replica = |name: &str, identity: u32, random: u32, p: &str, q: &str, e: &str| ReplicaConfig {
            name: name.to_string(),
            p: big(p),
            q: big(q),
            e: big(e),
            identity: identity.into(),
            random: random.into(),
        };

        ClusterConfig {
            replicas: vec![
                replica(
                    "A",
                    126,
                    621,
                    "1210613765735147311106936311866593978079938707",
                    "1247842850282035753615951347964437248190231863",
                    "815459040813953176289801",
                ),
                replica(
                    "B",
                    127,
                    721,
                    "787435686772982288169641922308628444877260947",
                    "1325305233886096053310340418467385397239375379",
                    "692450682143089563609787",
                ),
                replica(
                    "C",
                    128,
                    821,
                    "1014247300991039444864201518275018240361205111",
                    "904030450302158058469475048755214591704639633",
                    "1158749422015035388438057",
                ),
                replica(
                    "D",
                    129,
                    921,
                    "1287737200891425621338551020762858710281638317",
                    "1330909125725073469794953234151525201084537607",
                    "33981230465225879849295979",
                ),
            ],
            pkg: KeyConfig {
                p: big("1004162036461488639338597000466705179253226703"),
                q: big("950133741151267522116252385927940618264103623"),
                e: big("973028207197278907211"),
            },
            officer: KeyConfig {
                p: big("1080954735722463992988394149602856332100628417"),
                q: big("1158106283320086444890911863299879973542293243"),
                e: big("106506253943651610547613"),
            },
            max_faulty: Some(1),
            checkpoint_depth: DEFAULT_CHECKPOINT_DEPTH,
            harn_enabled: true,
        }
    }
}
