pub mod common;
pub mod consensus;
pub mod ledger;
pub mod network;
pub mod reporting;

pub use common::{config::ClusterConfig, error::ConsensusError};
pub use consensus::{ConsensusCluster, SharedCluster};
