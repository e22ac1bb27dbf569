use std::sync::Arc;

use num_bigint::BigUint;
use tokio::sync::{Mutex, MutexGuard};

use super::{cluster::ConsensusCluster, outcome::*};
use crate::common::error::ConsensusError;
use crate::reporting::DecryptedPayload;

/// Cloneable async handle. Callers are serialized on one lock, so every
/// operation runs as a single logical step against the cluster.
#[derive(Clone)]
pub struct SharedCluster {
    inner: Arc<Mutex<ConsensusCluster>>,
}

impl SharedCluster {
    pub fn new(cluster: ConsensusCluster) -> Self {
        SharedCluster {
            inner: Arc::new(Mutex::new(cluster)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, ConsensusCluster> {
        self.inner.lock().await
    }

    pub async fn submit_record(&self, node: &str, record: &str) -> Result<RecordOutcome, ConsensusError> {
        self.inner.lock().await.submit_record(node, record)
    }

    pub async fn submit_with_verifications(
        &self,
        node: &str,
        record: &str,
    ) -> Result<VerificationOutcome, ConsensusError> {
        self.inner.lock().await.submit_with_verifications(node, record)
    }

    pub async fn query_status(&self, node: &str, sequence: u64) -> Result<StatusReport, ConsensusError> {
        self.inner.lock().await.query_status(node, sequence)
    }

    pub async fn initiate_view_change(&self, node: &str, new_view: u64) -> Result<ViewChange, ConsensusError> {
        self.inner.lock().await.initiate_view_change(node, new_view)
    }

    pub async fn query_item(&self, node: &str, item_id: Option<&str>) -> Result<ItemQuery, ConsensusError> {
        self.inner.lock().await.query_item(node, item_id)
    }

    pub async fn verify_query(&self, item_id: &str) -> Result<VerifiedQuery, ConsensusError> {
        self.inner.lock().await.verify_query(item_id)
    }

    pub async fn decrypt_envelope(&self, ciphertext: &str) -> Result<DecryptedPayload, ConsensusError> {
        self.inner.lock().await.decrypt_envelope(ciphertext)
    }

    pub async fn identity_encrypt(&self, node: &str, message: &str) -> Result<BigUint, ConsensusError> {
        self.inner.lock().await.identity_encrypt(node, message)
    }

    pub async fn identity_decrypt(&self, node: &str, ciphertext: &str) -> Result<DecryptedPayload, ConsensusError> {
        self.inner.lock().await.identity_decrypt(node, ciphertext)
    }

    pub async fn system_status(&self) -> SystemStatus {
        self.inner.lock().await.system_status()
    }

    pub async fn node_info(&self) -> NodeInfo {
        self.inner.lock().await.node_info()
    }
}
