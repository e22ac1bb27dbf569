#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Node {node} is not the primary for this view (primary is {primary})")]
    NotPrimary { node: String, primary: String },
    #[error("Only the next primary ({expected}) can initiate the view change, not {node}")]
    NotNextPrimary { node: String, expected: String },
    #[error("Item not found: {0}")]
    ItemNotFound(String),
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ConsensusError {
    pub fn unknown_node(node: &str) -> Self {
        ConsensusError::InvalidInput(format!("unknown node {node}"))
    }
}
