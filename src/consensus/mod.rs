pub mod cluster;
pub mod message;
pub mod outcome;
pub mod peers;
pub mod processor;
pub mod qc;
pub mod quorum;
pub mod shared;
pub mod store;

pub use cluster::*;
pub use message::*;
pub use outcome::*;
pub use peers::*;
pub use processor::*;
pub use qc::*;
pub use quorum::*;
pub use shared::*;
pub use store::*;
