/// ABI word-level (de)serialization helpers
/// shared by the demand codec
pub mod abi;
/// Per-kind demand payload encode/decode functions
pub mod codec;
/// Demands, decoded demand trees, and the
/// recursive resolution algorithm
pub mod demand;
/// Addresses and hashes identifying arbiters,
/// parties, and obligations
pub mod identity;
/// Arbiter identity to decode-function registry
pub mod registry;

pub mod error;
use error::DemandError;

pub use codec::{DemandFields, LogicOp, TimeOp};
pub use demand::{resolve, Demand, DemandNode, MAX_DEMAND_DEPTH};
pub use identity::{Address, Hash};
pub use registry::{ArbiterTable, Decoder, DecoderRegistry};

pub type Result<T> = std::result::Result<T, DemandError>;
