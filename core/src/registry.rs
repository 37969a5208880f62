//! Arbiter identity to decode-function registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::{self, DemandFields, LogicOp, TimeOp};
use crate::error::DecodeError;
use crate::identity::Address;

/// A registered payload decoder for one deployed arbiter.
pub type Decoder = Arc<dyn Fn(&[u8]) -> Result<DemandFields, DecodeError> + Send + Sync>;

/// Deployed addresses of the built-in arbiter kinds.
///
/// One deployment per kind; absent entries simply leave that kind
/// unregistered, so resolution degrades to unknown nodes rather than
/// failing. Loaded from deployment config JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArbiterTable {
    /// Logical AND composition.
    pub all_of: Option<Address>,
    /// Logical OR composition.
    pub any_of: Option<Address>,
    /// Oracle-delegated check.
    pub trusted_oracle: Option<Address>,
    pub address_equal: Option<Address>,
    pub hash_equal: Option<Address>,
    pub flag_equal: Option<Address>,
    pub time_after: Option<Address>,
    pub time_before: Option<Address>,
    pub time_equal: Option<Address>,
}

/// Mapping from arbiter identity to payload decoder.
///
/// Read-only after construction; share it behind an `Arc` across
/// concurrent resolutions.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<Address, Decoder>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a deployment table. Pure and infallible:
    /// absent and zero-valued addresses are skipped, leaving those kinds
    /// to decode as unknown nodes.
    pub fn from_table(table: &ArbiterTable) -> Self {
        let mut registry = Self::new();
        let mut add = |slot: &Option<Address>, decoder: Decoder| {
            if let Some(arbiter) = slot {
                if !arbiter.is_zero() {
                    registry.decoders.insert(*arbiter, decoder);
                }
            }
        };

        add(&table.all_of, Arc::new(|p| codec::decode_logical(LogicOp::All, p)));
        add(&table.any_of, Arc::new(|p| codec::decode_logical(LogicOp::Any, p)));
        add(&table.trusted_oracle, Arc::new(codec::decode_oracle));
        add(&table.address_equal, Arc::new(codec::decode_address));
        add(&table.hash_equal, Arc::new(codec::decode_hash));
        add(&table.flag_equal, Arc::new(codec::decode_flag));
        add(&table.time_after, Arc::new(|p| codec::decode_time(TimeOp::After, p)));
        add(&table.time_before, Arc::new(|p| codec::decode_time(TimeOp::Before, p)));
        add(&table.time_equal, Arc::new(|p| codec::decode_time(TimeOp::Equal, p)));
        registry
    }

    /// Inserts or overwrites the decoder for `arbiter`.
    pub fn register(&mut self, arbiter: Address, decoder: Decoder) {
        self.decoders.insert(arbiter, decoder);
    }

    /// Convenience for registering a plain closure or function.
    pub fn register_fn<F>(&mut self, arbiter: Address, decoder: F)
    where
        F: Fn(&[u8]) -> Result<DemandFields, DecodeError> + Send + Sync + 'static,
    {
        self.register(arbiter, Arc::new(decoder));
    }

    /// The decoder registered for `arbiter`, if any.
    pub fn resolve(&self, arbiter: &Address) -> Option<&Decoder> {
        self.decoders.get(arbiter)
    }

    pub fn contains(&self, arbiter: &Address) -> bool {
        self.decoders.contains_key(arbiter)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("arbiters", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}
