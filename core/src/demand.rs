//! Demands and the recursive demand-tree resolution algorithm.

use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::serde_as;

use crate::codec::DemandFields;
use crate::error::DecodeError;
use crate::identity::Address;
use crate::registry::DecoderRegistry;

/// Depth cap for [`resolve`]. Real trees are shallow (on-chain size and
/// gas limits bound what is economically encodable); the cap turns a
/// pathological or adversarial encoding into a [`DecodeError`] instead of
/// stack exhaustion.
pub const MAX_DEMAND_DEPTH: usize = 32;

/// An unevaluated assertion: `payload`, interpreted per `arbiter`'s
/// schema, must hold for a fulfillment to be accepted.
///
/// Posted on-chain by a demanding party and immutable thereafter; this
/// layer only interprets demands, it never mutates them.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Demand {
    pub arbiter: Address,
    #[serde_as(as = "Hex")]
    pub payload: Vec<u8>,
}

/// One node of a resolved demand tree.
///
/// `children` is present iff the arbiter is a logical composition;
/// leaves carry their typed values in `fields`. Nodes are built fresh by
/// each [`resolve`] call and never cached.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DemandNode {
    pub arbiter: Address,
    pub fields: DemandFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<DemandNode>>,
}

impl DemandNode {
    /// True for terminal nodes whose arbiter was absent from the registry.
    pub fn is_unknown(&self) -> bool {
        matches!(self.fields, DemandFields::Unknown { .. })
    }

    /// Raw payload of an unknown node.
    pub fn raw(&self) -> Option<&[u8]> {
        match &self.fields {
            DemandFields::Unknown { raw } => Some(raw),
            _ => None,
        }
    }
}

/// Resolves a demand into a typed tree.
///
/// Unknown arbiters become terminal unknown nodes carrying the raw
/// payload verbatim: new arbiter kinds appear on-chain before client
/// registries learn about them, and a partial tree is still inspectable.
/// Malformed payloads for *known* arbiters fail with a [`DecodeError`].
/// Children preserve the source array order; that order carries the
/// AND/OR evaluation semantics on-chain.
pub fn resolve(demand: &Demand, registry: &DecoderRegistry) -> Result<DemandNode, DecodeError> {
    resolve_at(demand, registry, 0)
}

fn resolve_at(
    demand: &Demand,
    registry: &DecoderRegistry,
    depth: usize,
) -> Result<DemandNode, DecodeError> {
    if depth >= MAX_DEMAND_DEPTH {
        return Err(DecodeError::DepthExceeded(MAX_DEMAND_DEPTH));
    }

    let decoder = match registry.resolve(&demand.arbiter) {
        Some(decoder) => decoder,
        None => {
            return Ok(DemandNode {
                arbiter: demand.arbiter,
                fields: DemandFields::Unknown {
                    raw: demand.payload.clone(),
                },
                children: None,
            });
        }
    };

    let fields = decoder(&demand.payload)?;
    let children = match &fields {
        DemandFields::Logical { branches, .. } => {
            let mut nodes = Vec::with_capacity(branches.len());
            for branch in branches {
                nodes.push(resolve_at(branch, registry, depth + 1)?);
            }
            Some(nodes)
        }
        _ => None,
    };

    Ok(DemandNode {
        arbiter: demand.arbiter,
        fields,
        children,
    })
}
