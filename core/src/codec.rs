//! Per-kind encode/decode of atomic and composing demand payloads.
//!
//! Each deployed arbiter kind fixes one payload schema. `decode_*` and
//! [`DemandFields::encode`] are mutual inverses: `decode(encode(x)) == x`
//! for every valid `x`, and decoding fails with a [`DecodeError`] on
//! truncated or structurally malformed input. All functions are pure.

use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::serde_as;

use crate::abi::{Reader, Writer, WORD};
use crate::demand::Demand;
use crate::error::DecodeError;
use crate::identity::{Address, Hash};

/// Direction of a timestamp comparison arbiter.
///
/// Three distinct deployed kinds share the single `(uint256)` payload
/// shape; only the on-chain comparison differs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeOp {
    After,
    Before,
    Equal,
}

/// Boolean composition operator of a logical arbiter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogicOp {
    /// Every sub-demand must hold (AND).
    All,
    /// At least one sub-demand must hold (OR).
    Any,
}

/// Typed decode result of one demand payload.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum DemandFields {
    /// Address equality: `(address)`.
    Address { address: Address },
    /// Hash equality: `(bytes32)`.
    Hash { hash: Hash },
    /// Flag equality: `(bool)`.
    Flag { flag: bool },
    /// Timestamp comparison: `(uint256)` seconds.
    Time { op: TimeOp, timestamp: u64 },
    /// Oracle-delegated check: `(address oracle, bytes data)`. The inner
    /// `data` blob is opaque here; the oracle echoes it back when it
    /// submits a decision.
    Oracle {
        oracle: Address,
        #[serde_as(as = "Hex")]
        data: Vec<u8>,
    },
    /// Logical composition: `(address[] arbiters, bytes[] demands)`,
    /// order-significant and length-matched, zipped into sub-demands at
    /// decode time.
    Logical { op: LogicOp, branches: Vec<Demand> },
    /// Arbiter absent from the registry; raw payload kept verbatim.
    Unknown {
        #[serde_as(as = "Hex")]
        raw: Vec<u8>,
    },
}

impl DemandFields {
    /// Canonical payload bytes for this value; the inverse of the
    /// matching `decode_*` function.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Address { address } => {
                let mut w = Writer::new();
                w.push_address(address);
                w.finish()
            }
            Self::Hash { hash } => {
                let mut w = Writer::new();
                w.push_hash(hash);
                w.finish()
            }
            Self::Flag { flag } => {
                let mut w = Writer::new();
                w.push_bool(*flag);
                w.finish()
            }
            Self::Time { timestamp, .. } => {
                let mut w = Writer::new();
                w.push_uint(*timestamp);
                w.finish()
            }
            Self::Oracle { oracle, data } => {
                let mut w = Writer::new();
                w.push_address(oracle);
                w.push_uint((2 * WORD) as u64);
                w.push_bytes_tail(data);
                w.finish()
            }
            Self::Logical { branches, .. } => encode_branches(branches),
            Self::Unknown { raw } => raw.clone(),
        }
    }
}

impl std::fmt::Display for DemandFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", json)
    }
}

/// Decodes an `(address)` equality payload.
pub fn decode_address(payload: &[u8]) -> Result<DemandFields, DecodeError> {
    let r = Reader::new(payload)?;
    r.expect_words(1)?;
    Ok(DemandFields::Address {
        address: r.address(0)?,
    })
}

/// Decodes a `(bytes32)` equality payload.
pub fn decode_hash(payload: &[u8]) -> Result<DemandFields, DecodeError> {
    let r = Reader::new(payload)?;
    r.expect_words(1)?;
    Ok(DemandFields::Hash { hash: r.hash(0)? })
}

/// Decodes a `(bool)` equality payload.
pub fn decode_flag(payload: &[u8]) -> Result<DemandFields, DecodeError> {
    let r = Reader::new(payload)?;
    r.expect_words(1)?;
    Ok(DemandFields::Flag { flag: r.bool(0)? })
}

/// Decodes a `(uint256)` timestamp payload for the given comparison kind.
pub fn decode_time(op: TimeOp, payload: &[u8]) -> Result<DemandFields, DecodeError> {
    let r = Reader::new(payload)?;
    r.expect_words(1)?;
    Ok(DemandFields::Time {
        op,
        timestamp: r.uint64(0)?,
    })
}

fn decode_oracle_parts(payload: &[u8]) -> Result<(Address, Vec<u8>), DecodeError> {
    let r = Reader::new(payload)?;
    let oracle = r.address(0)?;
    let data = r.bytes_at(r.usize_word(1)?)?;
    Ok((oracle, data))
}

/// Decodes an `(address oracle, bytes data)` oracle-delegated payload.
pub fn decode_oracle(payload: &[u8]) -> Result<DemandFields, DecodeError> {
    let (oracle, data) = decode_oracle_parts(payload)?;
    Ok(DemandFields::Oracle { oracle, data })
}

/// Extracts the inner blob an oracle must echo back when submitting its
/// decision. The on-chain check recomputes a hash over the obligation and
/// this inner payload, so submitting the outer wrapper instead would be
/// rejected. An empty wrapper stands for an empty inner payload.
pub fn oracle_inner(payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    decode_oracle_parts(payload).map(|(_, data)| data)
}

/// Decodes an `(address[] arbiters, bytes[] demands)` composition payload,
/// zipping the parallel arrays into ordered sub-demands.
pub fn decode_logical(op: LogicOp, payload: &[u8]) -> Result<DemandFields, DecodeError> {
    let r = Reader::new(payload)?;
    let arbiters = r.region(r.usize_word(0)?)?;
    let demands = r.region(r.usize_word(1)?)?;

    let n_arbiters = arbiters.usize_word(0)?;
    let n_demands = demands.usize_word(0)?;
    if n_arbiters != n_demands {
        return Err(DecodeError::LengthMismatch {
            arbiters: n_arbiters,
            demands: n_demands,
        });
    }
    // An honest count fits in its own region; reject before allocating.
    // Comparing counts against the region word count cannot overflow.
    if n_arbiters > arbiters.len() / WORD {
        return Err(DecodeError::Truncated {
            need: n_arbiters.saturating_mul(WORD),
            have: arbiters.len(),
        });
    }

    let mut branches = Vec::with_capacity(n_arbiters);
    for i in 0..n_arbiters {
        let arbiter = arbiters.address(1 + i)?;
        let rel = demands.usize_word(1 + i)?;
        let offset = rel
            .checked_add(WORD)
            .ok_or(DecodeError::OffsetOutOfBounds(rel))?;
        let payload = demands.bytes_at(offset)?;
        branches.push(Demand { arbiter, payload });
    }
    Ok(DemandFields::Logical { op, branches })
}

fn encode_branches(branches: &[Demand]) -> Vec<u8> {
    let n = branches.len();
    let arbiters_offset = 2 * WORD;
    let arbiters_block = WORD * (1 + n);

    let mut w = Writer::new();
    w.push_uint(arbiters_offset as u64);
    w.push_uint((arbiters_offset + arbiters_block) as u64);

    w.push_uint(n as u64);
    for branch in branches {
        w.push_address(&branch.arbiter);
    }

    w.push_uint(n as u64);
    let mut rel = n * WORD;
    for branch in branches {
        w.push_uint(rel as u64);
        rel += WORD + crate::abi::padded_len(branch.payload.len());
    }
    for branch in branches {
        w.push_bytes_tail(&branch.payload);
    }
    w.finish()
}
