use thiserror::Error;

/// Demand-model errors.
#[derive(Debug, Error, PartialEq)]
pub enum DemandError {
    #[error("decode error: {0}")]
    Decode(DecodeError),

    #[error("identity error: {0}")]
    Identity(IdentityError),
}

/// Errors decoding a payload for a *known* arbiter kind.
///
/// An arbiter missing from the registry is not an error; the resolver
/// degrades it to a terminal unknown node instead.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("payload truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("payload length {0} is not a multiple of the 32-byte word size")]
    Misaligned(usize),

    #[error("payload has {actual} bytes, schema expects {expected}")]
    UnexpectedLength { expected: usize, actual: usize },

    #[error("dynamic data offset {0} is out of bounds")]
    OffsetOutOfBounds(usize),

    #[error("non-zero padding in {0} word")]
    DirtyPadding(&'static str),

    #[error("boolean word must be 0 or 1")]
    InvalidBool,

    #[error("timestamp exceeds u64 range")]
    TimestampOverflow,

    #[error("arbiter and demand arrays differ in length ({arbiters} vs {demands})")]
    LengthMismatch { arbiters: usize, demands: usize },

    #[error("demand tree exceeds maximum depth {0}")]
    DepthExceeded(usize),
}

/// Errors that might occur while parsing an [`Address`](crate::Address)
/// or [`Hash`](crate::Hash) from text.
#[derive(Debug, Error, PartialEq)]
pub enum IdentityError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("cannot parse identity from empty string")]
    EmptyIdentity,
}

impl From<DecodeError> for DemandError {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<IdentityError> for DemandError {
    fn from(value: IdentityError) -> Self {
        Self::Identity(value)
    }
}
