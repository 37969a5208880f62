//! Covenant client: event discovery and the oracle arbitration engine.
//!
//! Binds one oracle identity to one trusted-oracle arbiter deployment,
//! discovers arbitration requests from chain history and/or a live event
//! stream, invokes caller-supplied decision logic, and submits verdicts
//! on-chain with per-request failure isolation. The demand model itself
//! lives in `covenant-core`; everything chain-shaped goes through the
//! [`ChainAccess`] boundary so the whole workflow runs against an
//! in-process fake in tests.

pub use error::{ClientError, Result};

/// Chain-access boundary and the JSON-RPC implementation
pub mod chain;
/// Confirmation-predicate client (payload-free arbiters)
pub mod confirmation;
/// Historical reads and cancellable live subscriptions
pub mod events;
/// The oracle arbitration workflow engine
pub mod oracle;

pub mod error;

pub use chain::{ChainAccess, ChainConfig, RpcChain, TransportKind};
pub use confirmation::{ConfirmationClient, ConfirmationPolicy, ConfirmationRecord};
pub use events::{EventSource, Subscription};
pub use oracle::{
    ArbitrationMode, ArbitrationOutcome, ArbitrationRun, Decider, ObligationContext, OracleEngine,
    OutcomeStatus, Verdict,
};
