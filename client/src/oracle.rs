//! Oracle arbitration workflow engine.
//!
//! Discovers arbitration requests addressed to one oracle identity,
//! invokes a caller-supplied decision callback per request, and submits
//! each verdict on-chain. Three temporal shapes are supported through
//! [`ArbitrationMode`]: historical-only, historical-then-live, and
//! live-only, with optional deduplication against decisions already
//! recorded on-chain.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use ethers::abi::{self, RawLog, Token};
use ethers::contract::{EthEvent, EthLogDecode};
use ethers::types::{Address, Bytes, Filter, Log, H256, U64};
use ethers::utils::id;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use covenant_core::codec;
use covenant_core::error::DecodeError;
use covenant_core::{Demand, DemandFields, DemandNode, DecoderRegistry};

use crate::chain::ChainAccess;
use crate::error::{ClientError, Result};
use crate::events::{EventSource, Subscription};

// On-chain decision submission.
const ARBITRATE: &str = "arbitrate(bytes32,bytes,bool)";

/// ABI for the `ArbitrationRequested` event
#[derive(Clone, Debug, EthEvent)]
#[ethevent(
    name = "ArbitrationRequested",
    abi = "ArbitrationRequested(
    bytes32 indexed obligation,
    address indexed oracle,
    bytes demand)"
)]
pub struct ArbitrationRequestedEvent {
    pub obligation: H256,
    pub oracle: Address,
    pub demand: Bytes,
}

/// ABI for the `ArbitrationMade` event
#[derive(Clone, Debug, EthEvent)]
#[ethevent(
    name = "ArbitrationMade",
    abi = "ArbitrationMade(
    bytes32 indexed obligation,
    address indexed oracle,
    bool decision)"
)]
pub struct ArbitrationMadeEvent {
    pub obligation: H256,
    pub oracle: Address,
    pub decision: bool,
}

/// Which requests one engine run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationMode {
    /// All historical requests; no live listening.
    Past,
    /// As [`Past`](Self::Past), minus requests this oracle has already
    /// decided on-chain. Safe to re-run after a crash.
    PastUnarbitrated,
    /// Historical first, then keep listening until cancelled.
    All,
    /// Only requests observed after the call.
    Future,
}

impl ArbitrationMode {
    fn includes_past(self) -> bool {
        !matches!(self, Self::Future)
    }

    fn includes_live(self) -> bool {
        matches!(self, Self::All | Self::Future)
    }
}

/// `Some(verdict)` to decide, `None` to leave the request unanswered.
pub type Verdict = Option<bool>;

/// Everything a decision callback gets to see for one request.
#[derive(Debug, Clone)]
pub struct ObligationContext {
    pub obligation: H256,
    /// Oracle the request is addressed to (this engine's identity).
    pub oracle: Address,
    /// Raw embedded demand bytes carried by the triggering event.
    pub demand: Vec<u8>,
    /// Inner payload unwrapped from the oracle-delegated demand; echoed
    /// back verbatim on submission.
    pub inner: Vec<u8>,
    /// Resolved demand tree for inspection.
    pub node: DemandNode,
}

/// Caller-supplied decision logic. May perform its own I/O; a returned
/// error is recorded for that one request and never stops the run.
#[async_trait::async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, ctx: &ObligationContext) -> anyhow::Result<Verdict>;
}

#[async_trait::async_trait]
impl<F> Decider for F
where
    F: Fn(&ObligationContext) -> anyhow::Result<Verdict> + Send + Sync,
{
    async fn decide(&self, ctx: &ObligationContext) -> anyhow::Result<Verdict> {
        (self)(ctx)
    }
}

/// Terminal state of one request within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Decision submitted and confirmed.
    Decided { decision: bool, tx_hash: H256 },
    /// Callback declined to answer; nothing submitted.
    Skipped,
    /// Embedded demand bytes were malformed for this known arbiter.
    DecodeFailed(String),
    /// Callback returned an error.
    CallbackFailed(String),
    /// Transaction failed to send, was dropped, or reverted.
    SubmissionFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbitrationOutcome {
    pub obligation: H256,
    pub status: OutcomeStatus,
}

type SharedOutcomes = Arc<Mutex<Vec<ArbitrationOutcome>>>;

fn lock_outcomes(outcomes: &SharedOutcomes) -> MutexGuard<'_, Vec<ArbitrationOutcome>> {
    outcomes
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Result of one [`OracleEngine::arbitrate`] call.
///
/// For live modes the run stays open: outcomes keep accumulating as new
/// requests arrive, and [`cancel`](Self::cancel) stops further delivery
/// without interrupting decisions already in flight.
pub struct ArbitrationRun {
    outcomes: SharedOutcomes,
    subscription: Option<Subscription>,
}

impl ArbitrationRun {
    /// Snapshot of all outcomes recorded so far.
    pub fn outcomes(&self) -> Vec<ArbitrationOutcome> {
        lock_outcomes(&self.outcomes).clone()
    }

    /// Number of confirmed decisions.
    pub fn decided_count(&self) -> usize {
        lock_outcomes(&self.outcomes)
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Decided { .. }))
            .count()
    }

    /// Outcomes that failed, so operators can re-run in
    /// [`ArbitrationMode::PastUnarbitrated`] to pick them up.
    pub fn failures(&self) -> Vec<ArbitrationOutcome> {
        lock_outcomes(&self.outcomes)
            .iter()
            .filter(|o| {
                matches!(
                    o.status,
                    OutcomeStatus::DecodeFailed(_)
                        | OutcomeStatus::CallbackFailed(_)
                        | OutcomeStatus::SubmissionFailed(_)
                )
            })
            .cloned()
            .collect()
    }

    pub fn is_live(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    /// Stops live delivery. No-op for historical-only runs.
    pub fn cancel(&self) {
        if let Some(subscription) = &self.subscription {
            subscription.cancel();
        }
    }
}

enum Step {
    Submitted(PendingDecision),
    Settled(ArbitrationOutcome),
}

struct PendingDecision {
    obligation: H256,
    decision: bool,
    tx_hash: H256,
}

/// Arbitration engine bound to one trusted-oracle arbiter deployment and
/// one oracle identity.
pub struct OracleEngine<C: ChainAccess> {
    chain: Arc<C>,
    source: EventSource<C>,
    arbiter: Address,
    oracle: Address,
    registry: Arc<DecoderRegistry>,
}

impl<C: ChainAccess> Clone for OracleEngine<C> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            source: self.source.clone(),
            arbiter: self.arbiter,
            oracle: self.oracle,
            registry: self.registry.clone(),
        }
    }
}

impl<C: ChainAccess> OracleEngine<C> {
    /// Fails fast on unresolvable identities, before any I/O.
    pub fn new(
        chain: Arc<C>,
        arbiter: Address,
        oracle: Address,
        registry: Arc<DecoderRegistry>,
    ) -> Result<Self> {
        if arbiter.is_zero() {
            return Err(ClientError::Configuration(
                "trusted-oracle arbiter address is zero".into(),
            ));
        }
        if oracle.is_zero() {
            return Err(ClientError::Configuration(
                "oracle identity address is zero".into(),
            ));
        }
        Ok(Self {
            source: EventSource::new(chain.clone(), arbiter),
            chain,
            arbiter,
            oracle,
            registry,
        })
    }

    pub fn oracle(&self) -> Address {
        self.oracle
    }

    /// Runs one arbitration pass in the given mode.
    ///
    /// Historical requests are decided and submitted sequentially (one
    /// submitting identity issuing concurrent transactions races its own
    /// ordering), then all confirmation waits fan out concurrently. In
    /// live modes each delivered batch is processed concurrently within
    /// the batch, batches in arrival order.
    pub async fn arbitrate<D>(&self, decider: D, mode: ArbitrationMode) -> Result<ArbitrationRun>
    where
        D: Decider + 'static,
    {
        let decider: Arc<dyn Decider> = Arc::new(decider);
        let outcomes: SharedOutcomes = Arc::new(Mutex::new(Vec::new()));

        // The subscription opens before any historical read so a request
        // landing between the two is buffered on the stream instead of
        // falling into neither set.
        let live = if mode.includes_live() {
            Some(self.source.subscribe(self.request_filter()).await?)
        } else {
            None
        };

        if mode.includes_past() {
            let requests = self
                .discover_past(mode == ArbitrationMode::PastUnarbitrated)
                .await?;
            info!(
                count = requests.len(),
                ?mode,
                "Processing historical arbitration requests"
            );
            self.process_past(&requests, decider.as_ref(), &outcomes)
                .await;
        }

        let subscription = match live {
            Some((subscription, stream)) => {
                // Requests the historical pass already settled may also
                // arrive on the stream; the listener drops them.
                let handled: HashSet<H256> = lock_outcomes(&outcomes)
                    .iter()
                    .map(|outcome| outcome.obligation)
                    .collect();
                self.spawn_listener(stream, decider, outcomes.clone(), handled);
                Some(subscription)
            }
            None => None,
        };

        Ok(ArbitrationRun {
            outcomes,
            subscription,
        })
    }

    fn request_filter(&self) -> Filter {
        Filter::new()
            .topic0(ArbitrationRequestedEvent::signature())
            .topic2(address_topic(self.oracle))
    }

    /// Historical requests addressed to this oracle, optionally minus the
    /// obligations it has already decided on-chain. "Already decided" is
    /// recomputed from decision events each run; no local state.
    async fn discover_past(&self, skip_decided: bool) -> Result<Vec<ArbitrationRequestedEvent>> {
        let logs = self.source.read_past(self.request_filter(), 0, None).await?;
        let mut requests: Vec<_> = logs.iter().filter_map(parse_request).collect();

        if skip_decided {
            let decided = self.decided_obligations().await?;
            requests.retain(|request| !decided.contains(&request.obligation));
            debug!(
                remaining = requests.len(),
                decided = decided.len(),
                "Filtered already-arbitrated requests"
            );
        }
        Ok(requests)
    }

    async fn decided_obligations(&self) -> Result<HashSet<H256>> {
        let filter = Filter::new()
            .topic0(ArbitrationMadeEvent::signature())
            .topic2(address_topic(self.oracle));
        let logs = self.source.read_past(filter, 0, None).await?;
        Ok(logs
            .iter()
            .filter_map(|log| {
                let raw = RawLog {
                    topics: log.topics.clone(),
                    data: log.data.to_vec(),
                };
                <ArbitrationMadeEvent as EthLogDecode>::decode_log(&raw).ok()
            })
            .map(|event| event.obligation)
            .collect())
    }

    async fn process_past(
        &self,
        requests: &[ArbitrationRequestedEvent],
        decider: &dyn Decider,
        outcomes: &SharedOutcomes,
    ) {
        let mut pending = Vec::new();
        for request in requests {
            match self.decide_and_submit(request, decider).await {
                Step::Submitted(decision) => pending.push(decision),
                Step::Settled(outcome) => lock_outcomes(outcomes).push(outcome),
            }
        }

        let waits = pending
            .into_iter()
            .map(|decision| self.confirm_decision(decision));
        for outcome in join_all(waits).await {
            lock_outcomes(outcomes).push(outcome);
        }
    }

    /// Full pipeline for one live request: decide, submit, confirm.
    async fn handle_request(
        &self,
        request: &ArbitrationRequestedEvent,
        decider: &dyn Decider,
    ) -> ArbitrationOutcome {
        match self.decide_and_submit(request, decider).await {
            Step::Submitted(decision) => self.confirm_decision(decision).await,
            Step::Settled(outcome) => outcome,
        }
    }

    async fn decide_and_submit(
        &self,
        request: &ArbitrationRequestedEvent,
        decider: &dyn Decider,
    ) -> Step {
        let obligation = request.obligation;
        let ctx = match self.obligation_context(request) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(?obligation, error = %e, "Embedded demand is malformed");
                return Step::Settled(ArbitrationOutcome {
                    obligation,
                    status: OutcomeStatus::DecodeFailed(e.to_string()),
                });
            }
        };

        let decision = match decider.decide(&ctx).await {
            Ok(Some(decision)) => decision,
            Ok(None) => {
                debug!(?obligation, "Callback skipped request");
                return Step::Settled(ArbitrationOutcome {
                    obligation,
                    status: OutcomeStatus::Skipped,
                });
            }
            Err(e) => {
                warn!(?obligation, error = %e, "Decision callback failed");
                return Step::Settled(ArbitrationOutcome {
                    obligation,
                    status: OutcomeStatus::CallbackFailed(e.to_string()),
                });
            }
        };

        // Submission echoes the unwrapped inner payload: the on-chain
        // check hashes (obligation, innerPayload) and rejects the outer
        // wrapper.
        let data = arbitrate_calldata(obligation, &ctx.inner, decision);
        info!(?obligation, decision, "Submitting arbitration decision");
        match self.chain.send_transaction(self.arbiter, data).await {
            Ok(tx_hash) => Step::Submitted(PendingDecision {
                obligation,
                decision,
                tx_hash,
            }),
            Err(e) => Step::Settled(ArbitrationOutcome {
                obligation,
                status: OutcomeStatus::SubmissionFailed(e.to_string()),
            }),
        }
    }

    async fn confirm_decision(&self, pending: PendingDecision) -> ArbitrationOutcome {
        let PendingDecision {
            obligation,
            decision,
            tx_hash,
        } = pending;
        match self.chain.wait_for_receipt(tx_hash).await {
            Ok(receipt) if receipt.status == Some(U64::from(1)) => {
                info!(?obligation, ?tx_hash, "Arbitration decision confirmed");
                ArbitrationOutcome {
                    obligation,
                    status: OutcomeStatus::Decided { decision, tx_hash },
                }
            }
            Ok(_) => ArbitrationOutcome {
                obligation,
                status: OutcomeStatus::SubmissionFailed(format!(
                    "transaction {tx_hash:?} reverted"
                )),
            },
            Err(e) => ArbitrationOutcome {
                obligation,
                status: OutcomeStatus::SubmissionFailed(e.to_string()),
            },
        }
    }

    fn spawn_listener(
        &self,
        mut stream: mpsc::Receiver<Vec<Log>>,
        decider: Arc<dyn Decider>,
        outcomes: SharedOutcomes,
        handled: HashSet<H256>,
    ) {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(batch) = stream.recv().await {
                let requests: Vec<_> = batch
                    .iter()
                    .filter_map(parse_request)
                    .filter(|request| !handled.contains(&request.obligation))
                    .collect();
                debug!(count = requests.len(), "Live arbitration batch");
                let pipelines = requests
                    .iter()
                    .map(|request| engine.handle_request(request, decider.as_ref()));
                for outcome in join_all(pipelines).await {
                    lock_outcomes(&outcomes).push(outcome);
                }
            }
            debug!("Arbitration listener stopped");
        });
    }

    fn obligation_context(
        &self,
        request: &ArbitrationRequestedEvent,
    ) -> std::result::Result<ObligationContext, DecodeError> {
        let demand = request.demand.to_vec();
        let inner = codec::oracle_inner(&demand)?;
        // A payload-free request carries no tree to resolve; it still
        // reaches the callback with empty inner bytes.
        let node = if demand.is_empty() {
            DemandNode {
                arbiter: covenant_core::Address::from(self.arbiter.0),
                fields: DemandFields::Unknown { raw: Vec::new() },
                children: None,
            }
        } else {
            covenant_core::resolve(
                &Demand {
                    arbiter: covenant_core::Address::from(self.arbiter.0),
                    payload: demand.clone(),
                },
                &self.registry,
            )?
        };
        Ok(ObligationContext {
            obligation: request.obligation,
            oracle: request.oracle,
            demand,
            inner,
            node,
        })
    }
}

fn parse_request(log: &Log) -> Option<ArbitrationRequestedEvent> {
    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    match <ArbitrationRequestedEvent as EthLogDecode>::decode_log(&raw) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Skipping undecodable arbitration log");
            None
        }
    }
}

/// Calldata for `arbitrate(bytes32,bytes,bool)`.
fn arbitrate_calldata(obligation: H256, inner: &[u8], decision: bool) -> Bytes {
    let args = abi::encode(&[
        Token::FixedBytes(obligation.as_bytes().to_vec()),
        Token::Bytes(inner.to_vec()),
        Token::Bool(decision),
    ]);
    let mut data = id(ARBITRATE).to_vec();
    data.extend_from_slice(&args);
    data.into()
}

/// An address left-padded into an event topic word.
pub fn address_topic(address: Address) -> H256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    H256(word)
}
