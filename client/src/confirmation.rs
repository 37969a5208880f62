//! Thin client for the mapping-based confirmation predicate family.
//!
//! Confirmation arbiters carry no demand payload: they track a
//! fulfillment → escrow → confirmed relation on-chain. Four deployed
//! variants differ only along the exclusivity and revocability policy
//! axes; all share one interface, so this client works against any of
//! them and records which policy it was pointed at.

use std::sync::Arc;

use ethers::abi::{self, ParamType, RawLog, Token};
use ethers::contract::{EthEvent, EthLogDecode};
use ethers::types::{Address, Bytes, Filter, H256, U64};
use ethers::utils::id;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::ChainAccess;
use crate::error::{ClientError, Result};
use crate::events::EventSource;

// On-chain confirmation operations.
const CONFIRM: &str = "confirm(bytes32)";
const REQUEST_CONFIRMATION: &str = "requestConfirmation(bytes32)";
const IS_CONFIRMED: &str = "isConfirmed(bytes32)";
const IS_ESCROW_CONFIRMED: &str = "isEscrowConfirmed(bytes32)";

/// ABI for the `ConfirmationMade` event
#[derive(Clone, Debug, EthEvent)]
#[ethevent(
    name = "ConfirmationMade",
    abi = "ConfirmationMade(
    bytes32 indexed fulfillment,
    bytes32 indexed escrow)"
)]
pub struct ConfirmationMadeEvent {
    pub fulfillment: H256,
    pub escrow: H256,
}

/// Policy axes distinguishing the four confirmation-arbiter deployments:
/// whether multiple fulfillments may be confirmed per escrow, and whether
/// a confirmation can be undone.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub exclusive: bool,
    pub revocable: bool,
}

/// A recorded confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRecord {
    pub fulfillment: H256,
    pub escrow: H256,
    pub confirmed: bool,
}

/// Client bound to one confirmation-arbiter deployment.
pub struct ConfirmationClient<C: ChainAccess> {
    chain: Arc<C>,
    source: EventSource<C>,
    address: Address,
    policy: ConfirmationPolicy,
}

impl<C: ChainAccess> ConfirmationClient<C> {
    pub fn new(chain: Arc<C>, address: Address, policy: ConfirmationPolicy) -> Result<Self> {
        if address.is_zero() {
            return Err(ClientError::Configuration(
                "confirmation arbiter address is zero".into(),
            ));
        }
        Ok(Self {
            source: EventSource::new(chain.clone(), address),
            chain,
            address,
            policy,
        })
    }

    pub fn policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    /// Confirms a fulfillment, returning the confirming transaction hash.
    pub async fn confirm(&self, fulfillment: H256) -> Result<H256> {
        info!(?fulfillment, "Sending confirm transaction");
        self.send_checked(CONFIRM, fulfillment).await
    }

    /// Asks the counterparty for a confirmation of `fulfillment`.
    pub async fn request_confirmation(&self, fulfillment: H256) -> Result<H256> {
        info!(?fulfillment, "Sending requestConfirmation transaction");
        self.send_checked(REQUEST_CONFIRMATION, fulfillment).await
    }

    /// Whether `fulfillment` has been confirmed.
    pub async fn is_confirmed(&self, fulfillment: H256) -> Result<bool> {
        self.query_flag(IS_CONFIRMED, fulfillment).await
    }

    /// Whether any fulfillment has been confirmed against `escrow`.
    pub async fn is_escrow_confirmed(&self, escrow: H256) -> Result<bool> {
        self.query_flag(IS_ESCROW_CONFIRMED, escrow).await
    }

    /// Waits for `fulfillment` to be confirmed: opens a subscription,
    /// checks history from `from_block`, and falls back to the live
    /// stream until the confirmation event arrives.
    pub async fn wait_for_confirmation(
        &self,
        fulfillment: H256,
        from_block: u64,
    ) -> Result<ConfirmationRecord> {
        let filter = Filter::new()
            .topic0(ConfirmationMadeEvent::signature())
            .topic1(fulfillment);

        // Subscribe before reading history so a confirmation landing
        // between the two is buffered rather than missed.
        let (subscription, mut stream) = self.source.subscribe(filter.clone()).await?;

        let past = self.source.read_past(filter, from_block, None).await?;
        if let Some(event) = past.iter().filter_map(parse_confirmation).next() {
            subscription.cancel();
            debug!(?fulfillment, "Confirmation found in history");
            return Ok(record(event));
        }

        while let Some(batch) = stream.recv().await {
            if let Some(event) = batch.iter().filter_map(parse_confirmation).next() {
                subscription.cancel();
                debug!(?fulfillment, "Confirmation observed live");
                return Ok(record(event));
            }
        }
        Err(ClientError::Blockchain(
            "subscription ended before confirmation".into(),
        ))
    }

    async fn send_checked(&self, operation: &str, argument: H256) -> Result<H256> {
        let tx_hash = self
            .chain
            .send_transaction(self.address, selector_calldata(operation, argument))
            .await?;
        let receipt = self.chain.wait_for_receipt(tx_hash).await?;
        if receipt.status != Some(U64::from(1)) {
            return Err(ClientError::Reverted(tx_hash));
        }
        Ok(tx_hash)
    }

    async fn query_flag(&self, operation: &str, argument: H256) -> Result<bool> {
        let ret = self
            .chain
            .call(self.address, selector_calldata(operation, argument))
            .await?;
        let tokens = abi::decode(&[ParamType::Bool], &ret)
            .map_err(|e| ClientError::Blockchain(e.to_string()))?;
        match tokens.first() {
            Some(Token::Bool(flag)) => Ok(*flag),
            _ => Err(ClientError::Blockchain(format!(
                "malformed boolean return from {operation}"
            ))),
        }
    }
}

fn record(event: ConfirmationMadeEvent) -> ConfirmationRecord {
    ConfirmationRecord {
        fulfillment: event.fulfillment,
        escrow: event.escrow,
        confirmed: true,
    }
}

fn parse_confirmation(log: &ethers::types::Log) -> Option<ConfirmationMadeEvent> {
    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    <ConfirmationMadeEvent as EthLogDecode>::decode_log(&raw).ok()
}

fn selector_calldata(operation: &str, argument: H256) -> Bytes {
    let args = abi::encode(&[Token::FixedBytes(argument.as_bytes().to_vec())]);
    let mut data = id(operation).to_vec();
    data.extend_from_slice(&args);
    data.into()
}
