#![allow(dead_code)]

//! In-process fake chain implementing `ChainAccess` for engine and
//! confirmation tests: append-only log history, push subscriptions, and
//! synthesized decision/confirmation events for submitted transactions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ethers::abi::{self, Token};
use ethers::contract::EthEvent;
use ethers::types::{
    Address, BlockNumber, Bytes, Filter, FilterBlockOption, Log, Topic, TransactionReceipt,
    ValueOrArray, H256, U64,
};
use ethers::utils::id;
use tokio::sync::mpsc;

use covenant_client::chain::{ChainAccess, TransportKind};
use covenant_client::confirmation::ConfirmationMadeEvent;
use covenant_client::error::{ClientError, Result};
use covenant_client::oracle::{
    address_topic, ArbitrationMadeEvent, ArbitrationRequestedEvent,
};
use covenant_core::{ArbiterTable, DecoderRegistry, DemandFields};

const ARBITRATE: &str = "arbitrate(bytes32,bytes,bool)";
const CONFIRM: &str = "confirm(bytes32)";
const REQUEST_CONFIRMATION: &str = "requestConfirmation(bytes32)";
const IS_CONFIRMED: &str = "isConfirmed(bytes32)";
const IS_ESCROW_CONFIRMED: &str = "isEscrowConfirmed(bytes32)";

pub fn arbiter_address() -> Address {
    Address::from_low_u64_be(0xa12b)
}

pub fn oracle_address() -> Address {
    Address::from_low_u64_be(0x0acc1e)
}

pub fn core_address(address: Address) -> covenant_core::Address {
    covenant_core::Address::from(address.0)
}

/// Registry knowing the trusted-oracle arbiter deployment under test.
pub fn registry() -> Arc<DecoderRegistry> {
    Arc::new(DecoderRegistry::from_table(&ArbiterTable {
        trusted_oracle: Some(core_address(arbiter_address())),
        ..Default::default()
    }))
}

/// An oracle-delegated demand wrapping `data` as the inner payload.
pub fn oracle_demand(data: &[u8]) -> Vec<u8> {
    DemandFields::Oracle {
        oracle: core_address(oracle_address()),
        data: data.to_vec(),
    }
    .encode()
}

pub fn obligation(n: u64) -> H256 {
    H256::from_low_u64_be(n)
}

pub async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

pub struct MockChain {
    arbiter: Address,
    oracle: Address,
    transport: TransportKind,
    block: AtomicU64,
    tx_counter: AtomicU64,
    history: Mutex<Vec<Log>>,
    sent: Mutex<Vec<(Address, Bytes)>>,
    subscribers: Mutex<Vec<(Filter, mpsc::Sender<Vec<Log>>)>>,
    receipts: Mutex<HashMap<H256, u64>>,
    confirmed: Mutex<HashMap<H256, H256>>,
    escrows: Mutex<HashMap<H256, H256>>,
    reverting: Mutex<bool>,
    read_delay: Mutex<Duration>,
}

impl MockChain {
    pub fn new(arbiter: Address, oracle: Address) -> Arc<Self> {
        Self::with_transport(arbiter, oracle, TransportKind::Push)
    }

    pub fn with_transport(
        arbiter: Address,
        oracle: Address,
        transport: TransportKind,
    ) -> Arc<Self> {
        Arc::new(Self {
            arbiter,
            oracle,
            transport,
            block: AtomicU64::new(0),
            tx_counter: AtomicU64::new(0),
            history: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            confirmed: Mutex::new(HashMap::new()),
            escrows: Mutex::new(HashMap::new()),
            reverting: Mutex::new(false),
            read_delay: Mutex::new(Duration::ZERO),
        })
    }

    fn next_block(&self) -> u64 {
        self.block.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make every subsequent submission revert (and record no event).
    pub fn set_reverting(&self, reverting: bool) {
        *self.reverting.lock().unwrap() = reverting;
    }

    /// Appends a historical arbitration request addressed to the oracle.
    pub fn push_request(&self, obligation: H256, demand: Vec<u8>) {
        let log = self.request_log(obligation, demand);
        self.history.lock().unwrap().push(log);
    }

    /// Appends a request and delivers it to matching live subscribers.
    pub fn broadcast_request(&self, obligation: H256, demand: Vec<u8>) {
        let log = self.request_log(obligation, demand);
        self.history.lock().unwrap().push(log.clone());
        self.broadcast(log);
    }

    /// Delivers a request to subscribers without recording it in history,
    /// standing in for a log the transport has not indexed yet.
    pub fn send_live_request(&self, obligation: H256, demand: Vec<u8>) {
        self.broadcast(self.request_log(obligation, demand));
    }

    /// Delivers a confirmation to subscribers without recording it,
    /// standing in for a log the transport has not indexed yet.
    pub fn send_live_confirmation(&self, fulfillment: H256, escrow: H256) {
        self.broadcast(self.confirmation_log(fulfillment, escrow));
    }

    /// Stalls every `read_logs` call, holding the historical phase open.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Pre-registers the escrow a fulfillment confirms against.
    pub fn register_escrow(&self, fulfillment: H256, escrow: H256) {
        self.escrows.lock().unwrap().insert(fulfillment, escrow);
    }

    /// Obligation/decision pairs in submission order, parsed from sent
    /// `arbitrate` calldata.
    pub fn submitted_decisions(&self) -> Vec<(H256, bool)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, data)| data.len() >= 4 && &data[..4] == id(ARBITRATE).as_slice())
            .map(|(_, data)| (H256::from_slice(&data[4..36]), data[4 + 95] == 1))
            .collect()
    }

    /// Inner payloads echoed by sent `arbitrate` transactions, in order.
    pub fn submitted_inner_payloads(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, data)| data.len() >= 4 && &data[..4] == id(ARBITRATE).as_slice())
            .map(|(_, data)| {
                let args = &data[4..];
                let len = U64::from_big_endian(&args[96 + 24..128]).as_u64() as usize;
                args[128..128 + len].to_vec()
            })
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Decision events recorded on-chain, in order.
    pub fn recorded_decisions(&self) -> Vec<(H256, bool)> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.topics.first() == Some(&ArbitrationMadeEvent::signature()))
            .map(|log| (log.topics[1], !log.data.is_empty() && log.data[31] == 1))
            .collect()
    }

    fn request_log(&self, obligation: H256, demand: Vec<u8>) -> Log {
        Log {
            address: self.arbiter,
            topics: vec![
                ArbitrationRequestedEvent::signature(),
                obligation,
                address_topic(self.oracle),
            ],
            data: abi::encode(&[Token::Bytes(demand)]).into(),
            block_number: Some(self.next_block().into()),
            log_index: Some(0.into()),
            ..Default::default()
        }
    }

    fn made_log(&self, obligation: H256, decision: bool) -> Log {
        let mut word = [0u8; 32];
        word[31] = u8::from(decision);
        Log {
            address: self.arbiter,
            topics: vec![
                ArbitrationMadeEvent::signature(),
                obligation,
                address_topic(self.oracle),
            ],
            data: word.to_vec().into(),
            block_number: Some(self.next_block().into()),
            log_index: Some(0.into()),
            ..Default::default()
        }
    }

    fn confirmation_log(&self, fulfillment: H256, escrow: H256) -> Log {
        Log {
            address: self.arbiter,
            topics: vec![ConfirmationMadeEvent::signature(), fulfillment, escrow],
            block_number: Some(self.next_block().into()),
            log_index: Some(0.into()),
            ..Default::default()
        }
    }

    fn broadcast(&self, log: Log) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|(filter, sender)| {
                if log_matches(filter, &log) {
                    sender.try_send(vec![log.clone()]).is_ok()
                } else {
                    !sender.is_closed()
                }
            });
    }

    fn next_tx_hash(&self) -> H256 {
        H256::from_low_u64_be(0xff00_0000 + self.tx_counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait::async_trait]
impl ChainAccess for MockChain {
    fn transport(&self) -> TransportKind {
        self.transport
    }

    async fn latest_block(&self) -> Result<u64> {
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn read_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log_matches(filter, log))
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, filter: &Filter) -> Result<mpsc::Receiver<Vec<Log>>> {
        if self.transport != TransportKind::Push {
            return Err(ClientError::PushUnsupported);
        }
        let (sender, receiver) = mpsc::channel(16);
        self.subscribers
            .lock()
            .unwrap()
            .push((filter.clone(), sender));
        Ok(receiver)
    }

    async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes> {
        let flag = if data.len() >= 36 && &data[..4] == id(IS_CONFIRMED).as_slice() {
            let fulfillment = H256::from_slice(&data[4..36]);
            self.confirmed.lock().unwrap().contains_key(&fulfillment)
        } else if data.len() >= 36 && &data[..4] == id(IS_ESCROW_CONFIRMED).as_slice() {
            let escrow = H256::from_slice(&data[4..36]);
            self.confirmed.lock().unwrap().values().any(|e| *e == escrow)
        } else {
            return Err(ClientError::Blockchain("unknown call selector".into()));
        };
        let mut word = [0u8; 32];
        word[31] = u8::from(flag);
        Ok(word.to_vec().into())
    }

    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<H256> {
        let tx_hash = self.next_tx_hash();
        let reverting = *self.reverting.lock().unwrap();
        self.sent.lock().unwrap().push((to, data.clone()));
        self.receipts
            .lock()
            .unwrap()
            .insert(tx_hash, u64::from(!reverting));
        if reverting {
            return Ok(tx_hash);
        }

        if data.len() >= 36 && &data[..4] == id(ARBITRATE).as_slice() {
            let obligation = H256::from_slice(&data[4..36]);
            let decision = data[4 + 95] == 1;
            let log = self.made_log(obligation, decision);
            self.history.lock().unwrap().push(log);
        } else if data.len() >= 36 && &data[..4] == id(CONFIRM).as_slice() {
            let fulfillment = H256::from_slice(&data[4..36]);
            let escrow = self
                .escrows
                .lock()
                .unwrap()
                .get(&fulfillment)
                .copied()
                .unwrap_or_else(H256::zero);
            self.confirmed.lock().unwrap().insert(fulfillment, escrow);
            let log = self.confirmation_log(fulfillment, escrow);
            self.history.lock().unwrap().push(log.clone());
            self.broadcast(log);
        } else if data.len() >= 36 && &data[..4] == id(REQUEST_CONFIRMATION).as_slice() {
            // Recorded in `sent`; nothing else happens on-chain.
        }
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt> {
        let status = self
            .receipts
            .lock()
            .unwrap()
            .get(&tx_hash)
            .copied()
            .unwrap_or(1);
        Ok(TransactionReceipt {
            transaction_hash: tx_hash,
            status: Some(status.into()),
            ..Default::default()
        })
    }
}

fn log_matches(filter: &Filter, log: &Log) -> bool {
    let address_ok = match &filter.address {
        Some(ValueOrArray::Value(address)) => log.address == *address,
        Some(ValueOrArray::Array(addresses)) => addresses.contains(&log.address),
        None => true,
    };
    if !address_ok {
        return false;
    }

    for (i, expected) in filter.topics.iter().enumerate() {
        if let Some(topic) = expected {
            if !topic_matches(topic, log.topics.get(i)) {
                return false;
            }
        }
    }

    let (from, to) = match &filter.block_option {
        FilterBlockOption::Range {
            from_block,
            to_block,
        } => (block_num(*from_block), block_num(*to_block)),
        _ => (None, None),
    };
    let block = log.block_number.map(|n| n.as_u64()).unwrap_or(0);
    block >= from.unwrap_or(0) && block <= to.unwrap_or(u64::MAX)
}

fn topic_matches(expected: &Topic, actual: Option<&H256>) -> bool {
    match expected {
        ValueOrArray::Value(Some(h)) => actual == Some(h),
        ValueOrArray::Value(None) => true,
        ValueOrArray::Array(options) => options
            .iter()
            .any(|option| option.is_none() || actual == option.as_ref()),
    }
}

fn block_num(block: Option<BlockNumber>) -> Option<u64> {
    match block {
        Some(BlockNumber::Number(n)) => Some(n.as_u64()),
        _ => None,
    }
}
