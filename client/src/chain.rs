//! Chain-access boundary: the narrow interface this layer needs from a
//! chain, plus the JSON-RPC implementation used in production.

use std::convert::TryFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Filter, Log, TransactionReceipt, TransactionRequest, H256};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{ClientError, Result};

// Receipt polling budget for request/response transports.
const RECEIPT_POLL_MS: u64 = 1_000;
const RECEIPT_POLL_ATTEMPTS: u32 = 120;

/// How a transport delivers new events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Native push notification; no polling needed.
    Push,
    /// Request/response; poll at the baseline interval.
    Polling,
    /// Request/response against a slow or rate-limited endpoint; poll at
    /// a widened interval.
    Batching,
}

/// Everything this layer needs from a chain. Event discovery, decision
/// submission, and the confirmation client all run against exactly this
/// shape, which keeps them testable with an in-process fake.
#[async_trait::async_trait]
pub trait ChainAccess: Send + Sync + 'static {
    fn transport(&self) -> TransportKind;

    async fn latest_block(&self) -> Result<u64>;

    /// Logs matching `filter`, deduplicated by the underlying transport's
    /// own log identity; this layer does not re-deduplicate.
    async fn read_logs(&self, filter: &Filter) -> Result<Vec<Log>>;

    /// Opens a native push subscription delivering log batches. Only
    /// meaningful for [`TransportKind::Push`] transports.
    async fn subscribe_logs(&self, filter: &Filter) -> Result<mpsc::Receiver<Vec<Log>>> {
        let _ = filter;
        Err(ClientError::PushUnsupported)
    }

    /// Read-only contract call.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// Sends a state-mutating transaction, returning its hash without
    /// waiting for inclusion.
    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<H256>;

    /// Waits for the receipt of a previously sent transaction.
    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt>;
}

/// Network configuration for the JSON-RPC chain client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,
    /// Submitting identity's private key, hex.
    pub signer_key: String,
    /// Widen the polling interval for rate-limited/batching endpoints.
    #[serde(default)]
    pub batching: bool,
}

impl ChainConfig {
    /// Reads a JSON-encoded config from `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("loading chain config: {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("parsing JSON from {:?}", path))
    }
}

/// JSON-RPC implementation of [`ChainAccess`] over HTTP.
pub struct RpcChain {
    client: Arc<SignerMiddleware<Provider<Http>, LocalWallet>>,
    transport: TransportKind,
}

impl RpcChain {
    /// Connects to the configured endpoint and binds the signing wallet
    /// to the endpoint's chain id.
    pub async fn connect(config: &ChainConfig) -> Result<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())?;
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| ClientError::Blockchain(e.to_string()))?
            .as_u64();
        debug!(%chain_id, "Connected to chain");

        let wallet = config
            .signer_key
            .parse::<LocalWallet>()?
            .with_chain_id(chain_id);
        let client = Arc::new(SignerMiddleware::new(provider, wallet));

        let transport = if config.batching {
            TransportKind::Batching
        } else {
            TransportKind::Polling
        };
        Ok(Self { client, transport })
    }
}

#[async_trait::async_trait]
impl ChainAccess for RpcChain {
    fn transport(&self) -> TransportKind {
        self.transport
    }

    async fn latest_block(&self) -> Result<u64> {
        let block = self
            .client
            .get_block_number()
            .await
            .map_err(|e| ClientError::Blockchain(e.to_string()))?;
        Ok(block.as_u64())
    }

    async fn read_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.client
            .get_logs(filter)
            .await
            .map_err(|e| ClientError::Blockchain(e.to_string()))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.client
            .call(&tx, None)
            .await
            .map_err(|e| ClientError::Blockchain(e.to_string()))
    }

    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<H256> {
        let tx = TransactionRequest::new().to(to).data(data);
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| ClientError::Submission(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        trace!(?tx_hash, "Transaction sent");
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            let receipt = self
                .client
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| ClientError::Blockchain(e.to_string()))?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            tokio::time::sleep(Duration::from_millis(RECEIPT_POLL_MS)).await;
        }
        Err(ClientError::TxDropped)
    }
}
