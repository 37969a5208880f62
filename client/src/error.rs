use ethers::types::H256;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// Engine or client constructed with an unusable identity/address.
    /// Raised before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("blockchain error: {0}")]
    Blockchain(String),

    /// Malformed payload for a known arbiter kind.
    #[error("demand decode error: {0}")]
    Decode(#[from] covenant_core::error::DecodeError),

    /// Decision callback failed for one request; recorded per request,
    /// never aborts the run.
    #[error("decision callback failed: {0}")]
    Callback(String),

    /// Decision transaction failed to send or was reverted; recorded per
    /// decision, sibling decisions are unaffected.
    #[error("decision submission failed: {0}")]
    Submission(String),

    #[error("transaction dropped from the mempool")]
    TxDropped,

    #[error("transaction reverted: {0:?}")]
    Reverted(H256),

    #[error("transport does not support push subscriptions")]
    PushUnsupported,

    #[error("URL parse error")]
    UrlParse(#[from] url::ParseError),
}

impl From<ethers::providers::ProviderError> for ClientError {
    fn from(value: ethers::providers::ProviderError) -> Self {
        Self::Blockchain(value.to_string())
    }
}

impl From<ethers::signers::WalletError> for ClientError {
    fn from(value: ethers::signers::WalletError) -> Self {
        Self::Blockchain(value.to_string())
    }
}
