use crate::quote::SwapAsset;

/// Opaque error type surfaced by [`PersistenceAdapter`] implementations.
///
/// [`PersistenceAdapter`]: crate::store::PersistenceAdapter
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid bolt11 invoice: {0}")]
    InvalidInvoice(#[from] lightning_invoice::ParseOrSemanticError),

    #[error("invoice without amount: {0}")]
    InvoiceWithoutAmount(String),

    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("address {0} is for a different network")]
    AddressNetworkMismatch(String),

    #[error("amount {amount} outside provider limits [{min}, {max}]")]
    AmountOutOfRange { amount: u64, min: u64, max: u64 },

    #[error("invalid swap pair: {from:?} -> {to:?}")]
    InvalidSwapPair { from: SwapAsset, to: SwapAsset },

    #[error("missing quote parameter: {0}")]
    MissingQuoteParam(&'static str),

    #[error("swap pair is currently not available from the provider")]
    PairNotAvailable,

    #[error("provider has insufficient liquidity for this swap")]
    InsufficientLiquidity,

    /// The provider had nothing new for this swap. Wait and poll again;
    /// this is never a state transition.
    #[error("no provider update available")]
    NoProviderUpdate,

    #[error("timeout waiting for provider update for swap {0}")]
    Timeout(String),

    #[error("swap {0} expired on the provider side")]
    SwapExpired(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("unexpected provider status {status} for swap {swap_id} (last phase {last_phase})")]
    UnexpectedUpdate {
        swap_id: String,
        status: String,
        last_phase: String,
    },

    #[error("expected on-chain amount {0} is lower than the invoice amount for swap {1}")]
    ExpectedAmountBelowInvoice(u64, String),

    /// Redirection, not a failure: the invoice embeds a magic routing hint,
    /// so it can be paid directly on-chain without a swap.
    #[error("invoice can be paid directly on-chain, no swap needed: {uri}")]
    MagicRoutingHint {
        address: String,
        amount: u64,
        uri: String,
    },

    #[error("no swap store configured")]
    StoreNotConfigured,

    #[error("store error: {0}")]
    Store(#[source] StoreError),

    #[error("swap {0} not found in store")]
    SwapNotFound(String),

    #[error("a live handle for swap {0} already exists")]
    SwapAlreadyActive(String),

    #[error("rescue material mismatch: record was created under a different key source")]
    KeySourceMismatch,

    #[error("key derivation error: {0}")]
    KeyDerivation(#[from] bitcoin::bip32::Error),

    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("broadcast kept failing after retries")]
    BroadcastRetriesExhausted,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for conditions where the caller should back off and call
    /// `advance` again instead of treating the swap as failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NoProviderUpdate | Error::Timeout(_))
    }
}
