//! Client-side contract of the swap provider.
//!
//! Transport (HTTP, websocket, webhook push) is the implementor's concern;
//! whichever way updates arrive they feed the same [`ProviderClient::poll`]
//! pathway consumed by the state machine.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::wallet::ChainAsset;

/// Status vocabulary used by the provider in swap updates.
///
/// This is the provider's wire granularity; the persisted swap record only
/// keeps the coarse [`SwapPhase`](crate::swap::SwapPhase) derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderState {
    SwapCreated,
    InvoiceSet,
    TransactionMempool,
    TransactionConfirmed,
    TransactionServerMempool,
    TransactionServerConfirmed,
    TransactionClaimPending,
    TransactionClaimed,
    TransactionLockupFailed,
    TransactionFailed,
    TransactionRefunded,
    TransactionDirect,
    InvoicePending,
    InvoicePaid,
    InvoiceFailedToPay,
    InvoiceSettled,
    InvoiceExpired,
    SwapExpired,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderState::SwapCreated => "swap.created",
            ProviderState::InvoiceSet => "invoice.set",
            ProviderState::TransactionMempool => "transaction.mempool",
            ProviderState::TransactionConfirmed => "transaction.confirmed",
            ProviderState::TransactionServerMempool => "transaction.server.mempool",
            ProviderState::TransactionServerConfirmed => "transaction.server.confirmed",
            ProviderState::TransactionClaimPending => "transaction.claim.pending",
            ProviderState::TransactionClaimed => "transaction.claimed",
            ProviderState::TransactionLockupFailed => "transaction.lockupFailed",
            ProviderState::TransactionFailed => "transaction.failed",
            ProviderState::TransactionRefunded => "transaction.refunded",
            ProviderState::TransactionDirect => "transaction.direct",
            ProviderState::InvoicePending => "invoice.pending",
            ProviderState::InvoicePaid => "invoice.paid",
            ProviderState::InvoiceFailedToPay => "invoice.failedToPay",
            ProviderState::InvoiceSettled => "invoice.settled",
            ProviderState::InvoiceExpired => "invoice.expired",
            ProviderState::SwapExpired => "swap.expired",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ProviderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "swap.created" => Ok(ProviderState::SwapCreated),
            "invoice.set" => Ok(ProviderState::InvoiceSet),
            "transaction.mempool" => Ok(ProviderState::TransactionMempool),
            "transaction.confirmed" => Ok(ProviderState::TransactionConfirmed),
            "transaction.server.mempool" => Ok(ProviderState::TransactionServerMempool),
            "transaction.server.confirmed" => Ok(ProviderState::TransactionServerConfirmed),
            "transaction.claim.pending" => Ok(ProviderState::TransactionClaimPending),
            "transaction.claimed" => Ok(ProviderState::TransactionClaimed),
            "transaction.lockupFailed" => Ok(ProviderState::TransactionLockupFailed),
            "transaction.failed" => Ok(ProviderState::TransactionFailed),
            "transaction.refunded" => Ok(ProviderState::TransactionRefunded),
            "transaction.direct" => Ok(ProviderState::TransactionDirect),
            "invoice.pending" => Ok(ProviderState::InvoicePending),
            "invoice.paid" => Ok(ProviderState::InvoicePaid),
            "invoice.failedToPay" => Ok(ProviderState::InvoiceFailedToPay),
            "invoice.settled" => Ok(ProviderState::InvoiceSettled),
            "invoice.expired" => Ok(ProviderState::InvoiceExpired),
            "swap.expired" => Ok(ProviderState::SwapExpired),
            other => Err(format!("unknown provider status: {other}")),
        }
    }
}

/// One status update for one swap.
#[derive(Debug, Clone)]
pub struct ProviderUpdate {
    pub swap_id: String,
    pub state: ProviderState,
    pub failure_reason: Option<String>,
}

/// Webhook registration passed through to the provider on creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub url: String,
    /// Ask the provider to hash the swap id in webhook calls.
    pub hash_swap_id: bool,
}

#[derive(Debug, Clone)]
pub struct SubmarineRequest {
    pub invoice: String,
    pub refund_public_key: String,
    pub referral_id: Option<String>,
    pub webhook: Option<Webhook>,
}

/// Creation response for a submarine swap: where to lock funds and how much.
#[derive(Debug, Clone)]
pub struct SubmarineCreated {
    pub swap_id: String,
    pub lockup_address: String,
    pub expected_amount: u64,
    pub accept_zero_conf: bool,
    /// Opaque resume blob, round-tripped through the swap record.
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct ReverseRequest {
    pub invoice_amount: u64,
    pub description: Option<String>,
    pub preimage_hash: String,
    pub claim_public_key: String,
    pub claim_address: String,
    pub referral_id: Option<String>,
    pub webhook: Option<Webhook>,
}

#[derive(Debug, Clone)]
pub struct ReverseCreated {
    pub swap_id: String,
    pub invoice: String,
    pub lockup_address: String,
    pub onchain_amount: u64,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct ChainRequest {
    pub from: ChainAsset,
    pub to: ChainAsset,
    pub lockup_amount: u64,
    pub preimage_hash: String,
    pub claim_public_key: String,
    pub refund_public_key: String,
    pub referral_id: Option<String>,
    pub webhook: Option<Webhook>,
}

#[derive(Debug, Clone)]
pub struct ChainCreated {
    pub swap_id: String,
    pub lockup_address: String,
    pub expected_lockup_amount: u64,
    pub claim_amount: u64,
    pub payload: String,
}

/// Direct on-chain destination embedded in an invoice via a magic routing
/// hint.
#[derive(Debug, Clone)]
pub struct DirectPayment {
    pub address: String,
    pub amount: u64,
}

/// Summary entry from the provider's account-wide swap listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapSummary {
    pub swap_id: String,
    pub kind: String,
    pub status: String,
    pub from: String,
    pub to: String,
}

/// The swap service, as seen by the orchestrator.
///
/// Implementations own all transport details. `poll` must return
/// [`Error::NoProviderUpdate`] when there is nothing new, never a stale
/// update replayed as fresh.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Current pair/fee book.
    async fn pairs(&self) -> Result<crate::quote::PairBook, Error>;

    async fn create_submarine(&self, req: SubmarineRequest) -> Result<SubmarineCreated, Error>;

    async fn create_reverse(&self, req: ReverseRequest) -> Result<ReverseCreated, Error>;

    async fn create_chain(&self, req: ChainRequest) -> Result<ChainCreated, Error>;

    /// Check an invoice for a magic routing hint allowing direct payment.
    async fn magic_routing_hint(&self, invoice: &str) -> Result<Option<DirectPayment>, Error>;

    /// Fetch the next status update for the swap identified by `payload`.
    async fn poll(&self, payload: &str) -> Result<ProviderUpdate, Error>;

    /// Re-validate a resume payload with the provider, returning a refreshed
    /// payload. Fails with [`Error::SwapExpired`] if the provider no longer
    /// recognizes the swap.
    async fn restore(&self, payload: &str) -> Result<String, Error>;

    /// All swaps the provider knows for this account key (xpub).
    async fn list_account_swaps(&self, account_key: &str) -> Result<Vec<SwapSummary>, Error>;

    /// First key index not yet used under this account key. Recovers the
    /// derivation counter when a seed is reused across sessions.
    async fn next_key_index(&self, account_key: &str) -> Result<u32, Error>;
}
