use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// On-chain settlement asset of a swap leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainAsset {
    Bitcoin,
    Liquid,
}

impl fmt::Display for ChainAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainAsset::Bitcoin => write!(f, "BTC"),
            ChainAsset::Liquid => write!(f, "L-BTC"),
        }
    }
}

/// A fully signed transaction, opaque to the orchestrator.
#[derive(Debug, Clone)]
pub struct SignedTransaction(pub Vec<u8>);

/// The host wallet. The orchestrator drives the on-chain legs of a swap
/// through this interface and never constructs or signs transactions
/// itself.
#[async_trait]
pub trait WalletEngine: Send + Sync {
    async fn current_receive_address(&self) -> Result<String, Error>;

    async fn build_and_sign_onchain_leg(
        &self,
        recipient: &str,
        amount: u64,
        asset: ChainAsset,
    ) -> Result<SignedTransaction, Error>;

    /// Broadcast a signed transaction, returning its txid.
    async fn broadcast(&self, tx: &SignedTransaction) -> Result<String, Error>;
}
