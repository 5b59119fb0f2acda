//! Client-side orchestration of atomic swaps between Lightning and an
//! on-chain settlement layer (Liquid or Bitcoin), mediated by a third-party
//! swap provider.
//!
//! The crate drives a swap from creation to a terminal outcome across
//! process restarts: records are persisted through a pluggable
//! [`store::PersistenceAdapter`], resumed with
//! [`swap::SwapOrchestrator::restore`], and advanced one idempotent
//! [`swap::SwapHandle::advance`] call at a time. Wallet signing and
//! provider transport stay behind the [`wallet::WalletEngine`] and
//! [`provider::ProviderClient`] collaborator traits.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod error;
pub mod keys;
pub mod logging;
pub mod provider;
pub mod quote;
pub mod store;
pub mod swap;
pub mod wallet;

pub use error::Error;
pub use keys::{RescueMaterial, SwapKeySource, WalletNamespace};
pub use provider::{ProviderClient, ProviderState, ProviderUpdate, Webhook};
pub use quote::{PairBook, Quote, QuoteBuilder, SwapAsset};
pub use store::{MemoryAdapter, PersistenceAdapter, SqliteAdapter, SwapStore};
pub use swap::{
    Backoff, Effect, LoopEnd, Settlement, SwapHandle, SwapKind, SwapOrchestrator,
    SwapOrchestratorBuilder, SwapPhase, SwapRecord, SwapStep,
};
pub use wallet::{ChainAsset, SignedTransaction, WalletEngine};

/// Seconds since the unix epoch.
pub(crate) fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
