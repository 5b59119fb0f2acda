//! Swap lifecycle: persisted records, the per-swap state machine, and the
//! orchestrator façade.

pub mod machine;
pub mod orchestrator;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::wallet::ChainAsset;

pub use machine::{Backoff, Effect, LoopEnd, Settlement, SwapHandle, SwapStep};
pub use orchestrator::{SwapOrchestrator, SwapOrchestratorBuilder};

/// Coarse lifecycle phase persisted with each swap.
///
/// Phases only move forward:
/// `Created -> {AwaitingLockup|AwaitingClaim} -> Continue -> {Success|Failed}`.
/// `Continue` is the catch-all "not yet terminal, poll again" bucket; the
/// provider's finer-grained vocabulary is not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPhase {
    Created,
    AwaitingLockup,
    AwaitingClaim,
    Continue,
    Success,
    Failed,
}

impl SwapPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapPhase::Success | SwapPhase::Failed)
    }

    /// Position along the forward-only ordering; the two terminal phases
    /// share the top rank.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            SwapPhase::Created => 0,
            SwapPhase::AwaitingLockup => 1,
            SwapPhase::AwaitingClaim => 2,
            SwapPhase::Continue => 3,
            SwapPhase::Success | SwapPhase::Failed => 4,
        }
    }
}

impl fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwapPhase::Created => "created",
            SwapPhase::AwaitingLockup => "awaiting_lockup",
            SwapPhase::AwaitingClaim => "awaiting_claim",
            SwapPhase::Continue => "continue",
            SwapPhase::Success => "success",
            SwapPhase::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Swap shape with its direction-specific data. All amounts are satoshis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwapKind {
    /// Lock on-chain funds so the provider pays a Lightning invoice.
    Submarine {
        invoice: String,
        invoice_amount: u64,
        lockup_address: String,
        /// Amount to lock, fixed at creation time.
        expected_amount: u64,
        refund_address: String,
    },
    /// Receive a Lightning payment, claim the provider's on-chain lockup.
    Reverse {
        invoice: String,
        invoice_amount: u64,
        onchain_amount: u64,
        lockup_address: String,
        claim_address: String,
    },
    ChainBtcToLbtc {
        lockup_address: String,
        expected_lockup_amount: u64,
        claim_amount: u64,
        claim_address: String,
        refund_address: String,
    },
    ChainLbtcToBtc {
        lockup_address: String,
        expected_lockup_amount: u64,
        claim_amount: u64,
        claim_address: String,
        refund_address: String,
    },
}

impl SwapKind {
    pub fn label(&self) -> &'static str {
        match self {
            SwapKind::Submarine { .. } => "submarine",
            SwapKind::Reverse { .. } => "reverse",
            SwapKind::ChainBtcToLbtc { .. } => "chain_btc_to_lbtc",
            SwapKind::ChainLbtcToBtc { .. } => "chain_lbtc_to_btc",
        }
    }

    /// The on-chain leg we claim when the provider's lockup is spendable.
    /// Submarine swaps have no claim leg on our side.
    pub(crate) fn claim_leg(&self) -> Option<(&str, u64, ChainAsset)> {
        match self {
            SwapKind::Submarine { .. } => None,
            SwapKind::Reverse {
                claim_address,
                onchain_amount,
                ..
            } => Some((claim_address, *onchain_amount, ChainAsset::Liquid)),
            SwapKind::ChainBtcToLbtc {
                claim_address,
                claim_amount,
                ..
            } => Some((claim_address, *claim_amount, ChainAsset::Liquid)),
            SwapKind::ChainLbtcToBtc {
                claim_address,
                claim_amount,
                ..
            } => Some((claim_address, *claim_amount, ChainAsset::Bitcoin)),
        }
    }

    /// The on-chain leg that takes our lockup back when the provider aborts.
    /// Reverse swaps lock nothing on our side.
    pub(crate) fn refund_leg(&self) -> Option<(&str, u64, ChainAsset)> {
        match self {
            SwapKind::Submarine {
                refund_address,
                expected_amount,
                ..
            } => Some((refund_address, *expected_amount, ChainAsset::Liquid)),
            SwapKind::Reverse { .. } => None,
            SwapKind::ChainBtcToLbtc {
                refund_address,
                expected_lockup_amount,
                ..
            } => Some((refund_address, *expected_lockup_amount, ChainAsset::Bitcoin)),
            SwapKind::ChainLbtcToBtc {
                refund_address,
                expected_lockup_amount,
                ..
            } => Some((refund_address, *expected_lockup_amount, ChainAsset::Liquid)),
        }
    }
}

/// The persisted unit of truth for one swap.
///
/// Created by the orchestrator, mutated only by
/// [`SwapHandle::advance`](machine::SwapHandle::advance), keyed by the
/// provider-assigned `swap_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_id: String,
    #[serde(flatten)]
    pub kind: SwapKind,
    pub phase: SwapPhase,

    /// Total fee quoted at creation time: what goes in minus what comes out.
    pub fee: u64,

    /// Index of the swap keypair in the orchestrator's key source.
    pub key_index: u32,
    /// Chain swaps use a second keypair for the refund side.
    pub refund_key_index: Option<u32>,
    /// Namespace of the key source that created this record; restoring under
    /// a different seed is rejected.
    pub key_source_id: String,

    /// Opaque provider blob sufficient to resume polling. Round-tripped,
    /// never parsed here.
    pub provider_payload: String,

    pub claim_txid: Option<String>,
    pub refund_txid: Option<String>,
    /// Guards against double-broadcasting the claim after a crash-resume.
    pub claim_broadcasted: bool,
    pub failure_reason: Option<String>,

    pub created_at: u64,
    pub updated_at: u64,
}

impl SwapRecord {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Settlement recorded for a terminal swap, `None` while live.
    pub fn settlement(&self) -> Option<machine::Settlement> {
        match self.phase {
            SwapPhase::Success => Some(machine::Settlement {
                success: true,
                claim_txid: self.claim_txid.clone(),
                refund_txid: None,
                reason: None,
            }),
            SwapPhase::Failed => Some(machine::Settlement {
                success: false,
                claim_txid: None,
                refund_txid: self.refund_txid.clone(),
                reason: self.failure_reason.clone(),
            }),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}
