//! The per-swap state machine.
//!
//! [`SwapHandle::advance`] is the single entry point that moves a swap
//! forward, whether it is triggered by a polling loop or by a webhook
//! delivery. Calling it again with no new provider state is a no-op, which
//! is what makes crash-resume correct: resuming is just "keep calling
//! advance".

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::Error;
use crate::provider::{ProviderClient, ProviderState, ProviderUpdate};
use crate::store::SwapStore;
use crate::swap::{SwapKind, SwapPhase, SwapRecord};
use crate::wallet::{SignedTransaction, WalletEngine};

const BROADCAST_ATTEMPTS: u32 = 30;
const BROADCAST_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Result of one `advance` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapStep {
    /// Not yet terminal: poll again later.
    Pending {
        phase: SwapPhase,
        effect: Option<Effect>,
    },
    /// Terminal. Re-advancing a settled swap returns this again without
    /// touching the provider, the wallet, or the store.
    Settled(Settlement),
}

/// On-chain side effect performed during an `advance` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The lockup transaction was seen by the provider.
    LockupSeen,
    ClaimBroadcast { txid: String },
    RefundBroadcast { txid: String },
}

/// Terminal outcome of a swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub success: bool,
    pub claim_txid: Option<String>,
    pub refund_txid: Option<String>,
    pub reason: Option<String>,
}

/// Delay policy between retryable `advance` calls: starts small, doubles up
/// to a cap, resets whenever the provider has something new.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// How a driving loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEnd {
    Settled(Settlement),
    Cancelled,
}

/// Tracks swap ids with a live handle so that at most one `advance` caller
/// exists per swap at any time.
#[derive(Clone, Default)]
pub(crate) struct ActiveSwaps(Arc<Mutex<HashSet<String>>>);

impl ActiveSwaps {
    pub(crate) fn acquire(&self, swap_id: &str) -> Result<(), Error> {
        let mut active = self.0.lock().expect("active swaps mutex poisoned");
        if !active.insert(swap_id.to_string()) {
            return Err(Error::SwapAlreadyActive(swap_id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn release(&self, swap_id: &str) {
        let mut active = self.0.lock().expect("active swaps mutex poisoned");
        active.remove(swap_id);
    }
}

/// A live swap: the record plus everything needed to drive it to a terminal
/// state.
///
/// `advance` takes `&mut self` and the orchestrator hands out at most one
/// handle per swap id, so advance calls for one swap are serialized by
/// construction.
pub struct SwapHandle {
    record: SwapRecord,
    provider: Arc<dyn ProviderClient>,
    wallet: Arc<dyn WalletEngine>,
    store: Option<SwapStore>,
    active: ActiveSwaps,
}

impl std::fmt::Debug for SwapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapHandle")
            .field("record", &self.record)
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for SwapHandle {
    fn drop(&mut self) {
        self.active.release(&self.record.swap_id);
    }
}

impl SwapHandle {
    pub(crate) fn new(
        record: SwapRecord,
        provider: Arc<dyn ProviderClient>,
        wallet: Arc<dyn WalletEngine>,
        store: Option<SwapStore>,
        active: ActiveSwaps,
    ) -> Result<Self, Error> {
        active.acquire(&record.swap_id)?;
        Ok(Self {
            record,
            provider,
            wallet,
            store,
            active,
        })
    }

    pub fn swap_id(&self) -> &str {
        &self.record.swap_id
    }

    pub fn record(&self) -> &SwapRecord {
        &self.record
    }

    /// Serialized record, the blob accepted by
    /// [`SwapOrchestrator::restore`](crate::swap::SwapOrchestrator::restore).
    pub fn serialize(&self) -> Result<String, Error> {
        self.record.to_json()
    }

    /// Poll the provider once and move the swap forward.
    ///
    /// Returns [`Error::NoProviderUpdate`] (retryable) when the provider has
    /// nothing new. The record is persisted only after the whole step
    /// succeeded, so the stored state always reflects the last completed
    /// advance.
    pub async fn advance(&mut self) -> Result<SwapStep, Error> {
        if let Some(settlement) = self.record.settlement() {
            return Ok(SwapStep::Settled(settlement));
        }

        let update = self.provider.poll(&self.record.provider_payload).await?;
        if update.swap_id != self.record.swap_id {
            return Err(Error::Provider(format!(
                "update for swap {} while polling {}",
                update.swap_id, self.record.swap_id
            )));
        }
        tracing::info!(
            swap_id = %self.record.swap_id,
            status = %update.state,
            "provider update"
        );

        let step = match self.record.kind {
            SwapKind::Submarine { .. } => self.advance_submarine(update).await?,
            SwapKind::Reverse { .. } => self.advance_reverse(update).await?,
            SwapKind::ChainBtcToLbtc { .. } | SwapKind::ChainLbtcToBtc { .. } => {
                self.advance_chain(update).await?
            }
        };

        self.record.updated_at = crate::now_unix();
        if let Some(store) = &self.store {
            store.put(&self.record)?;
        }

        Ok(step)
    }

    /// Drive the swap until it settles or `cancel` flips to true.
    ///
    /// Cancellation happens only between `advance` calls; the persisted
    /// record always reflects a completed step.
    pub async fn run_until_settled(
        &mut self,
        cancel: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> Result<LoopEnd, Error> {
        loop {
            if *cancel.borrow() {
                return Ok(LoopEnd::Cancelled);
            }

            match self.advance().await {
                Ok(SwapStep::Settled(settlement)) => return Ok(LoopEnd::Settled(settlement)),
                Ok(SwapStep::Pending { .. }) => backoff.reset(),
                Err(e) if e.is_retryable() => {
                    let delay = backoff.next();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = cancel.changed() => match changed {
                            Ok(()) if *cancel.borrow() => return Ok(LoopEnd::Cancelled),
                            Ok(()) => {}
                            // sender gone: nobody can cancel anymore
                            Err(_) => tokio::time::sleep(delay).await,
                        },
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn advance_submarine(&mut self, update: ProviderUpdate) -> Result<SwapStep, Error> {
        use ProviderState as S;

        match update.state {
            S::InvoiceSet => self.progress(SwapPhase::AwaitingLockup, None),
            S::TransactionMempool | S::TransactionConfirmed => {
                self.progress(SwapPhase::Continue, Some(Effect::LockupSeen))
            }
            S::InvoicePending | S::InvoicePaid | S::TransactionClaimPending => {
                self.progress(SwapPhase::Continue, None)
            }
            S::TransactionClaimed => {
                tracing::info!(swap_id = %self.record.swap_id, "provider claimed the lockup, invoice paid");
                self.settle_success()
            }
            S::TransactionLockupFailed | S::InvoiceFailedToPay => {
                tracing::warn!(
                    swap_id = %self.record.swap_id,
                    status = %update.state,
                    "provider could not complete payment, refunding lockup"
                );
                let txid = self.broadcast_refund_leg().await?;
                self.settle_failure(failure_reason(&update, "provider failed to pay the invoice"), txid)
            }
            S::SwapExpired => {
                self.settle_failure(failure_reason(&update, "swap expired"), None)
            }
            other => Err(self.unexpected(other)),
        }
    }

    async fn advance_reverse(&mut self, update: ProviderUpdate) -> Result<SwapStep, Error> {
        use ProviderState as S;

        match update.state {
            S::SwapCreated => self.progress(SwapPhase::Continue, None),
            S::TransactionMempool | S::TransactionConfirmed => {
                if self.record.claim_broadcasted {
                    return self.progress(SwapPhase::Continue, None);
                }
                // remember the lockup sighting before attempting the claim,
                // so a wallet failure here resumes at the claim step
                self.record.phase = SwapPhase::AwaitingClaim;
                let txid = self.broadcast_claim_leg().await?;
                self.progress(SwapPhase::Continue, Some(Effect::ClaimBroadcast { txid }))
            }
            S::TransactionDirect => {
                tracing::info!(
                    swap_id = %self.record.swap_id,
                    "payer settled directly on-chain via routing hint"
                );
                self.settle_success()
            }
            S::InvoiceSettled => self.settle_success(),
            S::SwapExpired | S::InvoiceExpired => {
                self.settle_failure(failure_reason(&update, "swap expired"), None)
            }
            other => Err(self.unexpected(other)),
        }
    }

    async fn advance_chain(&mut self, update: ProviderUpdate) -> Result<SwapStep, Error> {
        use ProviderState as S;

        match update.state {
            S::SwapCreated => self.progress(SwapPhase::AwaitingLockup, None),
            S::TransactionMempool | S::TransactionConfirmed => {
                self.progress(SwapPhase::Continue, Some(Effect::LockupSeen))
            }
            S::TransactionServerMempool => self.progress(SwapPhase::Continue, None),
            S::TransactionServerConfirmed => {
                if self.record.claim_broadcasted {
                    return self.progress(SwapPhase::Continue, None);
                }
                self.record.phase = SwapPhase::AwaitingClaim;
                let txid = self.broadcast_claim_leg().await?;
                self.progress(SwapPhase::Continue, Some(Effect::ClaimBroadcast { txid }))
            }
            S::TransactionClaimed => self.settle_success(),
            S::TransactionLockupFailed | S::TransactionFailed | S::TransactionRefunded => {
                tracing::warn!(
                    swap_id = %self.record.swap_id,
                    status = %update.state,
                    "provider aborted the chain swap, refunding lockup"
                );
                let txid = self.broadcast_refund_leg().await?;
                self.settle_failure(failure_reason(&update, "provider aborted the swap"), txid)
            }
            S::SwapExpired => {
                self.settle_failure(failure_reason(&update, "swap expired"), None)
            }
            other => Err(self.unexpected(other)),
        }
    }

    /// Move to `target` unless that would go backwards along the phase
    /// ordering; stale provider replays must not regress the record.
    fn progress(&mut self, target: SwapPhase, effect: Option<Effect>) -> Result<SwapStep, Error> {
        if target.rank() > self.record.phase.rank() {
            self.record.phase = target;
        }
        Ok(SwapStep::Pending {
            phase: self.record.phase,
            effect,
        })
    }

    fn settle_success(&mut self) -> Result<SwapStep, Error> {
        self.record.phase = SwapPhase::Success;
        Ok(SwapStep::Settled(Settlement {
            success: true,
            claim_txid: self.record.claim_txid.clone(),
            refund_txid: None,
            reason: None,
        }))
    }

    fn settle_failure(
        &mut self,
        reason: String,
        refund_txid: Option<String>,
    ) -> Result<SwapStep, Error> {
        self.record.phase = SwapPhase::Failed;
        self.record.failure_reason = Some(reason.clone());
        self.record.refund_txid = refund_txid.clone();
        Ok(SwapStep::Settled(Settlement {
            success: false,
            claim_txid: None,
            refund_txid,
            reason: Some(reason),
        }))
    }

    fn unexpected(&self, status: ProviderState) -> Error {
        Error::UnexpectedUpdate {
            swap_id: self.record.swap_id.clone(),
            status: status.to_string(),
            last_phase: self.record.phase.to_string(),
        }
    }

    async fn broadcast_claim_leg(&mut self) -> Result<String, Error> {
        let (address, amount, asset) = self
            .record
            .kind
            .claim_leg()
            .ok_or_else(|| Error::Wallet("swap kind has no claim leg".to_string()))?;
        let (address, amount) = (address.to_string(), amount);

        let tx = self
            .wallet
            .build_and_sign_onchain_leg(&address, amount, asset)
            .await?;
        let txid = self.broadcast_with_retry(&tx).await?;

        self.record.claim_txid = Some(txid.clone());
        self.record.claim_broadcasted = true;
        tracing::info!(swap_id = %self.record.swap_id, claim_txid = %txid, "broadcast claim tx");
        Ok(txid)
    }

    async fn broadcast_refund_leg(&mut self) -> Result<Option<String>, Error> {
        let Some((address, amount, asset)) = self.record.kind.refund_leg() else {
            return Ok(None);
        };
        let (address, amount) = (address.to_string(), amount);

        let tx = self
            .wallet
            .build_and_sign_onchain_leg(&address, amount, asset)
            .await?;
        let txid = self.broadcast_with_retry(&tx).await?;

        tracing::info!(swap_id = %self.record.swap_id, refund_txid = %txid, "broadcast refund tx");
        Ok(Some(txid))
    }

    async fn broadcast_with_retry(&self, tx: &SignedTransaction) -> Result<String, Error> {
        for _ in 0..BROADCAST_ATTEMPTS {
            match self.wallet.broadcast(tx).await {
                Ok(txid) => return Ok(txid),
                Err(e) => {
                    tracing::info!(error = %e, "broadcast failed, retrying");
                    tokio::time::sleep(BROADCAST_RETRY_DELAY).await;
                }
            }
        }
        Err(Error::BroadcastRetriesExhausted)
    }
}

fn failure_reason(update: &ProviderUpdate, fallback: &str) -> String {
    update
        .failure_reason
        .clone()
        .unwrap_or_else(|| format!("{fallback} ({})", update.state))
}
