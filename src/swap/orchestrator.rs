//! Construction, restoration and enumeration of swaps.

use std::str::FromStr as _;
use std::sync::Arc;

use bitcoin::hashes::Hash as _;
use bitcoin::{Amount, Denomination};
use lightning_invoice::Bolt11Invoice;
use lwk_wollet::ElementsNetwork;
use lwk_wollet::elements;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::keys::SwapKeySource;
use crate::provider::{
    ChainRequest, ProviderClient, ReverseRequest, SubmarineRequest, SwapSummary, Webhook,
};
use crate::quote::{PairBook, QuoteBuilder};
use crate::store::{PersistenceAdapter, SwapStore};
use crate::swap::machine::{ActiveSwaps, SwapHandle};
use crate::swap::{SwapKind, SwapPhase, SwapRecord};
use crate::wallet::{ChainAsset, WalletEngine};

/// Top-level façade: owns the provider client, the key source and the
/// optional store; creates, restores and enumerates swaps.
pub struct SwapOrchestrator {
    network: ElementsNetwork,
    provider: Arc<dyn ProviderClient>,
    wallet: Arc<dyn WalletEngine>,
    keys: SwapKeySource,
    store: Option<SwapStore>,
    referral_id: Option<String>,
    webhook: Option<Webhook>,
    pairs: Mutex<PairBook>,
    active: ActiveSwaps,
}

impl SwapOrchestrator {
    pub fn builder(
        network: ElementsNetwork,
        provider: Arc<dyn ProviderClient>,
        wallet: Arc<dyn WalletEngine>,
    ) -> SwapOrchestratorBuilder {
        SwapOrchestratorBuilder::new(network, provider, wallet)
    }

    pub fn network(&self) -> ElementsNetwork {
        self.network
    }

    /// Namespace scoping this orchestrator's records in a shared store.
    pub fn namespace(&self) -> String {
        self.keys.namespace().to_string()
    }

    /// Lock on-chain funds so the provider pays `invoice` over Lightning.
    ///
    /// Fails with [`Error::MagicRoutingHint`] when the invoice embeds a
    /// direct on-chain destination: pay that instead, no swap needed, and
    /// nothing is persisted.
    pub async fn create_submarine(
        &self,
        invoice: &str,
        refund_address: &elements::Address,
        webhook: Option<Webhook>,
    ) -> Result<SwapHandle, Error> {
        let parsed = Bolt11Invoice::from_str(invoice)?;
        let invoice_amount = parsed
            .amount_milli_satoshis()
            .ok_or_else(|| Error::InvoiceWithoutAmount(invoice.to_string()))?
            / 1000;
        self.check_liquid_address(refund_address)?;

        if let Some(direct) = self.provider.magic_routing_hint(invoice).await? {
            let uri = format!(
                "liquidnetwork:{}?amount={}&assetid={}",
                direct.address,
                Amount::from_sat(direct.amount).to_string_in(Denomination::Bitcoin),
                self.network.policy_asset()
            );
            return Err(Error::MagicRoutingHint {
                address: direct.address,
                amount: direct.amount,
                uri,
            });
        }

        let (key_index, keypair) = self.keys.next_keypair()?;
        let created = self
            .provider
            .create_submarine(SubmarineRequest {
                invoice: invoice.to_string(),
                refund_public_key: hex::encode(keypair.public_key().serialize()),
                referral_id: self.referral_id.clone(),
                webhook: webhook.or_else(|| self.webhook.clone()),
            })
            .await?;

        let fee = created
            .expected_amount
            .checked_sub(invoice_amount)
            .ok_or_else(|| {
                Error::ExpectedAmountBelowInvoice(created.expected_amount, created.swap_id.clone())
            })?;

        tracing::info!(
            swap_id = %created.swap_id,
            lockup_address = %created.lockup_address,
            expected_amount = created.expected_amount,
            accept_zero_conf = created.accept_zero_conf,
            "created submarine swap"
        );

        let record = self.new_record(
            created.swap_id,
            SwapKind::Submarine {
                invoice: invoice.to_string(),
                invoice_amount,
                lockup_address: created.lockup_address,
                expected_amount: created.expected_amount,
                refund_address: refund_address.to_string(),
            },
            fee,
            key_index,
            None,
            created.payload,
        );
        self.persist_new(&record)?;
        self.handle(record)
    }

    /// Receive `amount` satoshis over Lightning, claiming the provider's
    /// on-chain lockup to `claim_address`.
    pub async fn create_reverse(
        &self,
        amount: u64,
        description: Option<String>,
        claim_address: &elements::Address,
        webhook: Option<Webhook>,
    ) -> Result<SwapHandle, Error> {
        {
            let pairs = self.pairs.lock().await;
            let pair = pairs.reverse.ok_or(Error::PairNotAvailable)?;
            if !pair.limits.contains(amount) {
                return Err(Error::AmountOutOfRange {
                    amount,
                    min: pair.limits.minimal,
                    max: pair.limits.maximal,
                });
            }
        }
        self.check_liquid_address(claim_address)?;

        let (key_index, keypair) = self.keys.next_keypair()?;
        let preimage = SwapKeySource::preimage(&keypair);
        let preimage_hash = SwapKeySource::preimage_hash(&preimage);

        let created = self
            .provider
            .create_reverse(ReverseRequest {
                invoice_amount: amount,
                description,
                preimage_hash: hex::encode(preimage_hash),
                claim_public_key: hex::encode(keypair.public_key().serialize()),
                claim_address: claim_address.to_string(),
                referral_id: self.referral_id.clone(),
                webhook: webhook.or_else(|| self.webhook.clone()),
            })
            .await?;

        // The invoice must commit to our preimage, or the provider could
        // collect the payment without us being able to claim.
        let invoice = Bolt11Invoice::from_str(&created.invoice)?;
        if invoice.payment_hash().to_byte_array() != preimage_hash {
            return Err(Error::Provider(format!(
                "invoice payment hash does not match our preimage for swap {}",
                created.swap_id
            )));
        }

        let fee = amount.checked_sub(created.onchain_amount).ok_or_else(|| {
            Error::ExpectedAmountBelowInvoice(created.onchain_amount, created.swap_id.clone())
        })?;

        tracing::info!(
            swap_id = %created.swap_id,
            invoice_amount = amount,
            onchain_amount = created.onchain_amount,
            "created reverse swap, waiting for invoice to be paid"
        );

        let record = self.new_record(
            created.swap_id,
            SwapKind::Reverse {
                invoice: created.invoice,
                invoice_amount: amount,
                onchain_amount: created.onchain_amount,
                lockup_address: created.lockup_address,
                claim_address: claim_address.to_string(),
            },
            fee,
            key_index,
            None,
            created.payload,
        );
        self.persist_new(&record)?;
        self.handle(record)
    }

    /// Lock `amount` on `from` to receive on `to` (BTC <-> L-BTC).
    pub async fn create_chain_swap(
        &self,
        amount: u64,
        from: ChainAsset,
        to: ChainAsset,
        refund_address: &str,
        claim_address: &str,
        webhook: Option<Webhook>,
    ) -> Result<SwapHandle, Error> {
        if from == to {
            return Err(Error::InvalidSwapPair {
                from: from.into(),
                to: to.into(),
            });
        }
        {
            let pairs = self.pairs.lock().await;
            let pair = match from {
                ChainAsset::Bitcoin => pairs.chain_btc_to_lbtc,
                ChainAsset::Liquid => pairs.chain_lbtc_to_btc,
            }
            .ok_or(Error::PairNotAvailable)?;
            if !pair.limits.contains(amount) {
                return Err(Error::AmountOutOfRange {
                    amount,
                    min: pair.limits.minimal,
                    max: pair.limits.maximal,
                });
            }
        }
        self.check_chain_address(refund_address, from)?;
        self.check_chain_address(claim_address, to)?;

        let (key_index, claim_keys) = self.keys.next_keypair()?;
        let (refund_key_index, refund_keys) = self.keys.next_keypair()?;
        let preimage = SwapKeySource::preimage(&claim_keys);
        let preimage_hash = SwapKeySource::preimage_hash(&preimage);

        let created = self
            .provider
            .create_chain(ChainRequest {
                from,
                to,
                lockup_amount: amount,
                preimage_hash: hex::encode(preimage_hash),
                claim_public_key: hex::encode(claim_keys.public_key().serialize()),
                refund_public_key: hex::encode(refund_keys.public_key().serialize()),
                referral_id: self.referral_id.clone(),
                webhook: webhook.or_else(|| self.webhook.clone()),
            })
            .await?;

        // the lockup leg must carry exactly what was quoted
        if created.expected_lockup_amount != amount {
            return Err(Error::Provider(format!(
                "provider expects lockup of {} but {} was requested for swap {}",
                created.expected_lockup_amount, amount, created.swap_id
            )));
        }
        let fee = created
            .expected_lockup_amount
            .saturating_sub(created.claim_amount);

        tracing::info!(
            swap_id = %created.swap_id,
            from = %from,
            to = %to,
            lockup_address = %created.lockup_address,
            expected_lockup_amount = created.expected_lockup_amount,
            "created chain swap"
        );

        let kind = match from {
            ChainAsset::Bitcoin => SwapKind::ChainBtcToLbtc {
                lockup_address: created.lockup_address,
                expected_lockup_amount: created.expected_lockup_amount,
                claim_amount: created.claim_amount,
                claim_address: claim_address.to_string(),
                refund_address: refund_address.to_string(),
            },
            ChainAsset::Liquid => SwapKind::ChainLbtcToBtc {
                lockup_address: created.lockup_address,
                expected_lockup_amount: created.expected_lockup_amount,
                claim_amount: created.claim_amount,
                claim_address: claim_address.to_string(),
                refund_address: refund_address.to_string(),
            },
        };
        let record = self.new_record(
            created.swap_id,
            kind,
            fee,
            key_index,
            Some(refund_key_index),
            created.payload,
        );
        self.persist_new(&record)?;
        self.handle(record)
    }

    /// Reconstruct a live handle from a serialized record (see
    /// [`SwapHandle::serialize`]).
    ///
    /// Fails with [`Error::SwapExpired`] if the provider no longer knows the
    /// swap: archive it as failed, do not retry.
    pub async fn restore(&self, serialized: &str) -> Result<SwapHandle, Error> {
        let mut record = SwapRecord::from_json(serialized)?;
        if record.key_source_id != self.keys.namespace().as_str() {
            return Err(Error::KeySourceMismatch);
        }

        record.provider_payload = self.provider.restore(&record.provider_payload).await?;

        if let Some(store) = &self.store {
            // refresh the payload and, for records that were already
            // terminal when persisted elsewhere, settle the index move
            store.put(&record)?;
        }

        tracing::info!(swap_id = %record.swap_id, phase = %record.phase, "restored swap");
        self.handle(record)
    }

    /// Restore a swap straight from the configured store.
    pub async fn restore_by_id(&self, swap_id: &str) -> Result<SwapHandle, Error> {
        let store = self.store.as_ref().ok_or(Error::StoreNotConfigured)?;
        let raw = store
            .raw(swap_id)?
            .ok_or_else(|| Error::SwapNotFound(swap_id.to_string()))?;
        self.restore(&raw).await
    }

    /// Pending swap ids, in insertion order. Distinguishes "no store
    /// configured" from "empty".
    pub fn list_pending(&self) -> Result<Vec<String>, Error> {
        let store = self.store.as_ref().ok_or(Error::StoreNotConfigured)?;
        store.pending_ids()
    }

    pub fn list_completed(&self) -> Result<Vec<String>, Error> {
        let store = self.store.as_ref().ok_or(Error::StoreNotConfigured)?;
        store.completed_ids()
    }

    /// Serialized record for a swap, `None` when absent or no store is
    /// configured.
    pub fn swap_data(&self, swap_id: &str) -> Result<Option<String>, Error> {
        match &self.store {
            Some(store) => store.raw(swap_id),
            None => Ok(None),
        }
    }

    /// Delete a record. Returns `false` when absent or no store is
    /// configured.
    pub fn remove(&self, swap_id: &str) -> Result<bool, Error> {
        match &self.store {
            Some(store) => store.remove(swap_id),
            None => Ok(false),
        }
    }

    /// Self-contained secret material recovering refund/claim rights for
    /// every swap created by this orchestrator, independent of the store.
    pub fn export_rescue_material(&self) -> Result<Vec<u8>, Error> {
        self.keys.rescue_material().to_bytes()
    }

    /// All swaps the provider has on file for this key source. Useful to
    /// rediscover swaps when the local store is lost.
    pub async fn list_account_swaps(&self) -> Result<Vec<SwapSummary>, Error> {
        self.provider
            .list_account_swaps(&self.keys.xpub().to_string())
            .await
    }

    /// Quote by send amount, off the cached pair book.
    pub async fn quote(&self, send_amount: u64) -> QuoteBuilder {
        let pairs = self.pairs.lock().await;
        QuoteBuilder::new_send(send_amount, pairs.clone())
    }

    /// Quote by desired receive amount, the inverse of [`Self::quote`].
    pub async fn quote_receive(&self, receive_amount: u64) -> QuoteBuilder {
        let pairs = self.pairs.lock().await;
        QuoteBuilder::new_receive(receive_amount, pairs.clone())
    }

    /// Re-fetch the pair book from the provider.
    pub async fn refresh_pairs(&self) -> Result<(), Error> {
        let fresh = self.provider.pairs().await?;
        *self.pairs.lock().await = fresh;
        Ok(())
    }

    pub fn next_key_index(&self) -> u32 {
        self.keys.next_index()
    }

    /// Override the key index counter, e.g. when several orchestrators share
    /// one seed.
    pub fn set_next_key_index(&self, next_index: u32) {
        self.keys.set_next_index(next_index);
    }

    fn new_record(
        &self,
        swap_id: String,
        kind: SwapKind,
        fee: u64,
        key_index: u32,
        refund_key_index: Option<u32>,
        provider_payload: String,
    ) -> SwapRecord {
        let now = crate::now_unix();
        SwapRecord {
            swap_id,
            kind,
            phase: SwapPhase::Created,
            fee,
            key_index,
            refund_key_index,
            key_source_id: self.keys.namespace().to_string(),
            provider_payload,
            claim_txid: None,
            refund_txid: None,
            claim_broadcasted: false,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Persist a freshly created record so a crash right after creation
    /// still leaves a resumable swap.
    fn persist_new(&self, record: &SwapRecord) -> Result<(), Error> {
        if let Some(store) = &self.store {
            store.put(record)?;
        }
        Ok(())
    }

    fn handle(&self, record: SwapRecord) -> Result<SwapHandle, Error> {
        SwapHandle::new(
            record,
            self.provider.clone(),
            self.wallet.clone(),
            self.store.clone(),
            self.active.clone(),
        )
    }

    fn check_liquid_address(&self, address: &elements::Address) -> Result<(), Error> {
        if address.params != self.network.address_params() {
            return Err(Error::AddressNetworkMismatch(address.to_string()));
        }
        Ok(())
    }

    fn check_chain_address(&self, address: &str, asset: ChainAsset) -> Result<(), Error> {
        match asset {
            ChainAsset::Liquid => {
                let parsed =
                    elements::Address::from_str(address).map_err(|e| Error::InvalidAddress {
                        address: address.to_string(),
                        reason: e.to_string(),
                    })?;
                self.check_liquid_address(&parsed)
            }
            ChainAsset::Bitcoin => {
                let parsed = address
                    .parse::<bitcoin::Address<bitcoin::address::NetworkUnchecked>>()
                    .map_err(|e| Error::InvalidAddress {
                        address: address.to_string(),
                        reason: e.to_string(),
                    })?;
                parsed
                    .require_network(bitcoin_network(self.network))
                    .map_err(|_| Error::AddressNetworkMismatch(address.to_string()))?;
                Ok(())
            }
        }
    }
}

fn bitcoin_network(network: ElementsNetwork) -> bitcoin::Network {
    match network {
        ElementsNetwork::Liquid => bitcoin::Network::Bitcoin,
        ElementsNetwork::LiquidTestnet => bitcoin::Network::Testnet,
        ElementsNetwork::ElementsRegtest { .. } => bitcoin::Network::Regtest,
    }
}

/// Builder for a [`SwapOrchestrator`].
pub struct SwapOrchestratorBuilder {
    network: ElementsNetwork,
    provider: Arc<dyn ProviderClient>,
    wallet: Arc<dyn WalletEngine>,
    seed: Option<Vec<u8>>,
    adapter: Option<Arc<dyn PersistenceAdapter>>,
    referral_id: Option<String>,
    webhook: Option<Webhook>,
    next_key_index: Option<u32>,
}

impl SwapOrchestratorBuilder {
    pub fn new(
        network: ElementsNetwork,
        provider: Arc<dyn ProviderClient>,
        wallet: Arc<dyn WalletEngine>,
    ) -> Self {
        Self {
            network,
            provider,
            wallet,
            seed: None,
            adapter: None,
            referral_id: None,
            webhook: None,
            next_key_index: None,
        }
    }

    /// Seed for the swap key source (16 to 64 bytes). Required. Keep it
    /// separate from the wallet's signing seed.
    pub fn seed(mut self, seed: &[u8]) -> Self {
        self.seed = Some(seed.to_vec());
        self
    }

    /// Persistence for swap records. Without a store, swaps are only
    /// resumable from blobs the caller kept via [`SwapHandle::serialize`].
    pub fn store(mut self, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn referral_id(mut self, referral_id: String) -> Self {
        self.referral_id = Some(referral_id);
        self
    }

    /// Default webhook registered with every created swap, letting the host
    /// trigger `advance` on push instead of polling.
    pub fn webhook(mut self, webhook: Webhook) -> Self {
        self.webhook = Some(webhook);
        self
    }

    /// Skip the provider round-trip that recovers the next key index.
    pub fn next_key_index(mut self, next_key_index: u32) -> Self {
        self.next_key_index = Some(next_key_index);
        self
    }

    /// Fetch the pair book, recover the key index if not given, and build.
    pub async fn build(self) -> Result<SwapOrchestrator, Error> {
        let seed = self
            .seed
            .ok_or_else(|| Error::InvalidSeed("a seed is required".to_string()))?;
        let keys = SwapKeySource::from_seed(&seed, self.network == ElementsNetwork::Liquid)?;

        match self.next_key_index {
            Some(index) => keys.set_next_index(index),
            None => {
                let index = self
                    .provider
                    .next_key_index(&keys.xpub().to_string())
                    .await?;
                keys.set_next_index(index);
            }
        }

        let pairs = self.provider.pairs().await?;
        let store = self
            .adapter
            .map(|adapter| SwapStore::new(adapter, keys.namespace()));

        Ok(SwapOrchestrator {
            network: self.network,
            provider: self.provider,
            wallet: self.wallet,
            keys,
            store,
            referral_id: self.referral_id,
            webhook: self.webhook,
            pairs: Mutex::new(pairs),
            active: ActiveSwaps::default(),
        })
    }
}
