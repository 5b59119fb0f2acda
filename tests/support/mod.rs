//! Scripted provider and wallet fakes for driving the orchestrator without
//! a network.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};
use lwk_wollet::ElementsNetwork;
use lwk_wollet::elements;

use ln_chain_swap::error::Error;
use ln_chain_swap::provider::{
    ChainCreated, ChainRequest, DirectPayment, ProviderClient, ProviderState, ProviderUpdate,
    ReverseCreated, ReverseRequest, SubmarineCreated, SubmarineRequest, SwapSummary,
};
use ln_chain_swap::quote::{
    ChainPairInfo, PairBook, PairLimits, ReversePairInfo, SubmarinePairInfo,
};
use ln_chain_swap::wallet::{ChainAsset, SignedTransaction, WalletEngine};
use ln_chain_swap::{MemoryAdapter, SwapOrchestrator};

pub const SEED: [u8; 32] = [9u8; 32];

const PAYLOAD_PREFIX: &str = "payload:";

pub fn pair_book() -> PairBook {
    PairBook {
        submarine: Some(SubmarinePairInfo {
            percentage: 0.1,
            network_fee: 19,
            limits: PairLimits {
                minimal: 1_000,
                maximal: 25_000_000,
            },
        }),
        reverse: Some(ReversePairInfo {
            percentage: 0.25,
            claim_fee: 20,
            lockup_fee: 27,
            limits: PairLimits {
                minimal: 100,
                maximal: 25_000_000,
            },
        }),
        chain_btc_to_lbtc: Some(ChainPairInfo {
            percentage: 0.1,
            server_fee: 480,
            claim_fee: 20,
            lockup_fee: 462,
            limits: PairLimits {
                minimal: 25_000,
                maximal: 25_000_000,
            },
        }),
        chain_lbtc_to_btc: Some(ChainPairInfo {
            percentage: 0.1,
            server_fee: 481,
            claim_fee: 333,
            lockup_fee: 27,
            limits: PairLimits {
                minimal: 25_000,
                maximal: 25_000_000,
            },
        }),
    }
}

fn service_fee(percentage: f64, amount: u64) -> u64 {
    ((percentage * amount as f64) / 100.0).ceil() as u64
}

/// Mint a signed regtest invoice committing to `payment_hash`.
pub fn mint_invoice(amount_sats: u64, payment_hash: [u8; 32]) -> String {
    let secp = Secp256k1::new();
    let private_key = SecretKey::from_slice(&[41u8; 32]).expect("static key");

    InvoiceBuilder::new(Currency::Regtest)
        .description("swap test invoice".to_string())
        .payment_hash(sha256::Hash::from_byte_array(payment_hash))
        .payment_secret(PaymentSecret([42u8; 32]))
        .amount_milli_satoshis(amount_sats * 1000)
        .current_timestamp()
        .min_final_cltv_expiry_delta(144)
        .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &private_key))
        .expect("build invoice")
        .to_string()
}

pub fn liquid_address() -> elements::Address {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[5u8; 32]).expect("static key");
    let pk = bitcoin::PublicKey::new(sk.public_key(&secp));
    elements::Address::p2wpkh(&pk, None, &elements::AddressParams::ELEMENTS)
}

pub fn bitcoin_address() -> String {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[6u8; 32]).expect("static key");
    let pk = bitcoin::key::CompressedPublicKey(sk.public_key(&secp));
    bitcoin::Address::p2wpkh(&pk, bitcoin::Network::Regtest).to_string()
}

#[derive(Default)]
struct FakeProviderState {
    updates: HashMap<String, VecDeque<ProviderUpdate>>,
    poll_counts: HashMap<String, u32>,
    magic_hints: HashMap<String, DirectPayment>,
    forgotten: HashSet<String>,
    summaries: Vec<SwapSummary>,
    created_submarines: u32,
}

/// In-memory provider with per-swap scripted status updates.
pub struct FakeProvider {
    book: PairBook,
    state: Mutex<FakeProviderState>,
    counter: AtomicU32,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            book: pair_book(),
            state: Mutex::new(FakeProviderState::default()),
            counter: AtomicU32::new(0),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        // uuids mirror real provider ids; the prefix keeps failures readable
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}{n}-{}", uuid::Uuid::new_v4().simple())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeProviderState> {
        self.state.lock().expect("fake provider mutex poisoned")
    }

    /// Queue the next status update for a swap.
    pub fn push(&self, swap_id: &str, state: ProviderState) {
        self.push_with_reason(swap_id, state, None);
    }

    pub fn push_with_reason(
        &self,
        swap_id: &str,
        state: ProviderState,
        failure_reason: Option<&str>,
    ) {
        let mut inner = self.lock();
        inner
            .updates
            .entry(swap_id.to_string())
            .or_default()
            .push_back(ProviderUpdate {
                swap_id: swap_id.to_string(),
                state,
                failure_reason: failure_reason.map(|s| s.to_string()),
            });
    }

    /// Make `restore` fail with [`Error::SwapExpired`] for this swap.
    pub fn forget(&self, swap_id: &str) {
        self.lock().forgotten.insert(swap_id.to_string());
    }

    pub fn set_magic_hint(&self, invoice: &str, address: &str, amount: u64) {
        self.lock().magic_hints.insert(
            invoice.to_string(),
            DirectPayment {
                address: address.to_string(),
                amount,
            },
        );
    }

    pub fn poll_count(&self, swap_id: &str) -> u32 {
        self.lock().poll_counts.get(swap_id).copied().unwrap_or(0)
    }

    pub fn created_submarines(&self) -> u32 {
        self.lock().created_submarines
    }

    fn record_summary(&self, swap_id: &str, kind: &str, from: &str, to: &str) {
        self.lock().summaries.push(SwapSummary {
            swap_id: swap_id.to_string(),
            kind: kind.to_string(),
            status: "swap.created".to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }
}

fn payload_for(swap_id: &str) -> String {
    format!("{PAYLOAD_PREFIX}{swap_id}")
}

fn swap_id_from_payload(payload: &str) -> Result<&str, Error> {
    payload
        .strip_prefix(PAYLOAD_PREFIX)
        .ok_or_else(|| Error::Provider(format!("malformed payload: {payload}")))
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn pairs(&self) -> Result<PairBook, Error> {
        Ok(self.book.clone())
    }

    async fn create_submarine(&self, req: SubmarineRequest) -> Result<SubmarineCreated, Error> {
        let invoice: lightning_invoice::Bolt11Invoice = req.invoice.parse()?;
        let invoice_amount = invoice
            .amount_milli_satoshis()
            .ok_or_else(|| Error::InvoiceWithoutAmount(req.invoice.clone()))?
            / 1000;

        let pair = self.book.submarine.ok_or(Error::PairNotAvailable)?;
        let expected_amount =
            invoice_amount + pair.network_fee + service_fee(pair.percentage, invoice_amount);

        let swap_id = self.next_id("sub");
        self.record_summary(&swap_id, "submarine", "L-BTC", "BTC");
        self.lock().created_submarines += 1;

        Ok(SubmarineCreated {
            swap_id: swap_id.clone(),
            lockup_address: format!("lockup-{swap_id}"),
            expected_amount,
            accept_zero_conf: false,
            payload: payload_for(&swap_id),
        })
    }

    async fn create_reverse(&self, req: ReverseRequest) -> Result<ReverseCreated, Error> {
        let pair = self.book.reverse.ok_or(Error::PairNotAvailable)?;
        if !pair.limits.contains(req.invoice_amount) {
            return Err(Error::AmountOutOfRange {
                amount: req.invoice_amount,
                min: pair.limits.minimal,
                max: pair.limits.maximal,
            });
        }

        let network_fee = pair.claim_fee + pair.lockup_fee + 3;
        let onchain_amount = req.invoice_amount
            - network_fee
            - service_fee(pair.percentage, req.invoice_amount);

        let mut payment_hash = [0u8; 32];
        hex::decode_to_slice(&req.preimage_hash, &mut payment_hash)
            .map_err(|e| Error::Provider(format!("bad preimage hash: {e}")))?;
        let invoice = mint_invoice(req.invoice_amount, payment_hash);

        let swap_id = self.next_id("rev");
        self.record_summary(&swap_id, "reverse", "BTC", "L-BTC");

        Ok(ReverseCreated {
            swap_id: swap_id.clone(),
            invoice,
            lockup_address: format!("lockup-{swap_id}"),
            onchain_amount,
            payload: payload_for(&swap_id),
        })
    }

    async fn create_chain(&self, req: ChainRequest) -> Result<ChainCreated, Error> {
        let pair = match req.from {
            ChainAsset::Bitcoin => self.book.chain_btc_to_lbtc,
            ChainAsset::Liquid => self.book.chain_lbtc_to_btc,
        }
        .ok_or(Error::PairNotAvailable)?;

        let claim_amount = req.lockup_amount
            - pair.server_fee
            - pair.claim_fee
            - service_fee(pair.percentage, req.lockup_amount);

        let swap_id = self.next_id("chn");
        self.record_summary(
            &swap_id,
            "chain",
            &req.from.to_string(),
            &req.to.to_string(),
        );

        Ok(ChainCreated {
            swap_id: swap_id.clone(),
            lockup_address: format!("lockup-{swap_id}"),
            expected_lockup_amount: req.lockup_amount,
            claim_amount,
            payload: payload_for(&swap_id),
        })
    }

    async fn magic_routing_hint(&self, invoice: &str) -> Result<Option<DirectPayment>, Error> {
        Ok(self.lock().magic_hints.get(invoice).cloned())
    }

    async fn poll(&self, payload: &str) -> Result<ProviderUpdate, Error> {
        let swap_id = swap_id_from_payload(payload)?.to_string();
        let mut inner = self.lock();
        *inner.poll_counts.entry(swap_id.clone()).or_default() += 1;
        inner
            .updates
            .get_mut(&swap_id)
            .and_then(|queue| queue.pop_front())
            .ok_or(Error::NoProviderUpdate)
    }

    async fn restore(&self, payload: &str) -> Result<String, Error> {
        let swap_id = swap_id_from_payload(payload)?;
        if self.lock().forgotten.contains(swap_id) {
            return Err(Error::SwapExpired(swap_id.to_string()));
        }
        Ok(payload.to_string())
    }

    async fn list_account_swaps(&self, _account_key: &str) -> Result<Vec<SwapSummary>, Error> {
        Ok(self.lock().summaries.clone())
    }

    async fn next_key_index(&self, _account_key: &str) -> Result<u32, Error> {
        Ok(0)
    }
}

/// Records every on-chain leg the state machine asks for.
#[derive(Default)]
pub struct FakeWallet {
    legs: Mutex<Vec<(String, u64, ChainAsset)>>,
    counter: AtomicU32,
}

impl FakeWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn legs(&self) -> Vec<(String, u64, ChainAsset)> {
        self.legs.lock().expect("fake wallet mutex poisoned").clone()
    }

    pub fn broadcast_count(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl WalletEngine for FakeWallet {
    async fn current_receive_address(&self) -> Result<String, Error> {
        Ok(liquid_address().to_string())
    }

    async fn build_and_sign_onchain_leg(
        &self,
        recipient: &str,
        amount: u64,
        asset: ChainAsset,
    ) -> Result<SignedTransaction, Error> {
        self.legs
            .lock()
            .expect("fake wallet mutex poisoned")
            .push((recipient.to_string(), amount, asset));
        Ok(SignedTransaction(recipient.as_bytes().to_vec()))
    }

    async fn broadcast(&self, _tx: &SignedTransaction) -> Result<String, Error> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("txid-{n}"))
    }
}

pub struct TestRig {
    pub orchestrator: SwapOrchestrator,
    pub provider: Arc<FakeProvider>,
    pub wallet: Arc<FakeWallet>,
    pub adapter: Arc<MemoryAdapter>,
}

/// Orchestrator over a memory store, scripted provider and fake wallet.
pub async fn rig() -> TestRig {
    rig_with_seed(&SEED).await
}

pub async fn rig_with_seed(seed: &[u8]) -> TestRig {
    let provider = Arc::new(FakeProvider::new());
    let wallet = Arc::new(FakeWallet::new());
    let adapter = Arc::new(MemoryAdapter::new());

    let orchestrator = SwapOrchestrator::builder(
        ElementsNetwork::default_regtest(),
        provider.clone(),
        wallet.clone(),
    )
    .seed(seed)
    .store(adapter.clone())
    .build()
    .await
    .expect("build orchestrator");

    TestRig {
        orchestrator,
        provider,
        wallet,
        adapter,
    }
}
