use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use bitcoin::NetworkKind;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::key::Keypair;
use bitcoin::secp256k1::{All, Secp256k1};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Derivation path prefix for swap keypairs: `m/44/0/0/0/{index}`.
///
/// Unhardened on purpose: the xpub alone identifies the account to the
/// provider, and rescue tooling can enumerate keys without the seed.
const SWAP_DERIVATION_PREFIX: [u32; 4] = [44, 0, 0, 0];

/// Dedicated key material for swap secrets, separate from the wallet's
/// signing keys.
///
/// One seed yields the refund/claim keypairs and preimages for every swap
/// the orchestrator creates, indexed by a monotonically increasing counter.
/// Exporting the seed (see [`SwapKeySource::rescue_material`]) is enough to
/// recover all of them without the swap store.
pub struct SwapKeySource {
    secp: Secp256k1<All>,
    seed: Vec<u8>,
    master: Xpriv,
    xpub: Xpub,
    next_index: AtomicU32,
}

impl SwapKeySource {
    /// Build a key source from raw seed bytes (16 to 64 bytes).
    pub fn from_seed(seed: &[u8], mainnet: bool) -> Result<Self, Error> {
        if !(16..=64).contains(&seed.len()) {
            return Err(Error::InvalidSeed(format!(
                "seed must be 16 to 64 bytes, got {}",
                seed.len()
            )));
        }
        let network_kind = if mainnet {
            NetworkKind::Main
        } else {
            NetworkKind::Test
        };
        let secp = Secp256k1::new();
        let master = Xpriv::new_master(network_kind, seed)
            .map_err(|e| Error::InvalidSeed(e.to_string()))?;
        let xpub = Xpub::from_priv(&secp, &master);
        Ok(Self {
            secp,
            seed: seed.to_vec(),
            master,
            xpub,
            next_index: AtomicU32::new(0),
        })
    }

    pub fn from_seed_hex(seed_hex: &str, mainnet: bool) -> Result<Self, Error> {
        let seed = hex::decode(seed_hex).map_err(|e| Error::InvalidSeed(e.to_string()))?;
        Self::from_seed(&seed, mainnet)
    }

    pub fn xpub(&self) -> &Xpub {
        &self.xpub
    }

    pub fn namespace(&self) -> WalletNamespace {
        WalletNamespace::from_xpub(&self.xpub)
    }

    /// Derive the swap keypair at a fixed index.
    pub fn keypair_at(&self, index: u32) -> Result<Keypair, Error> {
        let mut path = Vec::with_capacity(SWAP_DERIVATION_PREFIX.len() + 1);
        for n in SWAP_DERIVATION_PREFIX {
            path.push(ChildNumber::from_normal_idx(n)?);
        }
        path.push(ChildNumber::from_normal_idx(index)?);
        let derived = self.master.derive_priv(&self.secp, &DerivationPath::from(path))?;
        let keypair = Keypair::from_seckey_slice(&self.secp, &derived.private_key.secret_bytes())
            .map_err(|e| Error::InvalidSeed(e.to_string()))?;
        Ok(keypair)
    }

    /// Reserve the next unused index and derive its keypair.
    pub fn next_keypair(&self) -> Result<(u32, Keypair), Error> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let keypair = self.keypair_at(index)?;
        Ok((index, keypair))
    }

    pub fn next_index(&self) -> u32 {
        self.next_index.load(Ordering::Relaxed)
    }

    /// Override the index counter, e.g. after recovering it from the
    /// provider's account listing. Needed when several orchestrators share
    /// one seed.
    pub fn set_next_index(&self, next_index: u32) {
        self.next_index.store(next_index, Ordering::Relaxed);
    }

    /// Deterministic preimage for a swap keypair.
    pub fn preimage(keypair: &Keypair) -> [u8; 32] {
        sha256::Hash::hash(&keypair.secret_bytes()).to_byte_array()
    }

    pub fn preimage_hash(preimage: &[u8; 32]) -> [u8; 32] {
        sha256::Hash::hash(preimage).to_byte_array()
    }

    /// Self-contained secret material to recover refund/claim rights for
    /// every swap derived from this source. Independent of the swap store.
    pub fn rescue_material(&self) -> RescueMaterial {
        RescueMaterial {
            version: 1,
            seed: hex::encode(&self.seed),
            derivation_path: "m/44/0/0/0".to_string(),
            next_index: self.next_index(),
        }
    }
}

/// Exported rescue blob, see [`SwapKeySource::rescue_material`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescueMaterial {
    pub version: u32,
    pub seed: String,
    pub derivation_path: String,
    pub next_index: u32,
}

impl RescueMaterial {
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Scopes store keys to one wallet so multiple wallets can share a
/// persistence adapter without colliding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletNamespace(String);

impl WalletNamespace {
    const TAG: &'static [u8] = b"ln-chain-swap:namespace:";

    pub fn from_xpub(xpub: &Xpub) -> Self {
        let mut data = Self::TAG.to_vec();
        data.extend_from_slice(xpub.to_string().as_bytes());
        let hash = sha256::Hash::hash(&data);
        WalletNamespace(hex::encode(&hash.to_byte_array()[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
