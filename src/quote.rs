//! Fee and limit quoting for swap pairs.
//!
//! Pure computation over a cached [`PairBook`]; no provider round-trips
//! happen here.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Extra satoshis added to quotes that claim on Liquid, covering the larger
/// script-path transaction used when a cooperative claim fails.
pub const LIQUID_UNCOOPERATIVE_EXTRA: u64 = 3;

/// Source or destination of a swap leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapAsset {
    Lightning,
    Bitcoin,
    Liquid,
}

impl From<crate::wallet::ChainAsset> for SwapAsset {
    fn from(asset: crate::wallet::ChainAsset) -> Self {
        match asset {
            crate::wallet::ChainAsset::Bitcoin => SwapAsset::Bitcoin,
            crate::wallet::ChainAsset::Liquid => SwapAsset::Liquid,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PairLimits {
    pub minimal: u64,
    pub maximal: u64,
}

impl PairLimits {
    pub fn contains(&self, amount: u64) -> bool {
        (self.minimal..=self.maximal).contains(&amount)
    }
}

/// Fee data for on-chain -> Lightning swaps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubmarinePairInfo {
    /// Service fee rate in percent.
    pub percentage: f64,
    pub network_fee: u64,
    pub limits: PairLimits,
}

/// Fee data for Lightning -> on-chain swaps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReversePairInfo {
    pub percentage: f64,
    pub claim_fee: u64,
    pub lockup_fee: u64,
    pub limits: PairLimits,
}

/// Fee data for chain -> chain swaps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChainPairInfo {
    pub percentage: f64,
    pub server_fee: u64,
    pub claim_fee: u64,
    pub lockup_fee: u64,
    pub limits: PairLimits,
}

/// Snapshot of every pair the provider currently trades.
///
/// `None` means the pair is recognized but not currently available, which
/// quoting reports as [`Error::PairNotAvailable`] rather than
/// [`Error::InvalidSwapPair`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairBook {
    pub submarine: Option<SubmarinePairInfo>,
    pub reverse: Option<ReversePairInfo>,
    pub chain_btc_to_lbtc: Option<ChainPairInfo>,
    pub chain_lbtc_to_btc: Option<ChainPairInfo>,
}

/// Service fee in satoshis: `ceil(percentage * amount / 100)`.
pub(crate) fn service_fee(percentage: f64, amount: u64) -> u64 {
    ((percentage * amount as f64) / 100.0).ceil() as u64
}

/// Quote result: how much goes in, how much comes out, and why.
#[derive(Debug, Clone)]
pub struct Quote {
    pub send_amount: u64,
    pub receive_amount: u64,
    pub network_fee: u64,
    pub service_fee: u64,
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Copy)]
enum QuoteMode {
    BySendAmount(u64),
    ByReceiveAmount(u64),
}

/// Builder for a [`Quote`].
///
/// Created via [`SwapOrchestrator::quote`] or
/// [`SwapOrchestrator::quote_receive`], or directly from a [`PairBook`].
///
/// [`SwapOrchestrator::quote`]: crate::swap::SwapOrchestrator::quote
/// [`SwapOrchestrator::quote_receive`]: crate::swap::SwapOrchestrator::quote_receive
pub struct QuoteBuilder {
    mode: QuoteMode,
    from: Option<SwapAsset>,
    to: Option<SwapAsset>,
    book: PairBook,
}

impl QuoteBuilder {
    /// Quote by send amount: how much will be received.
    pub fn new_send(send_amount: u64, book: PairBook) -> Self {
        Self {
            mode: QuoteMode::BySendAmount(send_amount),
            from: None,
            to: None,
            book,
        }
    }

    /// Quote by receive amount: how much must be sent.
    pub fn new_receive(receive_amount: u64, book: PairBook) -> Self {
        Self {
            mode: QuoteMode::ByReceiveAmount(receive_amount),
            from: None,
            to: None,
            book,
        }
    }

    pub fn send(mut self, asset: SwapAsset) -> Self {
        self.from = Some(asset);
        self
    }

    pub fn receive(mut self, asset: SwapAsset) -> Self {
        self.to = Some(asset);
        self
    }

    /// Resolve the pair and compute the quote.
    pub fn build(self) -> Result<Quote, Error> {
        let from = self.from.ok_or(Error::MissingQuoteParam("send"))?;
        let to = self.to.ok_or(Error::MissingQuoteParam("receive"))?;

        let (percentage, network_fee, limits) = match (from, to) {
            (SwapAsset::Lightning, SwapAsset::Liquid) => {
                let pair = self.book.reverse.ok_or(Error::PairNotAvailable)?;
                let network_fee = pair.claim_fee + pair.lockup_fee + LIQUID_UNCOOPERATIVE_EXTRA;
                (pair.percentage, network_fee, pair.limits)
            }
            (SwapAsset::Liquid, SwapAsset::Lightning) => {
                let pair = self.book.submarine.ok_or(Error::PairNotAvailable)?;
                (pair.percentage, pair.network_fee, pair.limits)
            }
            (SwapAsset::Bitcoin, SwapAsset::Liquid) => {
                let pair = self.book.chain_btc_to_lbtc.ok_or(Error::PairNotAvailable)?;
                let network_fee = pair.server_fee + pair.claim_fee + LIQUID_UNCOOPERATIVE_EXTRA;
                (pair.percentage, network_fee, pair.limits)
            }
            (SwapAsset::Liquid, SwapAsset::Bitcoin) => {
                let pair = self.book.chain_lbtc_to_btc.ok_or(Error::PairNotAvailable)?;
                let network_fee = pair.server_fee + pair.claim_fee;
                (pair.percentage, network_fee, pair.limits)
            }
            _ => return Err(Error::InvalidSwapPair { from, to }),
        };

        let (send_amount, receive_amount, fee) = match self.mode {
            QuoteMode::BySendAmount(send) => {
                let fee = service_fee(percentage, send);
                let receive = send.saturating_sub(fee + network_fee);
                (send, receive, fee)
            }
            QuoteMode::ByReceiveAmount(receive) => {
                let send = calculate_send_amount(receive, network_fee, percentage);
                let fee = service_fee(percentage, send);
                (send, receive, fee)
            }
        };

        Ok(Quote {
            send_amount,
            receive_amount,
            network_fee,
            service_fee: fee,
            min: limits.minimal,
            max: limits.maximal,
        })
    }
}

/// Minimal send amount reaching a desired receive amount.
///
/// Inverts `receive = send - ceil(percentage * send / 100) - network_fee`:
/// `send = ceil((receive + network_fee) / (1 - percentage / 100))`.
fn calculate_send_amount(receive_amount: u64, network_fee: u64, percentage: f64) -> u64 {
    let base = receive_amount + network_fee;
    let rate = 1.0 - percentage / 100.0;
    (base as f64 / rate).ceil() as u64
}
