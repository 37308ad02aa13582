//! Offers, bids, trades, and the fee-chain snapshot carried on every trade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A sell order posted into a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub price: f64,
    pub energy: f64,
    pub seller: String,
    pub seller_origin: String,
    pub seller_origin_id: String,
    pub seller_id: String,
    /// Pre-fee price, kept for fee-chain propagation across cascaded markets.
    pub original_offer_price: f64,
}

impl Offer {
    pub fn new(price: f64, energy: f64, seller: impl Into<String>) -> Self {
        let seller = seller.into();
        Self {
            id: new_id(),
            creation_time: Utc::now(),
            price,
            energy,
            seller_origin: seller.clone(),
            seller_origin_id: new_id(),
            seller_id: new_id(),
            seller,
            original_offer_price: price,
        }
    }

    pub fn energy_rate(&self) -> f64 {
        if self.energy <= 0.0 { 0.0 } else { self.price / self.energy }
    }

    /// Splits off `selected_energy` into an `accepted` offer that keeps this
    /// offer's id, returning `(accepted, residual)`. The residual is `None`
    /// when the whole offer is consumed.
    pub fn split(&self, selected_energy: f64) -> (Offer, Option<Offer>) {
        if (selected_energy - self.energy).abs() < 1e-8 || selected_energy >= self.energy {
            return (self.clone(), None);
        }
        let ratio = selected_energy / self.energy;
        let accepted = Offer {
            id: self.id.clone(),
            energy: selected_energy,
            price: self.price * ratio,
            original_offer_price: self.original_offer_price * ratio,
            ..self.clone()
        };
        let residual = Offer {
            id: new_id(),
            energy: self.energy - selected_energy,
            price: self.price * (1.0 - ratio),
            original_offer_price: self.original_offer_price * (1.0 - ratio),
            ..self.clone()
        };
        (accepted, Some(residual))
    }
}

/// A buy order posted into a two-sided market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub price: f64,
    pub energy: f64,
    pub buyer: String,
    pub buyer_origin: String,
    pub buyer_origin_id: String,
    pub buyer_id: String,
    pub original_bid_price: f64,
}

impl Bid {
    pub fn new(price: f64, energy: f64, buyer: impl Into<String>) -> Self {
        let buyer = buyer.into();
        Self {
            id: new_id(),
            creation_time: Utc::now(),
            price,
            energy,
            buyer_origin: buyer.clone(),
            buyer_origin_id: new_id(),
            buyer_id: new_id(),
            buyer,
            original_bid_price: price,
        }
    }

    pub fn energy_rate(&self) -> f64 {
        if self.energy <= 0.0 { 0.0 } else { self.price / self.energy }
    }

    pub fn split(&self, selected_energy: f64) -> (Bid, Option<Bid>) {
        if (selected_energy - self.energy).abs() < 1e-8 || selected_energy >= self.energy {
            return (self.clone(), None);
        }
        let ratio = selected_energy / self.energy;
        let accepted = Bid {
            id: self.id.clone(),
            energy: selected_energy,
            price: self.price * ratio,
            original_bid_price: self.original_bid_price * ratio,
            ..self.clone()
        };
        let residual = Bid {
            id: new_id(),
            energy: self.energy - selected_energy,
            price: self.price * (1.0 - ratio),
            original_bid_price: self.original_bid_price * (1.0 - ratio),
            ..self.clone()
        };
        (accepted, Some(residual))
    }
}

/// Snapshot of original and propagated bid/offer rates plus the final trade
/// rate, carried on every trade so cascaded markets can reconstruct the fee
/// chain without re-deriving it from the (already mutated) order prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeBidOfferInfo {
    pub original_bid_rate: f64,
    pub propagated_bid_rate: f64,
    pub original_offer_rate: f64,
    pub propagated_offer_rate: f64,
    pub trade_rate: f64,
}

impl TradeBidOfferInfo {
    pub fn new(
        original_bid_rate: f64,
        propagated_bid_rate: f64,
        original_offer_rate: f64,
        propagated_offer_rate: f64,
        trade_rate: f64,
    ) -> Self {
        Self {
            original_bid_rate,
            propagated_bid_rate,
            original_offer_rate,
            propagated_offer_rate,
            trade_rate,
        }
    }

    /// Rebuilds the info for upward propagation, ignoring fees accrued in the
    /// forwarding market so the source market's fee context is preserved.
    pub fn propagate_original_offer_info_on_bid_trade(&self, ignore_fees: bool) -> Self {
        if ignore_fees {
            Self {
                original_bid_rate: self.original_bid_rate,
                propagated_bid_rate: self.original_bid_rate,
                original_offer_rate: self.original_offer_rate,
                propagated_offer_rate: self.original_offer_rate,
                trade_rate: self.trade_rate,
            }
        } else {
            *self
        }
    }
}

/// An immutable, write-once settlement record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub offer: Offer,
    pub bid_id: Option<String>,
    pub seller: String,
    pub buyer: String,
    pub residual_offer: Option<Offer>,
    pub residual_bid: Option<Bid>,
    /// Portion of `offer.price` that accrued as grid fee in this market.
    pub fee_price: f64,
    pub trade_bid_offer_info: TradeBidOfferInfo,
    /// Set when this trade is the second half of an `accept_bid_offer_pair`
    /// call, so aggregate statistics are not double-counted.
    pub already_tracked: bool,
}

/// Events a market notifies its listeners with, fired synchronously after
/// the mutation that produced them commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    Offer { offer: Offer },
    OfferSplit { original_offer_id: String, accepted_offer: Offer, residual_offer: Offer },
    OfferDeleted { offer: Offer },
    OfferTraded { trade: Trade },
    Bid { bid: Bid },
    BidSplit { original_bid_id: String, accepted_bid: Bid, residual_bid: Bid },
    BidDeleted { bid: Bid },
    BidTraded { trade: Trade },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_split_preserves_id_on_accepted_fragment() {
        let offer = Offer::new(10.0, 2.0, "seller-1");
        let (accepted, residual) = offer.split(1.0);
        assert_eq!(accepted.id, offer.id);
        let residual = residual.expect("partial split must produce a residual");
        assert!((residual.energy + accepted.energy - offer.energy).abs() < 1e-8);
        assert!((residual.price + accepted.price - offer.price).abs() < 1e-8);
        assert_ne!(residual.id, offer.id);
    }

    #[test]
    fn offer_split_full_energy_has_no_residual() {
        let offer = Offer::new(10.0, 2.0, "seller-1");
        let (accepted, residual) = offer.split(2.0);
        assert_eq!(accepted.id, offer.id);
        assert!(residual.is_none());
    }
}
