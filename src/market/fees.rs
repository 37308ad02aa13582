//! Fee engine (C2): applies grid fees on bid/offer ingress and splits trade
//! revenue between buyer, seller, and the market's accumulated fee.

use crate::market::model::TradeBidOfferInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeType {
    /// A flat currency-per-kWh surcharge.
    Constant,
    /// A percentage of the posted rate.
    Percentage,
}

#[derive(Debug, Clone, Copy)]
pub struct FeePolicy {
    pub fee_type: FeeType,
    pub constant_fee_per_kwh: f64,
    pub percentage_fee: f64,
}

impl FeePolicy {
    pub fn none() -> Self {
        Self { fee_type: FeeType::Constant, constant_fee_per_kwh: 0.0, percentage_fee: 0.0 }
    }

    /// Adjusts an incoming offer price with this market's fee. Offers get
    /// more expensive under both fee variants (the fee is paid by the buyer
    /// on top of the seller's ask).
    pub fn update_incoming_offer_with_fee(&self, price: f64, energy: f64) -> f64 {
        match self.fee_type {
            FeeType::Constant => price + self.constant_fee_per_kwh * energy,
            FeeType::Percentage => price * (1.0 + self.percentage_fee),
        }
    }

    /// Adjusts an incoming bid price with this market's fee. Under the
    /// constant-fee variant the fee is layered the same way as for offers;
    /// under the percentage variant bids are left untouched (the fee is
    /// levied against the offer side only).
    pub fn update_incoming_bid_with_fee(&self, price: f64, energy: f64) -> f64 {
        match self.fee_type {
            FeeType::Constant => price + self.constant_fee_per_kwh * energy,
            FeeType::Percentage => price,
        }
    }

    /// Computes `(revenue, fee_price)` for a trade settling `energy` kWh at
    /// `trade_rate`. `original_offer_rate` must be the offer's pre-fee rate
    /// (`Offer::original_offer_price / energy`, or the equivalent carried in a
    /// `TradeBidOfferInfo.propagated_offer_rate`) — passing the already
    /// fee-adjusted posted rate, or `trade_rate` itself, always collapses the
    /// percentage-fee split to zero.
    pub fn settle_trade(&self, energy: f64, trade_rate: f64, original_offer_rate: f64) -> (f64, f64) {
        let revenue = trade_rate * energy;
        match self.fee_type {
            FeeType::Constant => {
                let fee_price = self.constant_fee_per_kwh * energy;
                (revenue, fee_price)
            }
            FeeType::Percentage => {
                let grid_fee_rate = trade_rate - original_offer_rate;
                let fee_price = grid_fee_rate.max(0.0) * energy;
                (revenue, fee_price)
            }
        }
    }

    /// Rebuilds a `TradeBidOfferInfo` for upward propagation to a parent
    /// market, optionally stripping this market's fee context so the parent
    /// sees the original source-market rates.
    pub fn propagate_trade_bid_offer_info(&self, info: &TradeBidOfferInfo, ignore_fees: bool) -> TradeBidOfferInfo {
        info.propagate_original_offer_info_on_bid_trade(ignore_fees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_fee_adds_flat_surcharge_to_offer() {
        let policy = FeePolicy { fee_type: FeeType::Constant, constant_fee_per_kwh: 0.5, percentage_fee: 0.0 };
        let adjusted = policy.update_incoming_offer_with_fee(10.0, 2.0);
        assert!((adjusted - 11.0).abs() < 1e-8);
    }

    #[test]
    fn percentage_fee_scales_offer_and_leaves_bid_untouched() {
        let policy = FeePolicy { fee_type: FeeType::Percentage, constant_fee_per_kwh: 0.0, percentage_fee: 0.1 };
        let adjusted_offer = policy.update_incoming_offer_with_fee(10.0, 2.0);
        assert!((adjusted_offer - 11.0).abs() < 1e-8);
        let adjusted_bid = policy.update_incoming_bid_with_fee(10.0, 2.0);
        assert!((adjusted_bid - 10.0).abs() < 1e-8);
    }

    #[test]
    fn settle_trade_constant_fee_matches_per_kwh_rate() {
        let policy = FeePolicy { fee_type: FeeType::Constant, constant_fee_per_kwh: 0.5, percentage_fee: 0.0 };
        let (revenue, fee) = policy.settle_trade(2.0, 6.0, 5.0);
        assert!((revenue - 12.0).abs() < 1e-8);
        assert!((fee - 1.0).abs() < 1e-8);
    }

    #[test]
    fn settle_trade_percentage_fee_is_the_spread_over_the_pre_fee_offer_rate() {
        let policy = FeePolicy { fee_type: FeeType::Percentage, constant_fee_per_kwh: 0.0, percentage_fee: 0.1 };
        // trade_rate=6.0 clears above the 5.0/kWh pre-fee offer rate; the gap
        // over `energy` kWh is the grid fee, not zero.
        let (revenue, fee) = policy.settle_trade(2.0, 6.0, 5.0);
        assert!((revenue - 12.0).abs() < 1e-8);
        assert!((fee - 2.0).abs() < 1e-8);
    }

    #[test]
    fn settle_trade_percentage_fee_never_goes_negative_when_rate_undercuts_offer() {
        let policy = FeePolicy { fee_type: FeeType::Percentage, constant_fee_per_kwh: 0.0, percentage_fee: 0.1 };
        let (_, fee) = policy.settle_trade(2.0, 4.0, 5.0);
        assert!((fee - 0.0).abs() < 1e-8);
    }
}
