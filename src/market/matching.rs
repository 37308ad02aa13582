//! Matching engine (C3): pay-as-bid, pay-as-clear, and the external-matcher
//! selector, all producing `(bid_id, offer_id, energy, rate)` recommendations
//! for `Market::match_recommendation`.

use crate::market::model::{Bid, Offer};
use crate::shared::domain::errors::MarketError;
use serde::{Deserialize, Serialize};

/// One matched pairing: `bid_id`, `offer_id`, the energy to transfer, and the
/// rate the trade settles at.
pub type Recommendation = (String, String, f64, f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchingAlgorithmKind {
    PayAsBid,
    PayAsClear,
    External,
}

pub trait MatchingAlgorithm {
    fn calculate_match_recommendation(&self, bids: &[Bid], offers: &[Offer]) -> Vec<Recommendation>;
}

/// Selects the concrete matcher for a configured algorithm kind, mirroring
/// the three-way branch that picks a matcher at startup; an unrecognized
/// combination is a `WrongMarketType` configuration error.
pub fn select_matcher(kind: MatchingAlgorithmKind) -> Result<Box<dyn MatchingAlgorithm>, MarketError> {
    match kind {
        MatchingAlgorithmKind::PayAsBid => Ok(Box::new(PayAsBidMatcher)),
        MatchingAlgorithmKind::PayAsClear => Ok(Box::new(PayAsClearMatcher)),
        MatchingAlgorithmKind::External => Ok(Box::new(ExternalMatcher)),
    }
}

pub struct PayAsBidMatcher;

impl MatchingAlgorithm for PayAsBidMatcher {
    fn calculate_match_recommendation(&self, bids: &[Bid], offers: &[Offer]) -> Vec<Recommendation> {
        let mut offers: Vec<(Offer, f64)> = offers.iter().cloned().map(|o| (o, 0.0)).collect();
        offers.sort_by(|a, b| a.0.energy_rate().partial_cmp(&b.0.energy_rate()).unwrap());

        let mut bids: Vec<(Bid, f64)> = bids.iter().cloned().map(|b| (b, 0.0)).collect();
        bids.sort_by(|a, b| b.0.energy_rate().partial_cmp(&a.0.energy_rate()).unwrap());

        let mut recommendations = Vec::new();

        for (offer, offer_consumed) in offers.iter_mut() {
            for (bid, bid_consumed) in bids.iter_mut() {
                let offer_remaining = offer.energy - *offer_consumed;
                if offer_remaining <= 1e-8 {
                    break;
                }
                let bid_remaining = bid.energy - *bid_consumed;
                if bid_remaining <= 1e-8 {
                    continue;
                }
                if bid.buyer == offer.seller {
                    continue;
                }
                if bid.energy_rate() + 1e-8 < offer.energy_rate() {
                    continue;
                }
                let selected_energy = offer_remaining.min(bid_remaining);
                let trade_rate = bid.energy_rate();
                recommendations.push((bid.id.clone(), offer.id.clone(), selected_energy, trade_rate));
                *offer_consumed += selected_energy;
                *bid_consumed += selected_energy;
            }
        }

        recommendations
    }
}

pub struct PayAsClearMatcher;

impl MatchingAlgorithm for PayAsClearMatcher {
    fn calculate_match_recommendation(&self, bids: &[Bid], offers: &[Offer]) -> Vec<Recommendation> {
        let mut offers: Vec<Offer> = offers.to_vec();
        offers.sort_by(|a, b| a.energy_rate().partial_cmp(&b.energy_rate()).unwrap());
        let mut bids: Vec<Bid> = bids.to_vec();
        bids.sort_by(|a, b| b.energy_rate().partial_cmp(&a.energy_rate()).unwrap());

        let clearing_rate = match find_clearing_rate(&bids, &offers) {
            Some(rate) => rate,
            None => return Vec::new(),
        };

        let mut eligible_offers: Vec<(Offer, f64)> = offers
            .into_iter()
            .filter(|o| o.energy_rate() <= clearing_rate + 1e-8)
            .map(|o| (o, 0.0))
            .collect();
        let mut eligible_bids: Vec<(Bid, f64)> = bids
            .into_iter()
            .filter(|b| b.energy_rate() >= clearing_rate - 1e-8)
            .map(|b| (b, 0.0))
            .collect();

        let mut recommendations = Vec::new();
        let mut offer_idx = 0;
        let mut bid_idx = 0;

        while offer_idx < eligible_offers.len() && bid_idx < eligible_bids.len() {
            let (offer, offer_consumed) = &mut eligible_offers[offer_idx];
            let (bid, bid_consumed) = &mut eligible_bids[bid_idx];

            if bid.buyer == offer.seller {
                bid_idx += 1;
                continue;
            }

            let offer_remaining = offer.energy - *offer_consumed;
            let bid_remaining = bid.energy - *bid_consumed;
            let selected_energy = offer_remaining.min(bid_remaining);
            if selected_energy > 1e-8 {
                recommendations.push((bid.id.clone(), offer.id.clone(), selected_energy, clearing_rate));
                *offer_consumed += selected_energy;
                *bid_consumed += selected_energy;
            }

            if offer.energy - *offer_consumed <= 1e-8 {
                offer_idx += 1;
            }
            if bid.energy - *bid_consumed <= 1e-8 {
                bid_idx += 1;
            }
        }

        recommendations
    }
}

/// Finds the uniform clearing price: the highest offer rate at which
/// cumulative supply still does not exceed cumulative demand. Returns `None`
/// when the curves do not cross (no eligible trade exists).
fn find_clearing_rate(bids_desc: &[Bid], offers_asc: &[Offer]) -> Option<f64> {
    let mut cumulative_supply = 0.0;
    let mut cumulative_demand: f64 = bids_desc.iter().map(|b| b.energy).sum();
    let mut last_accepted_rate = None;

    let mut bid_iter = bids_desc.iter().peekable();
    for offer in offers_asc {
        cumulative_supply += offer.energy;
        while let Some(bid) = bid_iter.peek() {
            if bid.energy_rate() >= offer.energy_rate() {
                break;
            }
            cumulative_demand -= bid.energy;
            bid_iter.next();
        }
        if cumulative_supply <= cumulative_demand + 1e-8 {
            last_accepted_rate = Some(offer.energy_rate());
        } else {
            break;
        }
    }
    last_accepted_rate
}

/// Delegates to an external process over the message bus; the recommendations
/// it returns are revalidated by `Market::accept_bid_offer_pair` regardless.
pub struct ExternalMatcher;

impl MatchingAlgorithm for ExternalMatcher {
    fn calculate_match_recommendation(&self, _bids: &[Bid], _offers: &[Offer]) -> Vec<Recommendation> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pay_as_bid_matches_highest_bid_to_cheapest_offer_at_bid_rate() {
        let offer = Offer::new(10.0, 2.0, "seller");
        let bid = Bid::new(12.0, 1.0, "buyer");
        let recs = PayAsBidMatcher.calculate_match_recommendation(&[bid.clone()], &[offer.clone()]);
        assert_eq!(recs.len(), 1);
        let (bid_id, offer_id, energy, rate) = &recs[0];
        assert_eq!(bid_id, &bid.id);
        assert_eq!(offer_id, &offer.id);
        assert!((*energy - 1.0).abs() < 1e-8);
        assert!((*rate - 12.0).abs() < 1e-8);
    }

    #[test]
    fn pay_as_bid_skips_self_loop() {
        let offer = Offer::new(10.0, 2.0, "same-agent");
        let bid = Bid::new(12.0, 1.0, "same-agent");
        let recs = PayAsBidMatcher.calculate_match_recommendation(&[bid], &[offer]);
        assert!(recs.is_empty());
    }

    #[test]
    fn pay_as_clear_settles_all_eligible_trades_at_uniform_rate() {
        let offer1 = Offer::new(10.0, 1.0, "seller-1");
        let offer2 = Offer::new(24.0, 2.0, "seller-2");
        let bid1 = Bid::new(15.0, 1.0, "buyer-1");
        let bid2 = Bid::new(13.0, 1.0, "buyer-2");

        let recs = PayAsClearMatcher
            .calculate_match_recommendation(&[bid1, bid2], &[offer1, offer2]);
        assert!(!recs.is_empty());
        let rates: Vec<f64> = recs.iter().map(|(_, _, _, rate)| *rate).collect();
        let first = rates[0];
        assert!(rates.iter().all(|r| (r - first).abs() < 1e-8));
    }
}
