//! The Market aggregate (C1): custody of open offers/bids and settled trades
//! for a single time slot, with fee-adjusted ingress and the accept/split
//! state machine.

use crate::market::fees::FeePolicy;
use crate::market::model::{Bid, MarketEvent, Offer, Trade, TradeBidOfferInfo};
use crate::shared::domain::errors::{MarketError, MarketResult};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ENERGY_TOLERANCE: f64 = 1e-8;

/// A listener invoked synchronously, after the mutation that produced the
/// event commits, in registration order.
pub type MarketListener = Arc<dyn Fn(&MarketEvent) + Send + Sync>;

/// The per-slot market. One-sided markets only use the offer-side operations;
/// two-sided markets additionally accept bids and matched pairs.
pub struct Market {
    pub id: String,
    pub time_slot: DateTime<Utc>,
    pub two_sided: bool,
    pub fee_policy: FeePolicy,
    pub readonly: bool,
    pub in_sim_duration: bool,

    // Insertion-ordered: the matching engine's "stable by insertion order"
    // tie-breaking (spec sec 4.2) depends on iteration here reflecting post
    // order, which a HashMap's randomly-seeded hash order cannot provide.
    offers: IndexMap<String, Offer>,
    bids: IndexMap<String, Bid>,
    pub offer_history: Vec<Offer>,
    pub bid_history: Vec<Bid>,
    pub trades: Vec<Trade>,

    accumulated_fee: f64,
    listeners: Vec<MarketListener>,
}

impl Market {
    pub fn new(id: impl Into<String>, time_slot: DateTime<Utc>, two_sided: bool, fee_policy: FeePolicy) -> Self {
        Self {
            id: id.into(),
            time_slot,
            two_sided,
            fee_policy,
            readonly: false,
            in_sim_duration: true,
            offers: IndexMap::new(),
            bids: IndexMap::new(),
            offer_history: Vec::new(),
            bid_history: Vec::new(),
            trades: Vec::new(),
            accumulated_fee: 0.0,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: MarketListener) {
        self.listeners.push(listener);
    }

    fn notify(&self, event: MarketEvent) {
        for listener in &self.listeners {
            listener(&event);
        }
    }

    fn ensure_open(&self) -> MarketResult<()> {
        if self.readonly {
            return Err(MarketError::read_only(self.id.clone()));
        }
        Ok(())
    }

    /// Closes the market to further mutation. Idempotent.
    pub fn close(&mut self) {
        self.readonly = true;
    }

    pub fn accumulated_fee(&self) -> f64 {
        self.accumulated_fee
    }

    pub fn offers(&self) -> impl Iterator<Item = &Offer> {
        self.offers.values()
    }

    pub fn bids(&self) -> impl Iterator<Item = &Bid> {
        self.bids.values()
    }

    /// Offers sorted ascending by rate, the order the matching engine and
    /// one-sided buyers scan in.
    pub fn sorted_offers(&self) -> Vec<Offer> {
        let mut offers: Vec<Offer> = self.offers.values().cloned().collect();
        offers.sort_by(|a, b| a.energy_rate().partial_cmp(&b.energy_rate()).unwrap());
        offers
    }

    pub fn sorted_bids(&self) -> Vec<Bid> {
        let mut bids: Vec<Bid> = self.bids.values().cloned().collect();
        bids.sort_by(|a, b| b.energy_rate().partial_cmp(&a.energy_rate()).unwrap());
        bids
    }

    // ---- one-sided operations ----

    pub fn offer(
        &mut self,
        price: f64,
        energy: f64,
        seller: impl Into<String>,
        adjust_for_fees: bool,
    ) -> MarketResult<Offer> {
        self.ensure_open()?;
        if energy <= 0.0 {
            return Err(MarketError::invalid_offer("energy must be positive"));
        }
        let mut offer = Offer::new(price, energy, seller);
        if adjust_for_fees {
            offer.price = self.fee_policy.update_incoming_offer_with_fee(price, energy);
        }
        if offer.price < 0.0 {
            return Err(MarketError::invalid_offer("price cannot be negative after fee adjustment"));
        }
        self.offers.insert(offer.id.clone(), offer.clone());
        self.offer_history.push(offer.clone());
        debug!(market = %self.id, offer_id = %offer.id, "offer posted");
        self.notify(MarketEvent::Offer { offer: offer.clone() });
        Ok(offer)
    }

    pub fn delete_offer(&mut self, offer_id: &str) -> MarketResult<()> {
        self.ensure_open()?;
        let offer = self
            .offers
            .shift_remove(offer_id)
            .ok_or_else(|| MarketError::offer_not_found(offer_id))?;
        self.notify(MarketEvent::OfferDeleted { offer });
        Ok(())
    }

    pub fn get_offer(&self, offer_id: &str) -> MarketResult<&Offer> {
        self.offers.get(offer_id).ok_or_else(|| MarketError::offer_not_found(offer_id))
    }

    /// Accepts (fully or partially) an open offer on behalf of `buyer`.
    /// Splitting preserves the original offer id on the `accepted` fragment.
    pub fn accept_offer(
        &mut self,
        offer_id: &str,
        buyer: impl Into<String>,
        energy: Option<f64>,
        trade_rate: Option<f64>,
        trade_bid_offer_info: Option<TradeBidOfferInfo>,
        already_tracked: bool,
    ) -> MarketResult<Trade> {
        self.ensure_open()?;
        let offer = self
            .offers
            .shift_remove(offer_id)
            .ok_or_else(|| MarketError::offer_not_found(offer_id))?;

        let selected_energy = energy.unwrap_or(offer.energy);
        if selected_energy <= 0.0 || selected_energy > offer.energy + ENERGY_TOLERANCE {
            self.offers.insert(offer.id.clone(), offer);
            return Err(MarketError::invalid_trade(format!(
                "trade energy {} outside (0, {}]",
                selected_energy,
                energy.unwrap_or(0.0)
            )));
        }

        let rate = trade_rate.unwrap_or_else(|| offer.energy_rate());
        // Pre-fee rate: `offer.energy_rate()` already carries the ingress
        // markup applied in `offer()`, so the fee split must compare against
        // `original_offer_price` instead or it always nets to zero.
        let original_offer_rate = offer.original_offer_price / offer.energy;
        let (accepted, residual) = offer.split(selected_energy);
        let buyer = buyer.into();

        let (revenue, fee_price) = self.fee_policy.settle_trade(selected_energy, rate, original_offer_rate);
        let _ = revenue;

        if let Some(residual) = residual.clone() {
            self.offers.insert(residual.id.clone(), residual.clone());
            self.notify(MarketEvent::OfferSplit {
                original_offer_id: offer.id.clone(),
                accepted_offer: accepted.clone(),
                residual_offer: residual,
            });
        }

        let info = trade_bid_offer_info.unwrap_or_else(|| {
            TradeBidOfferInfo::new(rate, rate, original_offer_rate, original_offer_rate, rate)
        });

        let trade = Trade {
            id: uuid::Uuid::new_v4().to_string(),
            creation_time: Utc::now(),
            offer: accepted,
            bid_id: None,
            seller: offer.seller.clone(),
            buyer,
            residual_offer: residual,
            residual_bid: None,
            fee_price,
            trade_bid_offer_info: info,
            already_tracked,
        };

        if !already_tracked {
            self.accumulated_fee += fee_price;
        }
        self.trades.push(trade.clone());
        info!(market = %self.id, trade_id = %trade.id, energy = selected_energy, "offer traded");
        self.notify(MarketEvent::OfferTraded { trade: trade.clone() });
        Ok(trade)
    }

    // ---- two-sided operations ----

    pub fn bid(
        &mut self,
        price: f64,
        energy: f64,
        buyer: impl Into<String>,
        adjust_for_fees: bool,
    ) -> MarketResult<Bid> {
        self.ensure_open()?;
        if !self.two_sided {
            return Err(MarketError::wrong_market_type("bids are not accepted on a one-sided market"));
        }
        if energy <= 0.0 {
            return Err(MarketError::invalid_bid("energy must be positive"));
        }
        let mut bid = Bid::new(price, energy, buyer);
        if adjust_for_fees {
            bid.price = self.fee_policy.update_incoming_bid_with_fee(price, energy);
        }
        if bid.price < 0.0 {
            return Err(MarketError::invalid_bid("price cannot be negative after fee adjustment"));
        }
        self.bids.insert(bid.id.clone(), bid.clone());
        self.bid_history.push(bid.clone());
        debug!(market = %self.id, bid_id = %bid.id, "bid posted");
        self.notify(MarketEvent::Bid { bid: bid.clone() });
        Ok(bid)
    }

    pub fn delete_bid(&mut self, bid_id: &str) -> MarketResult<()> {
        self.ensure_open()?;
        let bid = self.bids.shift_remove(bid_id).ok_or_else(|| MarketError::bid_not_found(bid_id))?;
        self.notify(MarketEvent::BidDeleted { bid });
        Ok(())
    }

    pub fn get_bid(&self, bid_id: &str) -> MarketResult<&Bid> {
        self.bids.get(bid_id).ok_or_else(|| MarketError::bid_not_found(bid_id))
    }

    pub fn accept_bid(
        &mut self,
        bid_id: &str,
        energy: Option<f64>,
        seller: impl Into<String>,
        trade_rate: Option<f64>,
        trade_bid_offer_info: Option<TradeBidOfferInfo>,
        already_tracked: bool,
    ) -> MarketResult<Trade> {
        self.ensure_open()?;
        if !self.two_sided {
            return Err(MarketError::wrong_market_type("bids are not accepted on a one-sided market"));
        }
        let bid = self.bids.shift_remove(bid_id).ok_or_else(|| MarketError::bid_not_found(bid_id))?;

        let selected_energy = energy.unwrap_or(bid.energy);
        if selected_energy <= 0.0 || selected_energy > bid.energy + ENERGY_TOLERANCE {
            self.bids.insert(bid.id.clone(), bid);
            return Err(MarketError::invalid_trade(format!(
                "trade energy {} outside (0, {}]",
                selected_energy, selected_energy
            )));
        }

        let rate = trade_rate.unwrap_or_else(|| bid.energy_rate());
        let (accepted, residual) = bid.split(selected_energy);
        let seller = seller.into();

        // The pre-fee offer rate lives in the propagated `TradeBidOfferInfo`
        // carried from the paired `accept_offer` call, not in this trade's
        // own settling rate (that would always net the fee to zero).
        let original_offer_rate = trade_bid_offer_info.map(|info| info.propagated_offer_rate).unwrap_or(rate);
        let (_, fee_price) = self.fee_policy.settle_trade(selected_energy, rate, original_offer_rate);

        if let Some(residual) = residual.clone() {
            self.bids.insert(residual.id.clone(), residual.clone());
            self.notify(MarketEvent::BidSplit {
                original_bid_id: bid.id.clone(),
                accepted_bid: accepted.clone(),
                residual_bid: residual,
            });
        }

        let info = trade_bid_offer_info
            .unwrap_or_else(|| TradeBidOfferInfo::new(bid.energy_rate(), bid.energy_rate(), rate, rate, rate));

        let placeholder_offer = Offer {
            id: format!("bid-trade-{}", accepted.id),
            creation_time: accepted.creation_time,
            price: accepted.price,
            energy: accepted.energy,
            seller: seller.clone(),
            seller_origin: seller.clone(),
            seller_origin_id: seller.clone(),
            seller_id: seller.clone(),
            original_offer_price: accepted.original_bid_price,
        };

        let trade = Trade {
            id: uuid::Uuid::new_v4().to_string(),
            creation_time: Utc::now(),
            offer: placeholder_offer,
            bid_id: Some(accepted.id.clone()),
            seller,
            buyer: accepted.buyer.clone(),
            residual_offer: None,
            residual_bid: residual,
            fee_price,
            trade_bid_offer_info: info,
            already_tracked,
        };

        if !already_tracked {
            self.accumulated_fee += fee_price;
        }
        self.trades.push(trade.clone());
        info!(market = %self.id, trade_id = %trade.id, energy = selected_energy, "bid traded");
        self.notify(MarketEvent::BidTraded { trade: trade.clone() });
        Ok(trade)
    }

    /// The atomic unit of a matched trade: validates the pairing, then
    /// applies the offer-side accept followed by the bid-side accept, with
    /// `already_tracked` on the second leg (and on the first when the pairing
    /// is a forwarding self-loop) to avoid double-counting aggregate fees.
    pub fn accept_bid_offer_pair(
        &mut self,
        bid_id: &str,
        offer_id: &str,
        clearing_rate: f64,
        selected_energy: f64,
        trade_bid_info: Option<TradeBidOfferInfo>,
    ) -> MarketResult<(Trade, Trade)> {
        self.ensure_open()?;
        let bid = self.get_bid(bid_id)?.clone();
        let offer = self.get_offer(offer_id)?.clone();

        if selected_energy > bid.energy + ENERGY_TOLERANCE || selected_energy > offer.energy + ENERGY_TOLERANCE {
            return Err(MarketError::invalid_trade("selected energy exceeds bid or offer energy"));
        }
        let bid_rate = bid.energy_rate();
        let offer_rate = offer.energy_rate();
        if clearing_rate > bid_rate + ENERGY_TOLERANCE || clearing_rate < offer_rate - ENERGY_TOLERANCE {
            return Err(MarketError::invalid_trade(format!(
                "clearing rate {} outside [{}, {}]",
                clearing_rate, offer_rate, bid_rate
            )));
        }

        let self_loop = bid.buyer == offer.seller;

        // Built once so both legs see the same pre-fee offer rate; without
        // this, `accept_bid`'s fee split has no offer to compare against and
        // the grid fee on the bid side always nets to zero.
        let info = trade_bid_info.unwrap_or_else(|| {
            TradeBidOfferInfo::new(
                bid.original_bid_price / bid.energy,
                bid.energy_rate(),
                offer.original_offer_price / offer.energy,
                offer.original_offer_price / offer.energy,
                clearing_rate,
            )
        });

        let offer_trade = self.accept_offer(
            offer_id,
            bid.buyer.clone(),
            Some(selected_energy),
            Some(clearing_rate),
            Some(info),
            self_loop,
        )?;
        let bid_trade = self.accept_bid(
            bid_id,
            Some(selected_energy),
            offer.seller.clone(),
            Some(clearing_rate),
            Some(info),
            true,
        )?;

        Ok((offer_trade, bid_trade))
    }

    /// Applies a precomputed list of `(bid_id, offer_id, energy, rate)`
    /// recommendations in order. When a pairing produces a residual, later
    /// recommendations that still reference the consumed id are rewritten to
    /// point at the residual before being applied.
    pub fn match_recommendation(
        &mut self,
        recommendations: Vec<(String, String, f64, f64)>,
    ) -> Vec<MarketResult<(Trade, Trade)>> {
        let mut pending = recommendations;
        let mut results = Vec::with_capacity(pending.len());
        let mut i = 0;
        while i < pending.len() {
            let (bid_id, offer_id, energy, rate) = pending[i].clone();
            match self.accept_bid_offer_pair(&bid_id, &offer_id, rate, energy, None) {
                Ok((offer_trade, bid_trade)) => {
                    if let Some(residual) = &offer_trade.residual_offer {
                        Self::replace_in_remaining(&mut pending, i + 1, &offer_id, &residual.id, true);
                    }
                    if let Some(residual) = &bid_trade.residual_bid {
                        Self::replace_in_remaining(&mut pending, i + 1, &bid_id, &residual.id, false);
                    }
                    results.push(Ok((offer_trade, bid_trade)));
                }
                Err(e) => {
                    warn!(market = %self.id, error = %e, "recommendation rejected");
                    results.push(Err(e));
                }
            }
            i += 1;
        }
        results
    }

    fn replace_in_remaining(
        pending: &mut [(String, String, f64, f64)],
        from: usize,
        old_id: &str,
        new_id: &str,
        is_offer: bool,
    ) {
        for entry in pending.iter_mut().skip(from) {
            if is_offer && entry.1 == old_id {
                entry.1 = new_id.to_string();
            } else if !is_offer && entry.0 == old_id {
                entry.0 = new_id.to_string();
            }
        }
    }
}
