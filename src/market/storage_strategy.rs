//! Storage device strategy (C5): a bidirectional bid/offer actor that tracks
//! state of charge through FIFO energy-origin accounting and enforces
//! capacity/power constraints.

use crate::market::market::Market;
use crate::market::model::Trade;
use crate::market::pricing::{PriceUpdater, RateLimit, RateUpdater};
use crate::shared::domain::errors::MarketResult;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Provenance tag for a stored energy lot, assigned when the lot is bought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnergyOrigin {
    /// Bought from outside this device's own area.
    External,
    /// Bought from a sibling device within the same area.
    Local,
    Unknown,
}

/// One FIFO lot of stored energy, tagged with where it came from.
#[derive(Debug, Clone, Copy)]
struct StorageLot {
    origin: EnergyOrigin,
    kwh: f64,
}

/// Overrides initial/final bid and offer rates for a slot, per the four
/// schemes the original simulator supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AlternativePricingScheme {
    #[default]
    Disabled,
    /// Forces bid and offer rates to zero.
    ZeroRate,
    /// Feed-in-tariff: a fixed percentage of the market-maker rate.
    FeedInTariffPercentage,
    /// Uses the market-maker rate directly for both bid and offer.
    MarketMakerRate,
}

const FEED_IN_TARIFF_PERCENTAGE: f64 = 50.0;

/// Per-device, per-slot bookkeeping for committed and posted energy.
#[derive(Debug, Clone, Default)]
pub struct StorageState {
    pub capacity_kwh: f64,
    pub max_abs_battery_power_kw: f64,
    pub min_allowed_soc: f64,
    pub used_storage_kwh: f64,
    pub pledged_buy_kwh: f64,
    pub pledged_sell_kwh: f64,
    pub offered_buy_kwh: f64,
    pub offered_sell_kwh: f64,
    lots: Vec<StorageLot>,
}

impl StorageState {
    pub fn new(capacity_kwh: f64, max_abs_battery_power_kw: f64, min_allowed_soc: f64, initial_soc: f64) -> Self {
        let used_storage_kwh = capacity_kwh * initial_soc;
        let lots = if used_storage_kwh > 0.0 {
            vec![StorageLot { origin: EnergyOrigin::Unknown, kwh: used_storage_kwh }]
        } else {
            Vec::new()
        };
        Self {
            capacity_kwh,
            max_abs_battery_power_kw,
            min_allowed_soc,
            used_storage_kwh,
            lots,
            ..Default::default()
        }
    }

    pub fn soc(&self) -> f64 {
        if self.capacity_kwh <= 0.0 { 0.0 } else { self.used_storage_kwh / self.capacity_kwh }
    }

    pub fn free_storage(&self) -> f64 {
        (self.capacity_kwh - self.used_storage_kwh - self.pledged_buy_kwh - self.offered_buy_kwh).max(0.0)
    }

    /// Rejects a prospective buy/sell of `delta_kwh` (positive for buy,
    /// negative for sell) when the resulting net power over the slot would
    /// exceed `max_abs_battery_power_kw * slot_length_hours`.
    pub fn has_battery_reached_max_power(&self, delta_kwh: f64, slot_length_hours: f64) -> bool {
        let projected = (self.pledged_buy_kwh - self.pledged_sell_kwh + delta_kwh).abs();
        projected > self.max_abs_battery_power_kw * slot_length_hours + 1e-8
    }

    /// FIFO: consumes energy from the oldest lots first, shrinking the head
    /// lot when it is only partially consumed.
    fn consume_fifo(&mut self, mut energy: f64) {
        while energy > 1e-8 && !self.lots.is_empty() {
            let head = &mut self.lots[0];
            if energy >= head.kwh {
                energy -= head.kwh;
                self.lots.remove(0);
            } else {
                head.kwh -= energy;
                energy = 0.0;
            }
        }
    }

    fn add_lot(&mut self, origin: EnergyOrigin, kwh: f64) {
        if kwh > 0.0 {
            self.lots.push(StorageLot { origin, kwh });
        }
    }

    pub fn lots(&self) -> impl Iterator<Item = (EnergyOrigin, f64)> + '_ {
        self.lots.iter().map(|l| (l.origin, l.kwh))
    }

    fn sum_lots(&self) -> f64 {
        self.lots.iter().map(|l| l.kwh).sum()
    }

    /// Advances state to a new slot: carries over used storage, and clears
    /// the per-slot pledged/offered buckets (the simulator re-derives them
    /// from the new slot's trades).
    pub fn market_cycle(&mut self) {
        self.pledged_buy_kwh = 0.0;
        self.pledged_sell_kwh = 0.0;
        self.offered_buy_kwh = 0.0;
        self.offered_sell_kwh = 0.0;
    }
}

/// Pricing/selling configuration for a storage device, set once at
/// construction (mirrors the validated constructor parameters of the
/// original strategy).
#[derive(Debug, Clone)]
pub struct StorageStrategyConfig {
    pub initial_selling_rate: f64,
    pub final_selling_rate: f64,
    pub initial_buying_rate: f64,
    pub final_buying_rate: f64,
    pub fit_to_limit: bool,
    pub energy_rate_change_per_update: f64,
    pub cap_price_strategy: bool,
    pub sell_on_most_expensive_market: bool,
    pub alternative_pricing_scheme: AlternativePricingScheme,
    pub market_maker_rate: f64,
    pub slot_length_seconds: u64,
    pub update_interval_seconds: u64,
}

pub struct StorageStrategy {
    pub owner: String,
    pub config: StorageStrategyConfig,
    pub state: StorageState,
    pub offer_update: RateUpdater,
    pub bid_update: RateUpdater,
}

impl StorageStrategy {
    pub fn new(owner: impl Into<String>, config: StorageStrategyConfig, state: StorageState) -> MarketResult<Self> {
        let mut offer_update = RateUpdater::new(
            RateLimit::Min,
            config.slot_length_seconds,
            config.update_interval_seconds,
            config.fit_to_limit,
            config.energy_rate_change_per_update,
        )?;
        let mut bid_update = RateUpdater::new(
            RateLimit::Max,
            config.slot_length_seconds,
            config.update_interval_seconds,
            config.fit_to_limit,
            config.energy_rate_change_per_update,
        )?;
        let (bid_initial, bid_final, offer_initial, offer_final) = Self::resolve_rates(&config);
        offer_update.populate_profiles(offer_initial, offer_final);
        bid_update.populate_profiles(bid_initial, bid_final);

        Ok(Self { owner: owner.into(), config, state, offer_update, bid_update })
    }

    /// Applies the alternative pricing scheme override, returning
    /// `(bid_initial, bid_final, offer_initial, offer_final)`.
    fn resolve_rates(config: &StorageStrategyConfig) -> (f64, f64, f64, f64) {
        match config.alternative_pricing_scheme {
            AlternativePricingScheme::Disabled => (
                config.initial_buying_rate,
                config.final_buying_rate,
                config.initial_selling_rate,
                config.final_selling_rate,
            ),
            AlternativePricingScheme::ZeroRate => (0.0, 0.0, 0.0, 0.0),
            // Bids ramp from 0 up to `rate`, not a flat line at `rate`: only
            // bid_final is overridden, mirroring the grounding source.
            AlternativePricingScheme::FeedInTariffPercentage => {
                let rate = config.market_maker_rate * FEED_IN_TARIFF_PERCENTAGE / 100.0;
                (0.0, rate, rate, rate)
            }
            AlternativePricingScheme::MarketMakerRate => {
                (0.0, config.market_maker_rate, config.market_maker_rate, config.market_maker_rate)
            }
        }
    }

    fn slot_length_hours(&self) -> f64 {
        self.config.slot_length_seconds as f64 / 3600.0
    }

    /// Entry to a new slot: resets updaters, posts a sell offer into every
    /// open market when energy is held, and posts a first buy bid sized to
    /// the device's remaining free capacity.
    pub fn event_market_cycle(
        &mut self,
        markets: &mut [&mut Market],
        energy_to_buy_kwh: f64,
    ) -> MarketResult<()> {
        self.state.market_cycle();
        self.offer_update.reset();
        self.bid_update.reset();
        let (bid_initial, bid_final, offer_initial, offer_final) = Self::resolve_rates(&self.config);
        self.offer_update.populate_profiles(offer_initial, offer_final);
        self.bid_update.populate_profiles(bid_initial, bid_final);

        if self.state.used_storage_kwh > 1e-8 {
            self.sell_energy(markets)?;
        }

        if let Some(market) = markets.first_mut() {
            let energy = energy_to_buy_kwh.min(self.state.free_storage());
            if energy > 1e-8 && market.two_sided {
                let rate = self.bid_update.get_updated_rate(0);
                let bid = market.bid(rate * energy, energy, self.owner.clone(), true)?;
                self.state.offered_buy_kwh += bid.energy;
            }
        }

        Ok(())
    }

    /// One-sided-mode buy scan: walks `market.sorted_offers()` (ascending by
    /// rate) and accepts every offer at or below the current bid rate,
    /// short-circuiting at the first offer that is too expensive.
    pub fn buy_energy(&mut self, market: &mut Market, elapsed_seconds_in_slot: u64) -> MarketResult<()> {
        if self.state.free_storage() <= 1e-8 {
            return Ok(());
        }
        let max_rate = self.bid_update.get_updated_rate(elapsed_seconds_in_slot);
        let offers = market.sorted_offers();
        for offer in offers {
            if offer.seller == self.owner {
                continue;
            }
            if offer.energy_rate() > max_rate {
                break;
            }
            let max_energy = offer.energy.min(self.state.free_storage());
            if max_energy <= 1e-8 {
                continue;
            }
            if self.state.has_battery_reached_max_power(max_energy, self.slot_length_hours()) {
                continue;
            }
            let trade = market.accept_offer(&offer.id, self.owner.clone(), Some(max_energy), None, None, false)?;
            self.track_energy_bought(&trade, &market.id);
        }
        Ok(())
    }

    /// Records a bought lot's FIFO origin: `External` when the counterparty
    /// is this device's own area (bought from the grid), `Local` when it is
    /// a sibling device, `Unknown` otherwise.
    fn track_energy_bought(&mut self, trade: &Trade, own_area_name: &str) {
        let origin = if trade.seller == own_area_name {
            EnergyOrigin::External
        } else if trade.seller != self.owner {
            EnergyOrigin::Local
        } else {
            EnergyOrigin::Unknown
        };
        self.state.add_lot(origin, trade.offer.energy);
        self.state.used_storage_kwh += trade.offer.energy;
        self.state.pledged_buy_kwh += trade.offer.energy;
        self.state.offered_buy_kwh = (self.state.offered_buy_kwh - trade.offer.energy).max(0.0);
    }

    /// On trade as buyer (two-sided bid acceptance elsewhere): same
    /// bookkeeping as [`Self::track_energy_bought`].
    pub fn event_bid_traded(&mut self, trade: &Trade, own_area_name: &str) {
        self.track_energy_bought(trade, own_area_name);
    }

    /// On trade as seller: consumes the sold energy from the FIFO lot queue
    /// head-first and updates pledged/offered buckets.
    pub fn event_trade(&mut self, trade: &Trade) -> MarketResult<()> {
        self.state.consume_fifo(trade.offer.energy);
        self.state.used_storage_kwh = (self.state.used_storage_kwh - trade.offer.energy).max(0.0);
        self.state.pledged_sell_kwh += trade.offer.energy;
        self.state.offered_sell_kwh = (self.state.offered_sell_kwh - trade.offer.energy).max(0.0);
        debug_assert!(self.state.sum_lots() <= self.state.used_storage_kwh + 1e-6);
        Ok(())
    }

    /// Posts a sell offer into the selected market(s) at the capacity-aware
    /// or flat initial selling rate.
    pub fn sell_energy(&mut self, markets: &mut [&mut Market]) -> MarketResult<()> {
        let targets = self.select_markets_to_sell(markets);
        let rate = self.calculate_selling_rate();
        let energy = self.state.used_storage_kwh;
        if energy <= 1e-8 {
            return Ok(());
        }
        for market in targets {
            let offer = market.offer(rate * energy, energy, self.owner.clone(), true)?;
            self.state.offered_sell_kwh += offer.energy;
            debug!(owner = %self.owner, market = %market.id, rate, energy, "storage sell offer posted");
        }
        Ok(())
    }

    /// Either every open market, or (when configured) only the single market
    /// whose best (lowest) offer carries the highest rate among all markets.
    fn select_markets_to_sell<'a, 'b>(&self, markets: &'a mut [&'b mut Market]) -> Vec<&'a mut &'b mut Market> {
        if !self.config.sell_on_most_expensive_market {
            return markets.iter_mut().collect();
        }
        let mut best_idx = None;
        let mut best_rate = f64::NEG_INFINITY;
        for (idx, market) in markets.iter().enumerate() {
            if let Some(best_offer) = market.sorted_offers().into_iter().next() {
                if best_offer.energy_rate() > best_rate {
                    best_rate = best_offer.energy_rate();
                    best_idx = Some(idx);
                }
            }
        }
        match best_idx {
            Some(idx) => vec![&mut markets[idx]],
            None => markets.iter_mut().collect(),
        }
    }

    fn calculate_selling_rate(&self) -> f64 {
        if self.config.cap_price_strategy {
            self.capacity_dependant_sell_rate()
        } else {
            self.offer_update.initial_rate
        }
    }

    /// `max_rate - (max_rate - min_rate) * soc`, falling back to `min_rate`
    /// when the configured band is inverted.
    fn capacity_dependant_sell_rate(&self) -> f64 {
        let max_rate = self.offer_update.initial_rate;
        let min_rate = self.offer_update.final_rate;
        if max_rate < min_rate {
            return min_rate;
        }
        max_rate - (max_rate - min_rate) * self.state.soc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::fees::FeePolicy;
    use chrono::Utc;

    fn config() -> StorageStrategyConfig {
        StorageStrategyConfig {
            initial_selling_rate: 30.0,
            final_selling_rate: 25.0,
            initial_buying_rate: 0.0,
            final_buying_rate: 24.9,
            fit_to_limit: true,
            energy_rate_change_per_update: 0.0,
            cap_price_strategy: true,
            sell_on_most_expensive_market: false,
            alternative_pricing_scheme: AlternativePricingScheme::Disabled,
            market_maker_rate: 30.0,
            slot_length_seconds: 3600,
            update_interval_seconds: 900,
        }
    }

    #[test]
    fn capacity_dependant_sell_rate_interpolates_between_bounds() {
        let state = StorageState::new(10.0, 5.0, 0.1, 0.5);
        let strategy = StorageStrategy::new("storage-1", config(), state).unwrap();
        let rate = strategy.capacity_dependant_sell_rate();
        assert!(rate > 25.0 && rate < 30.0);
    }

    #[test]
    fn fifo_origin_tracking_consumes_oldest_lot_first() {
        let mut state = StorageState::new(10.0, 5.0, 0.1, 0.0);
        state.add_lot(EnergyOrigin::External, 2.0);
        state.add_lot(EnergyOrigin::Local, 3.0);
        state.used_storage_kwh = 5.0;

        state.consume_fifo(2.5);
        let remaining: Vec<_> = state.lots().collect();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, EnergyOrigin::Local);
        assert!((remaining[0].1 - 2.5).abs() < 1e-8);
    }

    #[test]
    fn alternative_pricing_scheme_market_maker_rate_overrides_bounds() {
        let mut cfg = config();
        cfg.alternative_pricing_scheme = AlternativePricingScheme::MarketMakerRate;
        cfg.market_maker_rate = 18.0;
        let state = StorageState::new(10.0, 5.0, 0.1, 0.5);
        let strategy = StorageStrategy::new("storage-1", cfg, state).unwrap();
        assert!((strategy.offer_update.initial_rate - 18.0).abs() < 1e-8);
        // The bid side ramps up to the market-maker rate, it doesn't start there.
        assert!((strategy.bid_update.initial_rate - 0.0).abs() < 1e-8);
        assert!((strategy.bid_update.final_rate - 18.0).abs() < 1e-8);
    }

    #[test]
    fn sell_energy_posts_offer_and_updates_offered_sell_bucket() {
        let mut state = StorageState::new(10.0, 5.0, 0.1, 0.5);
        state.used_storage_kwh = 5.0;
        let mut strategy = StorageStrategy::new("storage-1", config(), state).unwrap();
        let mut market = Market::new("m1", Utc::now(), true, FeePolicy::none());
        let mut markets: Vec<&mut Market> = vec![&mut market];
        strategy.sell_energy(&mut markets).unwrap();
        assert!((strategy.state.offered_sell_kwh - 5.0).abs() < 1e-8);
        assert_eq!(market.offers().count(), 1);
    }
}
