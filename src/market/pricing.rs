//! Price update scheduler (C4): linear-in-time rate interpolation for a
//! device's posted offers or bids across a slot, advanced by tick count.

use crate::shared::domain::errors::{MarketError, MarketResult};

/// Whether a posted rate is bounded from below (an offer, decreasing toward
/// its floor) or from above (a bid, increasing toward its ceiling).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimit {
    Min,
    Max,
}

/// Shared capability between the offer-side and bid-side rate updaters.
pub trait PriceUpdater {
    fn populate_profiles(&mut self, initial_rate: f64, final_rate: f64);
    fn get_updated_rate(&self, elapsed_seconds_in_slot: u64) -> f64;
    fn reset(&mut self);
    fn update_counter(&self) -> u64;
    fn increment_update_counter(&mut self, elapsed_seconds_in_slot: u64) -> bool;
}

/// One slot's worth of linear-update parameters for a single bid/offer
/// stream.
#[derive(Debug, Clone)]
pub struct RateUpdater {
    pub rate_limit: RateLimit,
    pub initial_rate: f64,
    pub final_rate: f64,
    pub slot_length_seconds: u64,
    pub update_interval_seconds: u64,
    pub fit_to_limit: bool,
    /// Only consulted when `fit_to_limit` is false; sign is applied per
    /// `rate_limit` so callers always supply a non-negative magnitude.
    pub energy_rate_change_per_update: f64,
    update_counter: u64,
}

impl RateUpdater {
    pub fn new(
        rate_limit: RateLimit,
        slot_length_seconds: u64,
        update_interval_seconds: u64,
        fit_to_limit: bool,
        energy_rate_change_per_update: f64,
    ) -> MarketResult<Self> {
        let min_update_interval = 60; // MIN_UPDATE_INTERVAL_MINUTES * 60, duplicated to avoid a config dependency here
        if update_interval_seconds < min_update_interval || update_interval_seconds >= slot_length_seconds {
            return Err(MarketError::configuration(format!(
                "update_interval_seconds {} must be within [{}, {})",
                update_interval_seconds, min_update_interval, slot_length_seconds
            )));
        }
        if energy_rate_change_per_update < 0.0 {
            return Err(MarketError::configuration("energy_rate_change_per_update must be non-negative"));
        }
        Ok(Self {
            rate_limit,
            initial_rate: 0.0,
            final_rate: 0.0,
            slot_length_seconds,
            update_interval_seconds,
            fit_to_limit,
            energy_rate_change_per_update,
            update_counter: 0,
        })
    }

    /// `N = max(floor(slot_length / update_interval) - 1, 1)`, the number of
    /// interior update opportunities within a slot.
    pub fn available_updates_per_slot(&self) -> u64 {
        (self.slot_length_seconds / self.update_interval_seconds).saturating_sub(1).max(1)
    }

    fn change_per_update(&self) -> f64 {
        if self.fit_to_limit {
            (self.initial_rate - self.final_rate).abs() / self.available_updates_per_slot() as f64
        } else {
            self.energy_rate_change_per_update
        }
    }
}

impl PriceUpdater for RateUpdater {
    fn populate_profiles(&mut self, initial_rate: f64, final_rate: f64) {
        self.initial_rate = initial_rate;
        self.final_rate = final_rate;
        self.update_counter = 0;
    }

    fn get_updated_rate(&self, elapsed_seconds_in_slot: u64) -> f64 {
        let counter = elapsed_seconds_in_slot / self.update_interval_seconds;
        let change = self.change_per_update() * counter as f64;
        match self.rate_limit {
            RateLimit::Min => (self.initial_rate - change).max(self.final_rate),
            RateLimit::Max => (self.initial_rate + change).min(self.final_rate),
        }
    }

    fn reset(&mut self) {
        self.update_counter = 0;
    }

    fn update_counter(&self) -> u64 {
        self.update_counter
    }

    /// Advances the counter when enough simulated time has elapsed, and
    /// reports whether an update actually occurred this tick.
    fn increment_update_counter(&mut self, elapsed_seconds_in_slot: u64) -> bool {
        let target_counter = elapsed_seconds_in_slot / self.update_interval_seconds;
        if target_counter > self.update_counter {
            self.update_counter = target_counter;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_rate_decreases_linearly_to_floor() {
        // slot = 60 min, update_interval = 15 min -> N = floor(60/15) - 1 = 3
        let mut updater =
            RateUpdater::new(RateLimit::Min, 3600, 900, false, 4.0).unwrap();
        updater.populate_profiles(30.0, 18.0);

        assert!((updater.get_updated_rate(0) - 30.0).abs() < 1e-8);
        assert!((updater.get_updated_rate(900) - 26.0).abs() < 1e-8);
        assert!((updater.get_updated_rate(1800) - 22.0).abs() < 1e-8);
        assert!((updater.get_updated_rate(2700) - 18.0).abs() < 1e-8);
    }

    #[test]
    fn fit_to_limit_spreads_exactly_across_available_updates() {
        let mut updater = RateUpdater::new(RateLimit::Min, 3600, 900, true, 0.0).unwrap();
        updater.populate_profiles(30.0, 18.0);
        assert_eq!(updater.available_updates_per_slot(), 3);
        assert!((updater.get_updated_rate(2700) - 18.0).abs() < 1e-8);
    }

    #[test]
    fn bid_rate_increases_toward_ceiling() {
        let mut updater = RateUpdater::new(RateLimit::Max, 3600, 900, false, 3.0).unwrap();
        updater.populate_profiles(0.0, 9.0);
        assert!((updater.get_updated_rate(900) - 3.0).abs() < 1e-8);
        assert!((updater.get_updated_rate(2700) - 9.0).abs() < 1e-8);
    }

    #[test]
    fn rejects_update_interval_outside_bounds() {
        assert!(RateUpdater::new(RateLimit::Min, 3600, 3600, false, 1.0).is_err());
        assert!(RateUpdater::new(RateLimit::Min, 3600, 30, false, 1.0).is_err());
    }

    #[test]
    fn increment_update_counter_advances_only_past_interval() {
        let mut updater = RateUpdater::new(RateLimit::Min, 3600, 900, false, 1.0).unwrap();
        assert!(!updater.increment_update_counter(100));
        assert!(updater.increment_update_counter(900));
        assert_eq!(updater.update_counter(), 1);
    }
}
