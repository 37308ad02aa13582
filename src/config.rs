//! Market simulator configuration.
//!
//! Mirrors the process-wide settings the original simulator threads through
//! a global config object (see the design note on global mutable configuration):
//! slot/tick timing, grid fee policy, the selected matching algorithm, and the
//! alternative pricing scheme used by storage devices.

use crate::market::{AlternativePricingScheme, FeeType, MatchingAlgorithmKind};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Minimum allowed update interval, in minutes, for a bid/offer price updater.
pub const MIN_UPDATE_INTERVAL_MINUTES: i64 = 1;

/// Top-level configuration for a single simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Length of one discrete market slot, in seconds.
    pub slot_length_seconds: u64,
    /// Length of one simulator tick, in seconds. Must evenly divide `slot_length_seconds`.
    pub tick_length_seconds: u64,
    /// Price-updater `update_interval`, in seconds.
    pub update_interval_seconds: u64,
    /// Grid fee policy applied by every market's fee engine.
    pub grid_fees: GridFeeConfig,
    /// Matching algorithm selected for two-sided markets.
    pub matching_algorithm: MatchingAlgorithmKind,
    /// Alternative pricing scheme applied to storage device strategies.
    pub alternative_pricing_scheme: AlternativePricingScheme,
    /// Reference rate (currency/kWh) used by alternative pricing schemes 2 and 3,
    /// and as the price anchor for a market-maker leaf.
    pub market_maker_rate: f64,
    /// Storage device defaults.
    pub storage: StorageDefaultsConfig,
    /// Messaging/worker-pool configuration for the external request bridge.
    pub messaging: MessagingConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridFeeConfig {
    pub fee_type: FeeType,
    /// Flat per-kWh fee (used when `fee_type == FeeType::Constant`).
    pub constant_fee_per_kwh: f64,
    /// Percentage fee, e.g. 0.01 for 1% (used when `fee_type == FeeType::Percentage`).
    pub percentage_fee: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageDefaultsConfig {
    pub battery_capacity_kwh: f64,
    pub max_abs_battery_power_kw: f64,
    pub min_allowed_soc: f64,
    pub initial_soc: f64,
    pub initial_selling_rate: f64,
    pub final_selling_rate: f64,
    pub initial_buying_rate: f64,
    pub final_buying_rate: f64,
    pub fit_to_limit: bool,
    pub energy_rate_change_per_update: f64,
    pub cap_price_strategy: bool,
    pub sell_on_most_expensive_market: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Bounded worker pool size for the external request subscriber.
    pub worker_pool_size: usize,
    /// Per-future join timeout (seconds) used when the subscriber shuts down.
    pub shutdown_join_timeout_seconds: u64,
    /// Propagate market events bottom-to-top through the area tree.
    /// Mirrors the `DISPATCH_EVENTS_BOTTOM_TO_TOP` environment switch.
    pub dispatch_events_bottom_to_top: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. "info" or "gridtokenx_blockchain=debug".
    pub filter: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            slot_length_seconds: 60 * 60,
            tick_length_seconds: 60,
            update_interval_seconds: 15 * 60,
            grid_fees: GridFeeConfig {
                fee_type: FeeType::Constant,
                constant_fee_per_kwh: 0.0,
                percentage_fee: 0.0,
            },
            matching_algorithm: MatchingAlgorithmKind::PayAsBid,
            alternative_pricing_scheme: AlternativePricingScheme::Disabled,
            market_maker_rate: 30.0,
            storage: StorageDefaultsConfig {
                battery_capacity_kwh: 1.2,
                max_abs_battery_power_kw: 5.0,
                min_allowed_soc: 0.1,
                initial_soc: 0.1,
                initial_selling_rate: 30.0,
                final_selling_rate: 25.0,
                initial_buying_rate: 0.0,
                final_buying_rate: 24.9,
                fit_to_limit: true,
                energy_rate_change_per_update: 1.0,
                cap_price_strategy: false,
                sell_on_most_expensive_market: false,
            },
            messaging: MessagingConfig {
                worker_pool_size: 10,
                shutdown_join_timeout_seconds: 5,
                dispatch_events_bottom_to_top: true,
            },
            logging: LoggingConfig {
                filter: "info".to_string(),
            },
        }
    }
}

impl MarketConfig {
    /// Load configuration from a TOML file, creating and persisting a default
    /// one if the file does not yet exist.
    pub fn load(config_path: &str) -> Result<Self> {
        if Path::new(config_path).exists() {
            let config_str = fs::read_to_string(config_path)
                .map_err(|e| anyhow!("Failed to read config file: {}", e))?;

            let config: MarketConfig = toml::from_str(&config_str)
                .map_err(|e| anyhow!("Failed to parse config file: {}", e))?;

            config.validate()?;

            Ok(config)
        } else {
            let default_config = Self::default();
            default_config.save(config_path)?;
            Ok(default_config)
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    pub fn save(&self, config_path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = Path::new(config_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;
            }
        }

        fs::write(config_path, config_str)
            .map_err(|e| anyhow!("Failed to write config file: {}", e))?;

        Ok(())
    }

    /// Eagerly validate the bounds the price scheduler and storage strategy
    /// rely on, so a misconfigured run fails at startup rather than mid-simulation.
    pub fn validate(&self) -> Result<()> {
        if self.slot_length_seconds == 0 {
            return Err(anyhow!("slot_length_seconds cannot be zero"));
        }
        if self.tick_length_seconds == 0 || self.slot_length_seconds % self.tick_length_seconds != 0 {
            return Err(anyhow!("tick_length_seconds must evenly divide slot_length_seconds"));
        }

        let min_update_interval = (MIN_UPDATE_INTERVAL_MINUTES * 60) as u64;
        if self.update_interval_seconds < min_update_interval {
            return Err(anyhow!(
                "update_interval_seconds must be at least {} seconds",
                min_update_interval
            ));
        }
        if self.update_interval_seconds >= self.slot_length_seconds {
            return Err(anyhow!("update_interval_seconds must be less than slot_length_seconds"));
        }

        if self.grid_fees.constant_fee_per_kwh < 0.0 {
            return Err(anyhow!("constant_fee_per_kwh cannot be negative"));
        }
        if self.grid_fees.percentage_fee < 0.0 {
            return Err(anyhow!("percentage_fee cannot be negative"));
        }

        let s = &self.storage;
        if s.battery_capacity_kwh <= 0.0 {
            return Err(anyhow!("battery_capacity_kwh must be positive"));
        }
        if !(0.0..=1.0).contains(&s.min_allowed_soc) {
            return Err(anyhow!("min_allowed_soc must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&s.initial_soc) {
            return Err(anyhow!("initial_soc must be within [0, 1]"));
        }
        if s.initial_selling_rate < s.final_selling_rate {
            return Err(anyhow!("initial_selling_rate must be >= final_selling_rate"));
        }
        if s.initial_buying_rate > s.final_buying_rate {
            return Err(anyhow!("initial_buying_rate must be <= final_buying_rate"));
        }
        if s.final_buying_rate >= s.final_selling_rate {
            return Err(anyhow!("final_buying_rate must be < final_selling_rate"));
        }

        if self.messaging.worker_pool_size == 0 {
            return Err(anyhow!("messaging.worker_pool_size cannot be zero"));
        }

        Ok(())
    }

    pub fn ticks_per_slot(&self) -> u64 {
        self.slot_length_seconds / self.tick_length_seconds
    }
}
