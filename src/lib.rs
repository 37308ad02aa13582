//! GridTokenX market core
//!
//! The matching and pricing core of a discrete-event, peer-to-peer energy
//! market simulator: a two-sided market with fee-adjusted ingress and an
//! accept/split/trade state machine, the pay-as-bid/pay-as-clear matching
//! algorithms, the per-device linear price update scheduler, and the
//! storage device strategy that bids to charge and offers to discharge
//! while tracking state of charge through FIFO origin accounting.
//!
//! Area-tree construction, CSV profile readers, and the CLI/config loader
//! that would host this core in a full simulator are out of scope; this
//! crate exposes the core plus a thin boundary (`messaging`) for an
//! external process to drive it over the wire contract in `messaging`.

pub mod config;
pub mod market;
pub mod messaging;
pub mod shared;

pub use config::MarketConfig;
pub use market::{
    select_matcher, AlternativePricingScheme, Bid, EnergyOrigin, FeePolicy, FeeType, Market,
    MarketEvent, MatchingAlgorithm, MatchingAlgorithmKind, Offer, PriceUpdater, RateLimit,
    RateUpdater, StorageState, StorageStrategy, StorageStrategyConfig, Trade, TradeBidOfferInfo,
};
pub use shared::domain::errors::{DomainError, DomainResult, MarketError, MarketResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
