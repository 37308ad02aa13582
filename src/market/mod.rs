//! The market-and-matching core: the two-sided market (C1), its fee engine
//! (C2), the matching algorithms (C3), the per-device price update scheduler
//! (C4), and the storage device strategy (C5).

pub mod fees;
pub mod market;
pub mod matching;
pub mod model;
pub mod pricing;
pub mod storage_strategy;

pub use fees::{FeePolicy, FeeType};
pub use market::{Market, MarketListener};
pub use matching::{select_matcher, MatchingAlgorithm, MatchingAlgorithmKind, Recommendation};
pub use model::{Bid, MarketEvent, Offer, Trade, TradeBidOfferInfo};
pub use pricing::{PriceUpdater, RateLimit, RateUpdater};
pub use storage_strategy::{
    AlternativePricingScheme, EnergyOrigin, StorageState, StorageStrategy, StorageStrategyConfig,
};
