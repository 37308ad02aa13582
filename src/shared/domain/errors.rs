//! Domain error types.
//!
//! `MarketError` covers the market/matching/pricing/storage core; `DomainError`
//! is the opaque error used at the messaging boundary (wire envelope parsing,
//! worker-pool joins) that sits outside that core.

use thiserror::Error;

/// Result alias used throughout the market core.
pub type MarketResult<T> = Result<T, MarketError>;

/// Errors raised by the market, matching engine, price scheduler, and storage strategy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarketError {
    #[error("offer not found: {id}")]
    OfferNotFound { id: String },

    #[error("bid not found: {id}")]
    BidNotFound { id: String },

    #[error("invalid offer: {message}")]
    InvalidOffer { message: String },

    #[error("invalid bid: {message}")]
    InvalidBid { message: String },

    #[error("invalid trade: {message}")]
    InvalidTrade { message: String },

    /// Market is closed for mutation (slot has ended).
    #[error("market {market_id} is read-only")]
    ReadOnlyMarket { market_id: String },

    /// Capacity/power constraint prevents the requested action (storage device).
    #[error("market capacity exhausted: {message}")]
    MarketCapacityExhausted { message: String },

    #[error("wrong market type: {message}")]
    WrongMarketType { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl MarketError {
    pub fn offer_not_found(id: impl Into<String>) -> Self {
        Self::OfferNotFound { id: id.into() }
    }

    pub fn bid_not_found(id: impl Into<String>) -> Self {
        Self::BidNotFound { id: id.into() }
    }

    pub fn invalid_offer(message: impl Into<String>) -> Self {
        Self::InvalidOffer { message: message.into() }
    }

    pub fn invalid_bid(message: impl Into<String>) -> Self {
        Self::InvalidBid { message: message.into() }
    }

    pub fn invalid_trade(message: impl Into<String>) -> Self {
        Self::InvalidTrade { message: message.into() }
    }

    pub fn read_only(market_id: impl Into<String>) -> Self {
        Self::ReadOnlyMarket { market_id: market_id.into() }
    }

    pub fn capacity_exhausted(message: impl Into<String>) -> Self {
        Self::MarketCapacityExhausted { message: message.into() }
    }

    pub fn wrong_market_type(message: impl Into<String>) -> Self {
        Self::WrongMarketType { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// True for the `MarketException` family a strategy is expected to swallow
    /// and retry against the next offer/bid rather than propagate.
    pub fn is_market_exception(&self) -> bool {
        matches!(self, Self::ReadOnlyMarket { .. } | Self::MarketCapacityExhausted { .. })
    }
}

/// Result alias for the messaging boundary.
pub type DomainResult<T> = Result<T, DomainError>;

/// Opaque error for the messaging boundary, which is not itself part of the
/// market domain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("aggregate not found: {id}")]
    AggregateNotFound { id: String },

    #[error("infrastructure error: {message}")]
    Infrastructure { message: String },
}

impl DomainError {
    pub fn invalid_value<S: Into<String>>(message: S) -> Self {
        Self::InvalidValue { message: message.into() }
    }

    pub fn invalid_operation<S: Into<String>>(message: S) -> Self {
        Self::InvalidOperation { message: message.into() }
    }

    pub fn aggregate_not_found<S: Into<String>>(id: S) -> Self {
        Self::AggregateNotFound { id: id.into() }
    }

    pub fn infrastructure<S: Into<String>>(message: S) -> Self {
        Self::Infrastructure { message: message.into() }
    }
}

impl From<anyhow::Error> for DomainError {
    fn from(error: anyhow::Error) -> Self {
        DomainError::infrastructure(error.to_string())
    }
}

impl From<MarketError> for anyhow::Error {
    fn from(error: MarketError) -> Self {
        anyhow::anyhow!(error.to_string())
    }
}
