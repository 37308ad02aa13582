//! Shared domain primitives.
//!
//! `errors` is the only surviving member of what was once a generic
//! CQRS/DDD domain layer: the market core owns its own event (`MarketEvent`)
//! and aggregate (`Market`) types directly, so no generic `Repository` or
//! `DomainEvent` abstraction is needed here.

pub mod errors;

pub use errors::{DomainError, DomainResult, MarketError, MarketResult};
