//! Shared infrastructure.
//!
//! Just the error types the market core and the messaging boundary share.
//! Everything else that used to live here (command/query buses, a network
//! adapter, a storage adapter, a custom logger) had no counterpart in this
//! crate's market-and-matching core and was dropped; see DESIGN.md.

pub mod domain;

pub use domain::{DomainError, DomainResult, MarketError, MarketResult};
