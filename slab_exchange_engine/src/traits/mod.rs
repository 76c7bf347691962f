//! Trait seams for the Slab Exchange engine.
//!
//! The engine is provider-agnostic: all persistence goes through [`ExchangeDatabase`] (and its
//! [`AccountManagement`] / [`CustodyManagement`] supertraits), all money movement through
//! [`PaymentGateway`], and order admission checks the catalog through [`CatalogLookup`].

mod catalog;
mod data_objects;
mod exchange_database;
mod payment_gateway;

pub use catalog::{CatalogError, CatalogLookup};
pub use data_objects::{FillResult, MatchOutcome, OrderBookSnapshot, OrderQueryFilter, PriceLevel};
pub use exchange_database::{AccountManagement, CustodyError, CustodyManagement, ExchangeDatabase, ExchangeError};
pub use payment_gateway::{GatewayError, PaymentGateway};
