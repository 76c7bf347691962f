//! Slab Exchange Engine
//!
//! The core logic for a peer-to-peer exchange for graded collectible cards. Users trade certified card instances
//! through a central order book; money moves through an escrowed payment gateway and the physical cards move through
//! a custody vault. This library is transport-agnostic: it has no HTTP surface and no delivery mechanism for
//! notifications, only the engine.
//!
//! The library is divided into a few main sections:
//! 1. Database management and control ([`mod@sqlite`]). SQLite is the supported backend. You should never need to
//!    access the database directly; use the public APIs instead. The exception is the data types used in the
//!    database, defined in the public [`mod@db_types`] module.
//! 2. The engine public APIs: order intake and matching ([`mod@exchange_api`], [`mod@matching`]), escrow settlement
//!    ([`mod@settlement`]), physical custody ([`mod@custody`]), deadline enforcement ([`mod@scheduler`]) and trade
//!    surveillance ([`mod@surveillance`]). Backends implement the traits in [`mod@traits`] to support these APIs.
//!
//! The engine also emits events ([`mod@events`]) when notable things happen, such as a trade settling or a payment
//! failing. A simple actor framework lets you hook into these and deliver them however you like.

pub mod config;
pub mod custody;
pub mod db_types;
pub mod events;
pub mod exchange_api;
pub mod helpers;
pub mod matching;
pub mod scheduler;
pub mod settlement;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod surveillance;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use config::EngineConfig;
pub use custody::{CustodyApi, CustodyApiError};
pub use exchange_api::OrderFlowApi;
pub use matching::{MatchSender, MatchWorker, MatchingEngine};
pub use scheduler::DeadlineScheduler;
pub use settlement::{SettlementApi, SettlementError};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use surveillance::SurveillanceApi;
pub use traits::{AccountManagement, CustodyManagement, ExchangeDatabase, ExchangeError};
