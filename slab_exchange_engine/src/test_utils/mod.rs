//! Support code for integration tests: a throwaway database environment, an in-memory payment gateway and a static
//! card catalog.

pub mod memory_gateway;
pub mod prepare_env;
pub mod static_catalog;

pub use memory_gateway::MemoryGateway;
pub use static_catalog::StaticCatalog;
