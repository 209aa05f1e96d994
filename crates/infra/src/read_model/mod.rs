//! Industry-isolated read model storage abstractions.

pub mod industry_store;

pub use industry_store::{InMemoryIndustryStore, IndustryStore};
