//! Cross-broker subscription propagation and the registration cache behind it.

mod manager;
mod registration;

pub use manager::FederationManager;
pub use registration::{
    CoverageDescriptor, RegistrationCache, RegistrationCacheItem, RegistrationSnapshot,
};
