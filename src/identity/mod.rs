//! Worker identity: leases over a shared renewal registry.

pub mod lease;
pub mod registry;

pub use lease::IdentityLease;
pub use registry::{FileLeaseStore, InMemoryLeaseStore, LeaseRegistry, LeaseStore};
