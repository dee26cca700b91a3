//! Worker catalog for RustedBridge.
//!
//! Discovers each worker's operations once per process, presents one
//! selector schema per worker to the reasoning component, and resolves the
//! component's proposed invocations back onto worker operations.

pub mod cache;
pub mod resolve;
pub mod selector;

pub use cache::{Catalog, CatalogCache, CatalogEntry};
pub use resolve::{ResolvedInvocation, resolve};
pub use selector::selector_schema;
