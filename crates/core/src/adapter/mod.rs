//! Site adapter abstraction.
//!
//! This module provides the `SiteAdapter` trait the engine uses to talk to
//! media sources. An adapter turns a tag query into pages of descriptors
//! and resolves a descriptor to the final fetchable URL; the engine never
//! sees source-specific response shapes.

mod booru;
mod registry;
mod types;

pub use booru::{BooruAdapter, BooruAdapterConfig};
pub use registry::AdapterRegistry;
pub use types::*;
