//! Media fetching.
//!
//! `MediaFetcher` is the seam between the engine and the network: given a
//! URL, an optional proxy, and a destination path, produce the file. The
//! HTTP implementation streams to a `.part` sibling and renames into
//! place so a crashed download never leaves a plausible-looking file.

mod http;
mod traits;

pub use http::HttpFetcher;
pub use traits::{FetchedFile, MediaFetcher};
