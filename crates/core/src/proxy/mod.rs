//! Rotating, health-checked proxy pool.
//!
//! Workers acquire a proxy before each fetch and report the outcome back;
//! the pool is the only place proxy health is mutated. When every proxy is
//! down the pool hands out direct connections instead of blocking, and
//! says so once through the event stream.

mod pool;
mod prober;
mod types;

pub use pool::ProxyPool;
pub use prober::{HttpProber, ProxyProber};
pub use types::{ProxyHealth, ProxyOutcome, ProxyStatus};
