//! Edge purge senders for the Regen artifact cache.
//!
//! Purging is a latency optimisation: it asks the fronting edge to drop a
//! cached response now instead of waiting for it to expire. Correctness of
//! cache reads never depends on a purge succeeding.

pub mod config;
pub mod sender;

pub use config::PurgeConfig;
pub use sender::{HttpPurger, NoopPurger, PurgeError, create_purger};
