//! Regen Core
//!
//! Core domain types, port traits, and error handling for the Regen artifact
//! cache. This crate has minimal dependencies and defines the shared
//! vocabulary used across all other crates.

pub mod artifact;
pub mod clock;
pub mod error;
pub mod ids;
pub mod ports;

pub use artifact::{
    ArtifactKind, CacheHit, CacheValue, DEFAULT_CACHE_TAGS_HEADER, Extra, FetchValue, GetOptions,
    Headers, PageData, PageValue, RedirectValue, RouteValue, SetContext,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use ids::*;
pub use ports::{KeyValueStore, PurgeSender, StorePath};
