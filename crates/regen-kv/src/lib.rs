//! Key-value store backends for the Regen artifact cache.

pub mod faulty;
pub mod memory;

pub use faulty::FaultyStore;
pub use memory::MemoryStore;
