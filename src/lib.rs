#![doc = include_str!("../README.md")]

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod listener;
pub mod logging;
pub mod record;
pub mod status;
pub mod supervision;
pub mod tag;

pub use cache::flow::{CacheEvent, CacheFlow, DefaultCacheFlow, SupervisionCacheFlow};
pub use cache::C2monCache;
pub use error::{CacheError, Result};
pub use record::{Cacheable, Id, RawUpdate, Timestamp};

/// the current app version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
