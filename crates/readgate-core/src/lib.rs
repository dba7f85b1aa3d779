#![forbid(unsafe_code)]
//! readgate-core: resource currency, identifiers, configuration and the
//! evictable-read capability.
//!
//! The admission machinery lives in `readgate-sem`. We keep only the shared
//! vocabulary here so readers and the file layer can depend on it without
//! pulling in the semaphore.

pub mod config;
pub mod error;
pub mod evict;
pub mod id;
pub mod prelude;
pub mod resources;

pub use config::SemaphoreConfig;
pub use error::{Error, Result};
pub use evict::EvictableRead;
pub use resources::Resources;
