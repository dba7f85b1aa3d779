//! Convenient re-exports for downstream crates.

pub use crate::config::SemaphoreConfig;
pub use crate::error::{Error, Result};
pub use crate::evict::EvictableRead;
pub use crate::id::{InactiveReadId, WaiterId};
pub use crate::resources::Resources;
