//! Registry of admitted-but-idle reads that can be evicted to free resources.
//!
//! Ids are handed out monotonically, so ordering by id is ordering by
//! registration time and the oldest read is always evicted first.

use std::collections::BTreeMap;
use std::fmt;

use readgate_core::id::InactiveReadId;
use readgate_core::EvictableRead;

/// Counters kept by the registry for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InactiveReadStats {
    /// Reads currently registered.
    pub population: u64,
    /// Reads evicted to make room, including ones evicted on registration.
    pub permit_based_evictions: u64,
}

/// Returned by `register_inactive_read`. Empty when the read was evicted on
/// the spot instead of being registered.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InactiveReadHandle(Option<InactiveReadId>);

impl InactiveReadHandle {
    pub(crate) fn registered(id: InactiveReadId) -> Self {
        Self(Some(id))
    }

    pub fn empty() -> Self {
        Self(None)
    }

    pub fn id(&self) -> Option<InactiveReadId> {
        self.0
    }

    pub fn is_registered(&self) -> bool {
        self.0.is_some()
    }
}

#[derive(Default)]
pub(crate) struct InactiveReads {
    reads: BTreeMap<InactiveReadId, Box<dyn EvictableRead>>,
    next_id: InactiveReadId,
    stats: InactiveReadStats,
}

impl fmt::Debug for InactiveReads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InactiveReads")
            .field("next_id", &self.next_id)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl InactiveReads {
    pub(crate) fn stats(&self) -> InactiveReadStats {
        self.stats
    }

    pub(crate) fn insert(&mut self, ir: Box<dyn EvictableRead>) -> InactiveReadId {
        let id = self.next_id.bump();
        self.reads.insert(id, ir);
        self.stats.population += 1;
        id
    }

    pub(crate) fn remove(&mut self, id: InactiveReadId) -> Option<Box<dyn EvictableRead>> {
        let ir = self.reads.remove(&id)?;
        self.stats.population -= 1;
        Some(ir)
    }

    /// Take the oldest read out for eviction. The caller invokes `evict()`
    /// after letting go of the semaphore state, since eviction may release a
    /// permit synchronously.
    pub(crate) fn pop_oldest(&mut self) -> Option<Box<dyn EvictableRead>> {
        let (_, ir) = self.reads.pop_first()?;
        self.stats.population -= 1;
        self.stats.permit_based_evictions += 1;
        Some(ir)
    }

    /// Empty the registry, oldest first. Used when the semaphore goes away;
    /// these do not count as permit-based evictions.
    pub(crate) fn take_all(&mut self) -> Vec<Box<dyn EvictableRead>> {
        self.stats.population = 0;
        std::mem::take(&mut self.reads).into_values().collect()
    }

    /// Count a read that was evicted without ever being registered.
    pub(crate) fn note_eviction(&mut self) {
        self.stats.permit_based_evictions += 1;
    }
}
