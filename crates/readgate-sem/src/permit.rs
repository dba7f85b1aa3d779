//! Permits and memory units: RAII grants of semaphore resources.
//!
//! A [`ReaderPermit`] is handed out on every successful admission. Clones share
//! one grant, and the grant's base cost goes back to the semaphore exactly once:
//! on [`ReaderPermit::release`] or when the last clone is dropped.
//!
//! [`MemoryUnits`] account for buffer memory whose size is known only once the
//! read completes. They debit the ledger without blocking and credit back what
//! they hold on drop.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use readgate_core::Resources;

use crate::semaphore::Shared;

/// Shared state behind all clones of one permit.
struct PermitInner {
    semaphore: Rc<Shared>,
    base_cost: Cell<Resources>,
}

impl Drop for PermitInner {
    fn drop(&mut self) {
        let cost = self.base_cost.take();
        if !cost.is_zero() {
            self.semaphore.signal(cost);
        }
    }
}

/// A grant of `{count, memory}` from a reader concurrency semaphore.
///
/// `ReaderPermit::none()` (also the `Default`) is not attached to any
/// semaphore; every operation on it is a no-op.
#[derive(Clone, Default)]
#[must_use = "dropping a `ReaderPermit` returns its resources to the semaphore"]
pub struct ReaderPermit {
    inner: Option<Rc<PermitInner>>,
}

impl ReaderPermit {
    pub(crate) fn new(semaphore: Rc<Shared>, base_cost: Resources) -> Self {
        Self {
            inner: Some(Rc::new(PermitInner {
                semaphore,
                base_cost: Cell::new(base_cost),
            })),
        }
    }

    /// The sentinel permit that does no accounting.
    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn is_none(&self) -> bool {
        self.inner.is_none()
    }

    /// Resources this permit still holds (zero after `release`).
    pub fn base_cost(&self) -> Resources {
        self.inner
            .as_ref()
            .map_or(Resources::ZERO, |inner| inner.base_cost.get())
    }

    /// Return the base cost to the semaphore now instead of on drop.
    ///
    /// The cost is moved out of the permit, so a second call (from this or any
    /// clone) and the eventual drop return nothing.
    pub fn release(&self) {
        if let Some(inner) = &self.inner {
            let cost = inner.base_cost.take();
            if !cost.is_zero() {
                inner.semaphore.signal(cost);
            }
        }
    }

    /// Debit `memory` bytes from the issuing semaphore, tied to a unit that
    /// credits them back when dropped.
    pub fn get_memory_units(&self, memory: usize) -> MemoryUnits {
        let semaphore = self.inner.as_ref().map(|inner| Rc::clone(&inner.semaphore));
        MemoryUnits::new(semaphore, memory)
    }
}

impl fmt::Debug for ReaderPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("ReaderPermit")
                .field("semaphore", &inner.semaphore.name())
                .field("base_cost", &inner.base_cost.get())
                .finish(),
            None => f.write_str("ReaderPermit(none)"),
        }
    }
}

/// A resizable memory grant. Movable, not clonable.
#[must_use = "dropping `MemoryUnits` returns their memory to the semaphore"]
pub struct MemoryUnits {
    semaphore: Option<Rc<Shared>>,
    memory: i64,
}

impl MemoryUnits {
    fn new(semaphore: Option<Rc<Shared>>, memory: usize) -> Self {
        let memory = clamp(memory);
        if let Some(sem) = &semaphore {
            if memory != 0 {
                sem.consume_memory(memory);
            }
        }
        Self { semaphore, memory }
    }

    /// Bytes currently held.
    pub fn memory(&self) -> i64 {
        self.memory
    }

    /// Resize the grant to `memory` bytes.
    ///
    /// The new amount is debited and the old one credited in a single ledger
    /// update, after which waiters are drained once.
    pub fn reset(&mut self, memory: usize) {
        let memory = clamp(memory);
        if let Some(sem) = &self.semaphore {
            sem.exchange_memory(memory, self.memory);
        }
        self.memory = memory;
    }
}

impl Drop for MemoryUnits {
    fn drop(&mut self) {
        if self.memory != 0 {
            self.reset(0);
        }
    }
}

impl fmt::Debug for MemoryUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryUnits")
            .field("attached", &self.semaphore.is_some())
            .field("memory", &self.memory)
            .finish()
    }
}

fn clamp(memory: usize) -> i64 {
    i64::try_from(memory).unwrap_or(i64::MAX)
}
