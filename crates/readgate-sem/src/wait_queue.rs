//! Bounded FIFO of admissions waiting for resources.
//!
//! Each waiter carries the resources it asked for, its deadline and the
//! sending half of a oneshot channel. A waiter leaves the queue exactly once:
//! admitted by a drain, expired by its deadline, removed by its own
//! (cancelled) admission future, or failed by a queue-wide shutdown.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;

use readgate_core::id::WaiterId;
use readgate_core::Resources;

use crate::error::Result;
use crate::permit::ReaderPermit;

pub(crate) type Slot = oneshot::Sender<Result<ReaderPermit>>;
pub(crate) type SlotReceiver = oneshot::Receiver<Result<ReaderPermit>>;

pub(crate) struct Waiter {
    pub(crate) id: WaiterId,
    pub(crate) resources: Resources,
    pub(crate) deadline: Instant,
    pub(crate) slot: Slot,
}

/// What a drain step should do with the front of the queue.
pub(crate) enum Next {
    /// The front waiter fits into the available resources.
    Admit(Waiter),
    /// The front waiter's deadline has already passed.
    Expire(Waiter),
    /// Queue is empty, or the front waiter does not fit. Nothing behind it is
    /// considered.
    Blocked,
}

pub(crate) struct WaitQueue {
    cap: usize,
    q: VecDeque<Waiter>,
    next_id: WaiterId,
}

impl WaitQueue {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        Self {
            cap,
            q: VecDeque::new(),
            next_id: WaiterId::new(0),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.q.len() >= self.cap
    }

    pub(crate) fn len(&self) -> usize {
        self.q.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// Append a waiter. Capacity is checked by the caller beforehand so the
    /// overload hook can run first.
    pub(crate) fn push(&mut self, resources: Resources, deadline: Instant) -> (WaiterId, SlotReceiver) {
        let (slot, rx) = oneshot::channel();
        let id = self.next_id.bump();
        self.q.push_back(Waiter {
            id,
            resources,
            deadline,
            slot,
        });
        (id, rx)
    }

    /// Pop the front waiter if it can be admitted out of `available` or has
    /// expired by `now`.
    pub(crate) fn pop_next(&mut self, available: &Resources, now: Instant) -> Next {
        let Some(front) = self.q.front() else {
            return Next::Blocked;
        };
        if front.deadline <= now {
            return self.q.pop_front().map_or(Next::Blocked, Next::Expire);
        }
        if Resources::can_satisfy(available, &front.resources) {
            return self.q.pop_front().map_or(Next::Blocked, Next::Admit);
        }
        Next::Blocked
    }

    pub(crate) fn is_front(&self, id: WaiterId) -> bool {
        self.q.front().is_some_and(|w| w.id == id)
    }

    pub(crate) fn remove(&mut self, id: WaiterId) -> Option<Waiter> {
        let pos = self.q.iter().position(|w| w.id == id)?;
        self.q.remove(pos)
    }

    /// Remove every waiter whose deadline is at or before `now`, wherever it
    /// sits in the queue.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<Waiter> {
        if !self.q.iter().any(|w| w.deadline <= now) {
            return Vec::new();
        }
        let (expired, live): (VecDeque<_>, VecDeque<_>) =
            self.q.drain(..).partition(|w| w.deadline <= now);
        self.q = live;
        expired.into()
    }

    pub(crate) fn take_all(&mut self) -> Vec<Waiter> {
        self.q.drain(..).collect()
    }
}
