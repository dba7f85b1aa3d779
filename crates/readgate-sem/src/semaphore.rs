//! The reader concurrency semaphore: admission control over `{count, memory}`
//! for one shard.
//!
//! Everything here is confined to a single thread. State lives behind a
//! `RefCell` and no borrow is ever held across a call that can re-enter the
//! semaphore: evicting an inactive read, resolving a waiter, or dropping a
//! permit may all call back into `signal`.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use tokio::time::{Instant, Sleep};

use readgate_core::id::WaiterId;
use readgate_core::{EvictableRead, Resources, SemaphoreConfig};

use crate::error::{Error, Result};
use crate::inactive::{InactiveReadHandle, InactiveReadStats, InactiveReads};
use crate::permit::ReaderPermit;
use crate::tracking::PeakTracker;
use crate::wait_queue::{Next, SlotReceiver, WaitQueue, Waiter};

struct State {
    resources: Resources,
    wait_list: WaitQueue,
    inactive_reads: InactiveReads,
}

impl State {
    fn may_proceed(&self, want: &Resources) -> bool {
        Resources::can_satisfy(&self.resources, want)
    }
}

/// State shared by the semaphore handle, its permits and its memory units.
pub(crate) struct Shared {
    name: Rc<str>,
    initial: Resources,
    prethrow_action: RefCell<Option<Rc<dyn Fn()>>>,
    state: RefCell<State>,
    peak: PeakTracker,
}

impl Shared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Credit `r` back and admit every waiter that now fits.
    pub(crate) fn signal(self: &Rc<Self>, r: Resources) {
        self.state.borrow_mut().resources += r;
        self.drain();
    }

    /// Debit memory without blocking and without draining.
    pub(crate) fn consume_memory(&self, memory: i64) {
        let mut st = self.state.borrow_mut();
        st.resources -= Resources::memory(memory);
        self.record_usage(&st.resources);
    }

    /// Debit `consume` and credit `signal` as one ledger update, then drain.
    pub(crate) fn exchange_memory(self: &Rc<Self>, consume: i64, signal: i64) {
        {
            let mut st = self.state.borrow_mut();
            st.resources -= Resources::memory(consume);
            st.resources += Resources::memory(signal);
            self.record_usage(&st.resources);
        }
        self.drain();
    }

    fn record_usage(&self, available: &Resources) {
        self.peak
            .record_used(self.initial.memory.saturating_sub(available.memory));
    }

    fn drain(self: &Rc<Self>) {
        loop {
            let next = {
                let mut st = self.state.borrow_mut();
                let State {
                    resources,
                    wait_list,
                    ..
                } = &mut *st;
                let next = wait_list.pop_next(resources, Instant::now());
                if let Next::Admit(w) = &next {
                    *resources -= w.resources;
                    self.record_usage(resources);
                }
                next
            };

            match next {
                Next::Admit(w) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(semaphore = %self.name, waiter = %w.id, resources = %w.resources, "admitting queued read");
                    let permit = ReaderPermit::new(Rc::clone(self), w.resources);
                    if let Err(undelivered) = w.slot.send(Ok(permit)) {
                        // The waiter went away; its permit returns the
                        // resources as it drops.
                        #[cfg(feature = "tracing")]
                        tracing::debug!(semaphore = %self.name, waiter = %w.id, "queued read gone before admission");
                        drop(undelivered);
                    }
                }
                Next::Expire(w) => self.fail_timed_out(vec![w]),
                Next::Blocked => return,
            }
        }
    }

    fn fail_timed_out(&self, waiters: Vec<Waiter>) {
        for w in waiters {
            #[cfg(feature = "tracing")]
            tracing::debug!(semaphore = %self.name, waiter = %w.id, "queued read timed out");
            let _ = w.slot.send(Err(self.timed_out()));
        }
    }

    /// Withdraw a waiter. Returns false if it already left the queue.
    ///
    /// Taking out the front waiter may unblock the ones behind it, so that
    /// case drains.
    fn cancel_waiter(self: &Rc<Self>, id: WaiterId) -> bool {
        let (removed, was_front) = {
            let mut st = self.state.borrow_mut();
            let was_front = st.wait_list.is_front(id);
            (st.wait_list.remove(id), was_front)
        };
        if removed.is_none() {
            return false;
        }
        drop(removed);
        if was_front {
            self.drain();
        }
        true
    }

    /// Resolve every queued admission with [`Error::Shutdown`].
    fn shutdown_waiters(&self) {
        let waiters = self.state.borrow_mut().wait_list.take_all();
        #[cfg(feature = "tracing")]
        tracing::debug!(semaphore = %self.name, waiters = waiters.len(), "failing queued reads");
        for w in waiters {
            let _ = w.slot.send(Err(Error::Shutdown {
                name: self.name.to_string(),
            }));
        }
    }

    fn overload(&self) -> Error {
        Error::Overload {
            name: self.name.to_string(),
        }
    }

    fn timed_out(&self) -> Error {
        Error::TimedOut {
            name: self.name.to_string(),
        }
    }
}

/// Owned only by semaphore handles, never by permits. Dropping the last
/// handle fails queued admissions and evicts parked reads, which would
/// otherwise keep the shared state alive through their permits.
struct Owner {
    shared: Rc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.shared.shutdown_waiters();
        let parked = self.shared.state.borrow_mut().inactive_reads.take_all();
        #[cfg(feature = "tracing")]
        tracing::debug!(semaphore = %self.shared.name, parked = parked.len(), "semaphore dropped, evicting parked reads");
        for ir in parked {
            ir.evict();
        }
    }
}

/// Admission control for the reads of one shard.
///
/// Cheaply cloneable; all clones refer to the same ledger, wait queue and
/// inactive-read registry. Permits and memory units keep the ledger alive, so
/// it always outlives everything it issued. Once the last handle is gone no
/// admission can wait any more: queued ones fail with [`Error::Shutdown`] and
/// parked reads are evicted.
#[derive(Clone)]
pub struct ReaderConcurrencySemaphore {
    owner: Rc<Owner>,
}

impl ReaderConcurrencySemaphore {
    pub fn new(count: i64, memory: i64, name: impl Into<String>, max_queue_length: usize) -> Self {
        let initial = Resources::new(count, memory);
        let name: String = name.into();
        let shared = Rc::new(Shared {
            name: Rc::from(name),
            initial,
            prethrow_action: RefCell::new(None),
            state: RefCell::new(State {
                resources: initial,
                wait_list: WaitQueue::with_capacity(max_queue_length),
                inactive_reads: InactiveReads::default(),
            }),
            peak: PeakTracker::new(),
        });
        Self {
            owner: Rc::new(Owner { shared }),
        }
    }

    fn inner(&self) -> &Rc<Shared> {
        &self.owner.shared
    }

    /// A semaphore that never runs out and never rejects.
    pub fn unlimited(name: impl Into<String>) -> Self {
        Self::new(i64::MAX, i64::MAX, name, usize::MAX)
    }

    pub fn from_config(cfg: &SemaphoreConfig) -> Self {
        Self::new(
            cfg.count,
            cfg.memory_bytes,
            cfg.name.clone(),
            cfg.max_queue_length,
        )
    }

    /// Hook run right before an admission is rejected with
    /// [`Error::Overload`], e.g. to dump diagnostics.
    pub fn set_prethrow_action(&self, action: impl Fn() + 'static) {
        *self.inner().prethrow_action.borrow_mut() = Some(Rc::new(action));
    }

    pub fn name(&self) -> &str {
        self.inner().name()
    }

    pub fn initial_resources(&self) -> Resources {
        self.inner().initial
    }

    /// What is left in the ledger. May be negative when oversubscribed.
    pub fn available_resources(&self) -> Resources {
        self.inner().state.borrow().resources
    }

    pub fn consumed_resources(&self) -> Resources {
        self.inner().initial - self.available_resources()
    }

    pub fn has_available_units(&self, r: &Resources) -> bool {
        self.inner().state.borrow().may_proceed(r)
    }

    /// Number of queued admissions.
    pub fn waiters(&self) -> usize {
        self.inner().state.borrow().wait_list.len()
    }

    pub fn inactive_read_stats(&self) -> InactiveReadStats {
        self.inner().state.borrow().inactive_reads.stats()
    }

    /// Highest amount of memory ever consumed from the ledger at once.
    pub fn peak_memory(&self) -> i64 {
        self.inner().peak.peak()
    }

    /// Ask for one read slot and `memory` bytes.
    ///
    /// Rejection for overload and immediate grants happen right here, before
    /// the returned future is polled. Otherwise the request is queued until a
    /// `signal` admits it or `deadline` passes. Dropping the returned
    /// [`Admission`] while it is queued withdraws the request.
    pub fn wait_admission(&self, memory: usize, deadline: Instant) -> Admission {
        let shared = self.inner();

        // Waiters past their deadline no longer count against the queue bound.
        // Purging may uncover an admittable front, which goes before us.
        let expired = shared
            .state
            .borrow_mut()
            .wait_list
            .take_expired(Instant::now());
        if !expired.is_empty() {
            shared.fail_timed_out(expired);
            shared.drain();
        }

        if shared.state.borrow().wait_list.is_full() {
            let action = shared.prethrow_action.borrow().clone();
            if let Some(action) = action {
                action();
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(semaphore = %shared.name, memory, "reader queue overload");
            return Admission::ready(Err(shared.overload()));
        }

        let r = Resources::for_read(memory);
        loop {
            let victim = {
                let mut st = shared.state.borrow_mut();
                if st.may_proceed(&r) {
                    break;
                }
                st.inactive_reads.pop_oldest()
            };
            let Some(ir) = victim else {
                break;
            };
            #[cfg(feature = "tracing")]
            tracing::debug!(semaphore = %shared.name, wanted = %r, "evicting inactive read to admit a new one");
            ir.evict();
        }

        let mut st = shared.state.borrow_mut();
        if st.may_proceed(&r) {
            st.resources -= r;
            shared.record_usage(&st.resources);
            drop(st);
            #[cfg(feature = "tracing")]
            tracing::trace!(semaphore = %shared.name, resources = %r, "admitted read");
            return Admission::ready(Ok(ReaderPermit::new(Rc::clone(shared), r)));
        }

        let (id, rx) = st.wait_list.push(r, deadline);
        drop(st);
        #[cfg(feature = "tracing")]
        tracing::trace!(semaphore = %shared.name, waiter = %id, resources = %r, "queued read");
        Admission {
            state: AdmissionState::Queued(Queued {
                semaphore: Rc::downgrade(shared),
                name: Rc::clone(&shared.name),
                id,
                deadline,
                rx,
                timer: None,
            }),
        }
    }

    /// Debit `r` unconditionally and hand out a permit for it. Never waits;
    /// may drive the ledger negative.
    pub fn consume_resources(&self, r: Resources) -> ReaderPermit {
        {
            let mut st = self.inner().state.borrow_mut();
            st.resources -= r;
            self.inner().record_usage(&st.resources);
        }
        ReaderPermit::new(Rc::clone(self.inner()), r)
    }

    /// Return `r` to the ledger and admit every waiter that now fits.
    pub fn signal(&self, r: Resources) {
        self.inner().signal(r);
    }

    pub fn consume_memory(&self, memory: usize) {
        self.inner()
            .consume_memory(i64::try_from(memory).unwrap_or(i64::MAX));
    }

    pub fn signal_memory(&self, memory: usize) {
        self.inner()
            .signal(Resources::memory(i64::try_from(memory).unwrap_or(i64::MAX)));
    }

    /// Park an idle read so its resources can be reclaimed under pressure.
    ///
    /// If admissions are already queued the read is evicted on the spot and
    /// the returned handle is empty.
    pub fn register_inactive_read(&self, ir: Box<dyn EvictableRead>) -> InactiveReadHandle {
        let mut st = self.inner().state.borrow_mut();
        if st.wait_list.is_empty() {
            let id = st.inactive_reads.insert(ir);
            return InactiveReadHandle::registered(id);
        }

        st.inactive_reads.note_eviction();
        drop(st);
        #[cfg(feature = "tracing")]
        tracing::debug!(semaphore = %self.inner().name, "evicting inactive read on registration, admissions are queued");
        ir.evict();
        InactiveReadHandle::empty()
    }

    /// Take a parked read back. `None` means it was evicted in the meantime;
    /// the caller must treat it as gone.
    pub fn unregister_inactive_read(
        &self,
        handle: InactiveReadHandle,
    ) -> Option<Box<dyn EvictableRead>> {
        let id = handle.id()?;
        self.inner().state.borrow_mut().inactive_reads.remove(id)
    }

    /// Evict the oldest parked read. Returns false if there was none.
    pub fn try_evict_one_inactive_read(&self) -> bool {
        let victim = self.inner().state.borrow_mut().inactive_reads.pop_oldest();
        match victim {
            Some(ir) => {
                ir.evict();
                true
            }
            None => false,
        }
    }

    /// Fail every queued admission with [`Error::Shutdown`].
    pub fn broken(&self) {
        self.inner().shutdown_waiters();
    }
}

impl fmt::Debug for ReaderConcurrencySemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner().state.borrow();
        f.debug_struct("ReaderConcurrencySemaphore")
            .field("name", &self.inner().name)
            .field("initial", &self.inner().initial)
            .field("available", &st.resources)
            .field("waiters", &st.wait_list.len())
            .field("inactive_reads", &st.inactive_reads)
            .finish()
    }
}

/// Outcome of [`ReaderConcurrencySemaphore::wait_admission`].
#[must_use = "dropping an `Admission` withdraws the request"]
pub struct Admission {
    state: AdmissionState,
}

enum AdmissionState {
    Ready(Result<ReaderPermit>),
    Queued(Queued),
    Done,
}

struct Queued {
    semaphore: Weak<Shared>,
    name: Rc<str>,
    id: WaiterId,
    deadline: Instant,
    rx: SlotReceiver,
    // Armed on first poll so that admissions can be created outside a runtime.
    timer: Option<Pin<Box<Sleep>>>,
}

impl Queued {
    fn shutdown(&self) -> Error {
        Error::Shutdown {
            name: self.name.to_string(),
        }
    }

    fn poll_admitted(&mut self, cx: &mut Context<'_>) -> Poll<Result<ReaderPermit>> {
        if let Poll::Ready(res) = Pin::new(&mut self.rx).poll(cx) {
            return Poll::Ready(res.unwrap_or_else(|_| Err(self.shutdown())));
        }

        let deadline = self.deadline;
        let timer = self
            .timer
            .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
        if timer.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }

        let Some(sem) = self.semaphore.upgrade() else {
            return Poll::Ready(Err(self.shutdown()));
        };
        if sem.cancel_waiter(self.id) {
            #[cfg(feature = "tracing")]
            tracing::debug!(semaphore = %self.name, waiter = %self.id, "queued read timed out");
            return Poll::Ready(Err(sem.timed_out()));
        }
        // Someone resolved the slot first; that outcome wins.
        match self.rx.try_recv() {
            Ok(res) => Poll::Ready(res),
            Err(_) => Poll::Ready(Err(sem.timed_out())),
        }
    }
}

impl Admission {
    fn ready(res: Result<ReaderPermit>) -> Self {
        Self {
            state: AdmissionState::Ready(res),
        }
    }

    /// Whether the request is waiting in the queue.
    pub fn is_queued(&self) -> bool {
        matches!(self.state, AdmissionState::Queued(_))
    }
}

impl Future for Admission {
    type Output = Result<ReaderPermit>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, AdmissionState::Done) {
            AdmissionState::Ready(res) => Poll::Ready(res),
            AdmissionState::Queued(mut q) => match q.poll_admitted(cx) {
                Poll::Ready(res) => Poll::Ready(res),
                Poll::Pending => {
                    this.state = AdmissionState::Queued(q);
                    Poll::Pending
                }
            },
            AdmissionState::Done => panic!("`Admission` polled after completion"),
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if let AdmissionState::Queued(q) = &self.state {
            if let Some(sem) = q.semaphore.upgrade() {
                sem.cancel_waiter(q.id);
            }
        }
    }
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            AdmissionState::Ready(Ok(_)) => "admitted",
            AdmissionState::Ready(Err(_)) => "rejected",
            AdmissionState::Queued(_) => "queued",
            AdmissionState::Done => "done",
        };
        f.debug_struct("Admission").field("state", &state).finish()
    }
}
