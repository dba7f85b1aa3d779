//! The capability an idle read must offer to be parked in the semaphore's
//! inactive-read registry.

/// A read that has been admitted, is currently idle, and can give its
/// resources back on request.
///
/// `evict` must eventually cause the read to drop (or `release`) its permit,
/// which returns the resources to the semaphore and lets queued admissions
/// proceed. Whether that happens synchronously inside `evict` or later is up
/// to the implementor.
pub trait EvictableRead {
    fn evict(self: Box<Self>);
}

/// Any one-shot closure is an evictable read; evicting it runs it.
impl<F> EvictableRead for F
where
    F: FnOnce(),
{
    fn evict(self: Box<Self>) {
        (*self)()
    }
}
