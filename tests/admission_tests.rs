//! Admission protocol tests: immediate grants, queueing, FIFO draining,
//! overload, timeouts and shutdown.

use std::cell::Cell;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;

use readgate_core::{Resources, SemaphoreConfig};
use readgate_sem::{Admission, Error, MemoryUnits, ReaderConcurrencySemaphore, ReaderPermit};
use tokio::time::Instant;

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(3600)
}

#[tokio::test]
async fn test_immediate_admission_debits_ledger() {
    let sem = ReaderConcurrencySemaphore::new(5, 1000, "immediate", 10);

    let adm = sem.wait_admission(300, far_deadline());
    assert!(!adm.is_queued());
    let permit = adm.await.expect("admission failed");

    assert_eq!(permit.base_cost(), Resources::new(1, 300));
    assert_eq!(sem.available_resources(), Resources::new(4, 700));

    drop(permit);
    assert_eq!(sem.available_resources(), Resources::new(5, 1000));
}

#[tokio::test]
async fn test_queue_overload_rejects_third_waiter() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "overload", 2);
    let hook_calls = Rc::new(Cell::new(0));
    let calls = Rc::clone(&hook_calls);
    sem.set_prethrow_action(move || calls.set(calls.get() + 1));

    // Nothing free: every request has to queue.
    let _holder = sem.consume_resources(Resources::new(1, 100));

    let first = sem.wait_admission(10, far_deadline());
    let second = sem.wait_admission(10, far_deadline());
    assert!(first.is_queued());
    assert!(second.is_queued());
    assert_eq!(hook_calls.get(), 0);

    let third = sem.wait_admission(10, far_deadline());
    assert!(!third.is_queued());
    assert_eq!(hook_calls.get(), 1);

    let err = third.await.unwrap_err();
    assert!(err.is_overload());
    assert_eq!(
        err,
        Error::Overload {
            name: "overload".into()
        }
    );
    assert_eq!(sem.waiters(), 2);
    assert_eq!(sem.available_resources(), Resources::new(0, 0));
}

#[tokio::test]
async fn test_zero_length_queue_never_queues() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "no-queue", 0);
    let _holder = sem.consume_resources(Resources::new(1, 100));
    let err = sem.wait_admission(1, far_deadline()).await.unwrap_err();
    assert!(err.is_overload());
}

#[tokio::test]
async fn test_fifo_admission_does_not_skip_ahead() {
    let sem = ReaderConcurrencySemaphore::new(10, 100, "fifo", 10);
    let holder = sem.consume_resources(Resources::new(0, 100));

    let big = sem.wait_admission(60, far_deadline());
    let small = sem.wait_admission(30, far_deadline());
    assert_eq!(sem.waiters(), 2);

    // 40 bytes free: the small request would fit, but the big one is first.
    sem.signal_memory(40);
    assert_eq!(sem.waiters(), 2);
    assert_eq!(sem.available_resources(), Resources::new(10, 40));

    // 60 bytes free: only the big one fits.
    sem.signal_memory(20);
    assert_eq!(sem.waiters(), 1);
    assert_eq!(sem.available_resources(), Resources::new(9, 0));

    let big = big.await.expect("big admission");
    assert_eq!(big.base_cost(), Resources::new(1, 60));

    // Returning the big read's memory admits the small one.
    drop(big);
    assert_eq!(sem.waiters(), 0);
    let small = small.await.expect("small admission");
    assert_eq!(small.base_cost(), Resources::new(1, 30));
    assert_eq!(sem.available_resources(), Resources::new(9, 30));

    drop(small);
    drop(holder);
    assert_eq!(sem.available_resources(), Resources::new(10, 100));
}

#[tokio::test]
async fn test_single_signal_admits_all_that_fit_and_no_more() {
    let sem = ReaderConcurrencySemaphore::new(10, 100, "greedy", 10);
    let holder = sem.consume_resources(Resources::new(0, 100));

    let a = sem.wait_admission(40, far_deadline());
    let b = sem.wait_admission(40, far_deadline());
    let c = sem.wait_admission(40, far_deadline());

    drop(holder);
    // 100 bytes cover a and b (80) but not c.
    assert_eq!(sem.waiters(), 1);
    assert_eq!(sem.available_resources(), Resources::new(8, 20));
    assert!(sem.available_resources().is_non_negative());

    let a = a.await.unwrap();
    let b = b.await.unwrap();
    drop(a);
    assert_eq!(sem.waiters(), 0);
    let c = c.await.unwrap();
    assert_eq!(sem.available_resources(), Resources::new(8, 20));
    drop((b, c));
    assert_eq!(sem.available_resources(), Resources::new(10, 100));
}

#[tokio::test]
async fn test_count_dimension_limits_admission() {
    let sem = ReaderConcurrencySemaphore::new(2, 1_000_000, "count", 10);
    let p1 = sem.wait_admission(1, far_deadline()).await.unwrap();
    let p2 = sem.wait_admission(1, far_deadline()).await.unwrap();
    let third = sem.wait_admission(1, far_deadline());
    assert!(third.is_queued());

    p1.release();
    assert_eq!(sem.waiters(), 0);
    let p3 = third.await.unwrap();
    assert_eq!(sem.available_resources().count, 0);
    drop((p1, p2, p3));
    assert_eq!(sem.available_resources(), Resources::new(2, 1_000_000));
}

#[tokio::test(start_paused = true)]
async fn test_queued_request_times_out_and_leaves_ledger_untouched() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "timeout", 10);
    let holder = sem.consume_resources(Resources::new(1, 100));
    let before = sem.available_resources();

    let start = Instant::now();
    let deadline = start + Duration::from_millis(250);
    let err = sem.wait_admission(10, deadline).await.unwrap_err();

    assert!(err.is_timed_out());
    assert!(Instant::now() >= deadline);
    assert_eq!(sem.waiters(), 0);
    assert_eq!(sem.available_resources(), before);

    drop(holder);
    assert_eq!(sem.available_resources(), Resources::new(1, 100));
}

#[tokio::test(start_paused = true)]
async fn test_expired_waiter_is_not_admitted_by_late_signal() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "late", 10);
    let holder = sem.consume_resources(Resources::new(1, 100));

    let adm = sem.wait_admission(10, Instant::now() + Duration::from_millis(50));
    tokio::time::advance(Duration::from_millis(100)).await;

    // The deadline passed before the resources came back: the drain must
    // time the waiter out rather than admit it.
    drop(holder);
    assert_eq!(sem.waiters(), 0);
    assert_eq!(sem.available_resources(), Resources::new(1, 100));

    let err = adm.await.unwrap_err();
    assert!(err.is_timed_out());
    assert_eq!(sem.available_resources(), Resources::new(1, 100));
}

#[tokio::test(start_paused = true)]
async fn test_admission_before_deadline_wins() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "race", 10);
    let holder = sem.consume_resources(Resources::new(1, 100));

    let adm = sem.wait_admission(10, Instant::now() + Duration::from_millis(50));
    drop(holder);
    tokio::time::advance(Duration::from_millis(100)).await;

    // Admitted first, so the later deadline has no effect.
    let permit = adm.await.expect("admitted before deadline");
    assert_eq!(permit.base_cost(), Resources::new(1, 10));
    assert_eq!(sem.available_resources(), Resources::new(0, 90));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_waiters_free_queue_slots() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "slots", 1);
    let _holder = sem.consume_resources(Resources::new(1, 100));

    let stale = sem.wait_admission(10, Instant::now() + Duration::from_millis(10));
    tokio::time::advance(Duration::from_millis(20)).await;

    // The stale waiter no longer occupies the only slot.
    let fresh = sem.wait_admission(10, far_deadline());
    assert!(fresh.is_queued());
    assert!(stale.await.unwrap_err().is_timed_out());
    assert_eq!(sem.waiters(), 1);
}

#[tokio::test]
async fn test_dropping_a_queued_admission_withdraws_it() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "cancel", 10);
    let holder = sem.consume_resources(Resources::new(1, 100));

    let cancelled = sem.wait_admission(50, far_deadline());
    let next = sem.wait_admission(50, far_deadline());
    drop(cancelled);
    assert_eq!(sem.waiters(), 1);

    drop(holder);
    let permit = next.await.unwrap();
    assert_eq!(sem.available_resources(), Resources::new(0, 50));
    drop(permit);
    assert_eq!(sem.available_resources(), Resources::new(1, 100));
}

#[tokio::test(start_paused = true)]
async fn test_front_timeout_admits_waiters_behind_it() {
    let sem = ReaderConcurrencySemaphore::new(4, 100, "front-timeout", 10);
    sem.consume_memory(100);

    let big = sem.wait_admission(100, Instant::now() + Duration::from_millis(50));
    let small = sem.wait_admission(10, far_deadline());
    sem.signal_memory(50);
    // The small request fits but sits behind the big one.
    assert_eq!(sem.waiters(), 2);

    assert!(big.await.unwrap_err().is_timed_out());
    assert_eq!(sem.waiters(), 0);
    assert_eq!(sem.available_resources(), Resources::new(3, 40));
    let small = small.await.expect("admitted once the front timed out");
    assert_eq!(small.base_cost(), Resources::new(1, 10));
}

#[tokio::test]
async fn test_dropping_front_admission_admits_waiters_behind_it() {
    let sem = ReaderConcurrencySemaphore::new(4, 100, "front-drop", 10);
    sem.consume_memory(100);

    let big = sem.wait_admission(100, far_deadline());
    let small = sem.wait_admission(10, far_deadline());
    sem.signal_memory(50);
    assert_eq!(sem.waiters(), 2);

    drop(big);
    assert_eq!(sem.waiters(), 0);
    assert_eq!(sem.available_resources(), Resources::new(3, 40));
    assert!(small.await.is_ok());
}

#[tokio::test]
async fn test_dropping_non_front_admission_keeps_order() {
    let sem = ReaderConcurrencySemaphore::new(4, 100, "middle-drop", 10);
    sem.consume_memory(100);

    let big = sem.wait_admission(100, far_deadline());
    let middle = sem.wait_admission(20, far_deadline());
    let small = sem.wait_admission(10, far_deadline());
    sem.signal_memory(50);

    drop(middle);
    assert_eq!(sem.waiters(), 2);
    assert_eq!(sem.available_resources(), Resources::new(4, 50));
    assert!(big.is_queued());
    assert!(small.is_queued());
}

#[tokio::test(start_paused = true)]
async fn test_newcomer_does_not_overtake_waiter_behind_expired_front() {
    let sem = ReaderConcurrencySemaphore::new(4, 100, "purge", 10);
    sem.consume_memory(100);

    let big = sem.wait_admission(100, Instant::now() + Duration::from_millis(50));
    let small = sem.wait_admission(10, far_deadline());
    sem.signal_memory(50);
    tokio::time::advance(Duration::from_millis(60)).await;

    // Purging the expired front admits the queued request first; only then
    // is the newcomer looked at, and 40 bytes are not enough for it.
    let newcomer = sem.wait_admission(45, far_deadline());
    assert!(newcomer.is_queued());
    assert_eq!(sem.waiters(), 1);
    assert_eq!(sem.available_resources(), Resources::new(3, 40));

    assert!(big.await.unwrap_err().is_timed_out());
    assert!(small.await.is_ok());
}

#[tokio::test]
async fn test_unobserved_grant_is_returned_on_drop() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "unobserved", 10);
    let holder = sem.consume_resources(Resources::new(1, 100));
    let adm = sem.wait_admission(50, far_deadline());

    drop(holder);
    assert_eq!(sem.available_resources(), Resources::new(0, 50));

    // The permit sits in the completion slot; dropping the admission frees it.
    drop(adm);
    assert_eq!(sem.available_resources(), Resources::new(1, 100));
}

#[tokio::test]
async fn test_broken_fails_all_waiters() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "broken", 10);
    let _holder = sem.consume_resources(Resources::new(1, 100));
    let a = sem.wait_admission(10, far_deadline());
    let b = sem.wait_admission(10, far_deadline());

    sem.broken();
    assert_eq!(sem.waiters(), 0);
    assert_eq!(
        a.await.unwrap_err(),
        Error::Shutdown {
            name: "broken".into()
        }
    );
    assert!(matches!(b.await, Err(Error::Shutdown { .. })));
}

#[tokio::test]
async fn test_dropping_semaphore_fails_waiters() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "dropped", 10);
    sem.consume_memory(100);
    let adm = sem.wait_admission(10, far_deadline());
    assert!(adm.is_queued());

    drop(sem);
    assert!(matches!(adm.await, Err(Error::Shutdown { .. })));
}

#[tokio::test]
async fn test_dropping_semaphore_fails_waiters_while_permits_live() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "dropped-live", 10);
    let holder = sem.wait_admission(100, far_deadline()).await.unwrap();
    let adm = sem.wait_admission(10, far_deadline());
    assert!(adm.is_queued());

    drop(sem);
    assert!(matches!(adm.await, Err(Error::Shutdown { .. })));
    // The permit still returns to its ledger.
    assert_eq!(holder.base_cost(), Resources::new(1, 100));
    drop(holder);
}

#[tokio::test]
async fn test_consume_resources_may_oversubscribe() {
    let sem = ReaderConcurrencySemaphore::new(1, 100, "oversub", 10);
    let a = sem.consume_resources(Resources::new(1, 80));
    let b = sem.consume_resources(Resources::new(1, 80));
    assert_eq!(sem.available_resources(), Resources::new(-1, -60));
    assert_eq!(sem.peak_memory(), 160);

    // Blocking admissions wait until the ledger is back above the ask.
    let waiting = sem.wait_admission(10, far_deadline());
    assert!(waiting.is_queued());
    drop(a);
    assert!(waiting.is_queued());
    assert_eq!(sem.waiters(), 1);
    drop(b);
    assert_eq!(sem.waiters(), 0);
    let permit = waiting.await.unwrap();
    assert_eq!(sem.available_resources(), Resources::new(0, 90));
    drop(permit);
}

#[tokio::test]
async fn test_memory_units_block_and_unblock_waiters() {
    let sem = ReaderConcurrencySemaphore::new(4, 1000, "units", 10);
    let permit = sem.wait_admission(0, far_deadline()).await.unwrap();

    let mut units = permit.get_memory_units(900);
    let waiter = sem.wait_admission(500, far_deadline());
    assert!(waiter.is_queued());

    // Shrinking to the real buffer size makes room.
    units.reset(400);
    assert_eq!(sem.waiters(), 0);
    let second = waiter.await.unwrap();
    assert_eq!(sem.available_resources(), Resources::new(2, 100));

    drop((units, second, permit));
    assert_eq!(sem.available_resources(), Resources::new(4, 1000));
}

#[tokio::test]
async fn test_memory_unit_reset_is_one_combined_update() {
    let sem = ReaderConcurrencySemaphore::new(2, 100, "reset", 10);
    let permit = sem.consume_resources(Resources::new(1, 0));
    let mut units = permit.get_memory_units(100);

    let waiter = sem.wait_admission(100, far_deadline());
    assert!(waiter.is_queued());

    // Resizing to the same amount must not expose the old bytes to the
    // waiter in between.
    units.reset(100);
    assert!(waiter.is_queued());
    assert_eq!(sem.waiters(), 1);
    assert_eq!(sem.available_resources(), Resources::new(1, 0));

    units.reset(0);
    assert_eq!(sem.waiters(), 0);
    let admitted = waiter.await.unwrap();
    assert_eq!(sem.available_resources(), Resources::new(0, 0));

    drop((admitted, units, permit));
    assert_eq!(sem.available_resources(), Resources::new(2, 100));
}

#[tokio::test]
async fn test_unlimited_semaphore_always_admits() {
    let sem = ReaderConcurrencySemaphore::unlimited("unlimited");
    let permits: Vec<ReaderPermit> = {
        let mut v = Vec::new();
        for _ in 0..1000 {
            v.push(sem.wait_admission(1 << 20, far_deadline()).await.unwrap());
        }
        v
    };
    assert_eq!(sem.waiters(), 0);
    assert_eq!(sem.consumed_resources(), Resources::new(1000, 1000 << 20));
    drop(permits);
    assert_eq!(sem.consumed_resources(), Resources::ZERO);
}

#[tokio::test]
async fn test_from_config() {
    let cfg = SemaphoreConfig {
        name: "configured".into(),
        count: 3,
        memory_bytes: 4096,
        max_queue_length: 5,
        default_timeout_ms: 100,
    };
    let sem = ReaderConcurrencySemaphore::from_config(&cfg);
    assert_eq!(sem.name(), "configured");
    assert_eq!(sem.initial_resources(), Resources::new(3, 4096));
    assert!(sem.has_available_units(&Resources::new(3, 4096)));
    assert!(!sem.has_available_units(&Resources::new(4, 1)));
}

/// Poll every pending admission once, moving granted permits out.
async fn collect_grants(pending: &mut Vec<Admission>, granted: &mut Vec<ReaderPermit>) {
    let mut i = 0;
    while i < pending.len() {
        let polled = poll_fn(|cx| Poll::Ready(Pin::new(&mut pending[i]).poll(cx))).await;
        match polled {
            Poll::Ready(res) => {
                drop(pending.swap_remove(i));
                if let Ok(permit) = res {
                    granted.push(permit);
                }
            }
            Poll::Pending => i += 1,
        }
    }
}

fn assert_conserved(
    sem: &ReaderConcurrencySemaphore,
    initial: Resources,
    granted: &[ReaderPermit],
    units: &[MemoryUnits],
) {
    let mut total = sem.available_resources();
    for p in granted {
        total += p.base_cost();
    }
    for u in units {
        total += Resources::memory(u.memory());
    }
    assert_eq!(total, initial);
}

/// Deterministic pseudo-random walk over admit/queue/cancel/release/resize
/// operations, checking conservation after every step.
#[tokio::test]
async fn test_conservation_over_mixed_operations() {
    let initial = Resources::new(8, 10_000);
    let sem = ReaderConcurrencySemaphore::new(initial.count, initial.memory, "conserve", 16);

    let mut granted: Vec<ReaderPermit> = Vec::new();
    let mut pending: Vec<Admission> = Vec::new();
    let mut units: Vec<MemoryUnits> = Vec::new();
    let mut queued_grants = 0usize;
    let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut next = || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed
    };

    for _ in 0..1000 {
        match next() % 8 {
            0 | 1 => {
                let adm = sem.wait_admission((next() % 3000) as usize, far_deadline());
                if adm.is_queued() {
                    pending.push(adm);
                } else if let Ok(p) = adm.await {
                    granted.push(p);
                }
            }
            2 => {
                let r = Resources::new(1, (next() % 500) as i64);
                granted.push(sem.consume_resources(r));
            }
            3 | 4 => {
                if !granted.is_empty() {
                    let idx = (next() as usize) % granted.len();
                    drop(granted.swap_remove(idx));
                }
            }
            5 => {
                if !granted.is_empty() {
                    let idx = (next() as usize) % granted.len();
                    units.push(granted[idx].get_memory_units((next() % 300) as usize));
                }
            }
            6 => {
                if let Some(u) = units.last_mut() {
                    u.reset((next() % 600) as usize);
                } else if !pending.is_empty() {
                    let idx = (next() as usize) % pending.len();
                    drop(pending.swap_remove(idx));
                }
            }
            _ => {
                if !units.is_empty() {
                    let idx = (next() as usize) % units.len();
                    units.swap_remove(idx);
                }
            }
        }

        let before = granted.len();
        collect_grants(&mut pending, &mut granted).await;
        queued_grants += granted.len() - before;
        assert_conserved(&sem, initial, &granted, &units);
        assert_eq!(sem.waiters(), pending.len());
    }

    // The walk must have exercised the queue, not just immediate grants.
    assert!(queued_grants > 0);

    units.clear();
    granted.clear();
    collect_grants(&mut pending, &mut granted).await;
    granted.clear();
    pending.clear();
    assert_eq!(sem.waiters(), 0);
    assert_eq!(sem.available_resources(), initial);
}
