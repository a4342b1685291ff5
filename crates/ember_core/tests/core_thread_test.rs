//! Integration tests for the core thread.

use ember_core::{CoreError, CoreThread, CoreThreadConfig, WorkerSlots};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn start() -> Arc<CoreThread> {
    CoreThread::new(CoreThreadConfig::default()).unwrap()
}

#[test]
fn test_single_producer_fifo() {
    let core = start();
    let log = Arc::new(Mutex::new(Vec::new()));
    let accessor = core.get_accessor();

    for i in 0..1000 {
        let log = Arc::clone(&log);
        accessor.queue_command(move || log.lock().push(i), false);
    }
    accessor.submit_to_core_thread(true).unwrap();

    assert_eq!(*log.lock(), (0..1000).collect::<Vec<_>>());
}

#[test]
fn test_fifo_across_many_submits() {
    let core = start();
    let log = Arc::new(Mutex::new(Vec::new()));
    let accessor = core.get_accessor();

    for chunk in 0..50 {
        for i in 0..20 {
            let log = Arc::clone(&log);
            accessor.queue_command(move || log.lock().push(chunk * 20 + i), false);
        }
        accessor.submit_to_core_thread(false).unwrap();
    }
    core.submit_accessors(true).unwrap();

    assert_eq!(*log.lock(), (0..1000).collect::<Vec<_>>());
}

#[test]
fn test_blocking_command_waits() {
    let core = start();
    let done = Arc::new(AtomicUsize::new(0));

    let d = Arc::clone(&done);
    core.queue_command(
        move || {
            thread::sleep(Duration::from_millis(20));
            d.store(1, Ordering::SeqCst);
        },
        true,
    )
    .unwrap();

    // Returned only after the body ran
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[test]
fn test_non_blocking_runs_exactly_once() {
    let core = start();
    let runs = Arc::new(AtomicUsize::new(0));

    let r = Arc::clone(&runs);
    core.queue_command(
        move || {
            r.fetch_add(1, Ordering::SeqCst);
        },
        false,
    )
    .unwrap();

    core.get_synced_accessor().submit_to_core_thread(true).unwrap();
    core.shutdown().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_return_command() {
    let core = start();

    let blocking = core.queue_return_command(|| 6 * 7, true).unwrap();
    assert!(blocking.is_complete());
    assert_eq!(blocking.try_take(), Ok(Some(42)));

    let deferred = core
        .queue_return_command(|| "swapchain".to_string(), false)
        .unwrap();
    assert_eq!(deferred.wait().unwrap(), "swapchain");
}

#[test]
fn test_self_submission_executes_in_place() {
    let core = start();
    let log = Arc::new(Mutex::new(Vec::new()));

    let inner_core = Arc::clone(&core);
    let l = Arc::clone(&log);
    core.queue_command(
        move || {
            l.lock().push("before");

            let l2 = Arc::clone(&l);
            // Would deadlock if it were queued and waited on
            inner_core.queue_command(move || l2.lock().push("inner"), true).unwrap();

            let value = inner_core.queue_return_command(|| 9u8, false).unwrap();
            assert_eq!(value.try_take(), Ok(Some(9)));

            l.lock().push("after");
        },
        true,
    )
    .unwrap();

    assert_eq!(*log.lock(), vec!["before", "inner", "after"]);
    assert_eq!(core.pending_count(), 0);
}

#[test]
fn test_accessor_scenario_blocking_submit() {
    let core = start();
    let log = Arc::new(Mutex::new(Vec::new()));
    let accessor = core.get_accessor();

    let l = Arc::clone(&log);
    accessor.queue_command(move || l.lock().push("C1"), false);
    let l = Arc::clone(&log);
    accessor.queue_command(move || l.lock().push("C2"), true);

    accessor.submit_to_core_thread(true).unwrap();
    assert_eq!(*log.lock(), vec!["C1", "C2"]);
}

#[test]
fn test_two_producers_blocking_concurrently() {
    let core = start();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..2)
        .map(|producer| {
            let core = Arc::clone(&core);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for i in 0..200 {
                    let seen = Arc::clone(&seen);
                    core.queue_command(move || seen.lock().push((producer, i)), true)
                        .unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let seen = seen.lock();
    assert_eq!(seen.len(), 400);
    for producer in 0..2 {
        let order: Vec<_> = seen
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, i)| *i)
            .collect();
        assert_eq!(order, (0..200).collect::<Vec<_>>());
    }
}

#[test]
fn test_many_producers_stress() {
    let core = start();
    let total = Arc::new(AtomicUsize::new(0));
    let num_threads = 8;
    let ops_per_thread = 500;

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let core = Arc::clone(&core);
            let total = Arc::clone(&total);
            thread::spawn(move || {
                let accessor = core.get_accessor();
                for i in 0..ops_per_thread {
                    let total = Arc::clone(&total);
                    accessor.queue_command(
                        move || {
                            total.fetch_add(1, Ordering::Relaxed);
                        },
                        false,
                    );
                    if i % 50 == 49 {
                        accessor.submit_to_core_thread(i % 100 == 99).unwrap();
                    }
                }
                accessor.submit_to_core_thread(true).unwrap();
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(total.load(Ordering::Relaxed), num_threads * ops_per_thread);
    assert_eq!(core.accessor_count(), num_threads);
}

#[test]
fn test_submit_accessors_sweeps_every_thread() {
    let core = start();
    let total = Arc::new(AtomicUsize::new(0));

    // Producers fill their accessors but never submit
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let core = Arc::clone(&core);
            let total = Arc::clone(&total);
            thread::spawn(move || {
                let accessor = core.get_accessor();
                for _ in 0..10 {
                    let total = Arc::clone(&total);
                    accessor.queue_command(
                        move || {
                            total.fetch_add(1, Ordering::SeqCst);
                        },
                        false,
                    );
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(total.load(Ordering::SeqCst), 0);
    core.submit_accessors(true).unwrap();
    assert_eq!(total.load(Ordering::SeqCst), 40);
}

#[test]
fn test_sweep_racing_owner_submit_keeps_order() {
    const ROUNDS: usize = 500;

    let core = start();
    let log = Arc::new(Mutex::new(Vec::new()));
    let stop = Arc::new(AtomicBool::new(false));

    // Frame driver sweeping every accessor as fast as it can
    let sweeper = {
        let core = Arc::clone(&core);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut sweeps = 0usize;
            while !stop.load(Ordering::Acquire) {
                core.submit_accessors(false).unwrap();
                sweeps += 1;
                thread::yield_now();
            }
            sweeps
        })
    };

    let owner = {
        let core = Arc::clone(&core);
        let log = Arc::clone(&log);
        thread::spawn(move || {
            let accessor = core.get_accessor();
            let mut queued = 0usize;

            for round in 0..ROUNDS {
                // C1 non-blocking, C2 blocking
                for blocking in [false, true] {
                    let log = Arc::clone(&log);
                    let seq = queued;
                    accessor.queue_command(move || log.lock().push(seq), blocking);
                    queued += 1;
                }
                accessor.submit_to_core_thread(true).unwrap();
                assert_eq!(
                    log.lock().len(),
                    queued,
                    "round {round}: blocking submit returned before its commands ran"
                );

                // Nothing pending: acts as a barrier only
                if round % 8 == 0 {
                    accessor.submit_to_core_thread(true).unwrap();
                    assert_eq!(log.lock().len(), queued);
                }
            }
            queued
        })
    };

    let total = owner.join().unwrap();
    stop.store(true, Ordering::Release);
    assert!(sweeper.join().unwrap() > 0);

    assert_eq!(*log.lock(), (0..total).collect::<Vec<_>>());
    core.shutdown().unwrap();
}

#[test]
fn test_panicking_command_still_notifies() {
    let core = start();
    let after = Arc::new(AtomicUsize::new(0));

    // Must not hang
    core.queue_command(|| panic!("device lost"), true).unwrap();

    let failed = core
        .queue_return_command(|| -> u32 { panic!("no result") }, true)
        .unwrap();
    assert!(failed.has_failed());
    assert_eq!(failed.wait(), Err(CoreError::CommandFailed));

    let a = Arc::clone(&after);
    core.queue_command(
        move || {
            a.store(1, Ordering::SeqCst);
        },
        true,
    )
    .unwrap();
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(core.stats().failed_commands, 2);
}

#[test]
fn test_shutdown_drains_then_rejects() {
    let core = start();
    let count = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        let c = Arc::clone(&count);
        core.queue_command(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
            false,
        )
        .unwrap();
    }

    core.shutdown().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 100);
    assert!(core.is_terminated());

    assert_eq!(core.queue_command(|| {}, false), Err(CoreError::ShuttingDown));
    assert!(core.queue_return_command(|| 1, false).is_err());

    let accessor = core.get_accessor();
    accessor.queue_command(|| {}, false);
    assert_eq!(accessor.submit_to_core_thread(false), Err(CoreError::ShuttingDown));

    // Idempotent
    assert!(core.shutdown().is_ok());
}

#[test]
fn test_shutdown_from_core_thread_rejected() {
    let core = start();
    let inner = Arc::clone(&core);
    let result = core
        .queue_return_command(move || inner.shutdown(), true)
        .unwrap();
    assert_eq!(result.wait().unwrap(), Err(CoreError::OnCoreThread));
    assert!(!core.is_shutting_down());
}

#[test]
fn test_thread_guards_and_identity() {
    let config = CoreThreadConfig {
        thread_name: "render".to_string(),
        ..CoreThreadConfig::default()
    };
    let core = CoreThread::new(config).unwrap();

    assert!(core.assert_off_core_thread().is_ok());
    assert_eq!(core.assert_on_core_thread(), Err(CoreError::NotOnCoreThread));
    assert_ne!(core.get_core_thread_id(), thread::current().id());

    let inner = Arc::clone(&core);
    let observed = core
        .queue_return_command(
            move || {
                let current = thread::current();
                (
                    current.id(),
                    current.name().map(str::to_string),
                    inner.assert_on_core_thread(),
                    inner.assert_off_core_thread(),
                )
            },
            true,
        )
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(observed.0, core.get_core_thread_id());
    assert_eq!(observed.1.as_deref(), Some("render"));
    assert_eq!(observed.2, Ok(()));
    assert_eq!(observed.3, Err(CoreError::OnCoreThread));
}

#[test]
fn test_idle_core_lends_its_slot() {
    let slots = Arc::new(WorkerSlots::new(4));
    let core = CoreThread::with_worker_pool(CoreThreadConfig::default(), slots.clone()).unwrap();

    let s = Arc::clone(&slots);
    let busy = core.queue_return_command(move || s.available(), true).unwrap();
    // While running a command the core holds its slot
    assert_eq!(busy.wait().unwrap(), 3);

    // Once parked it gives it back
    let deadline = Instant::now() + Duration::from_secs(2);
    while slots.available() != 4 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(slots.available(), 4);

    core.shutdown().unwrap();
    assert_eq!(slots.available(), 4);
}

#[test]
fn test_inline_mode() {
    let core = CoreThread::new(CoreThreadConfig::inline()).unwrap();
    assert_eq!(core.get_core_thread_id(), thread::current().id());

    let log = Arc::new(Mutex::new(Vec::new()));

    // Owner thread: runs in place
    let l = Arc::clone(&log);
    core.queue_command(move || l.lock().push("owner"), false).unwrap();
    assert_eq!(*log.lock(), vec!["owner"]);

    // Other thread: queued until the owner pumps
    let other = Arc::clone(&core);
    let l = Arc::clone(&log);
    thread::spawn(move || {
        other.queue_command(move || l.lock().push("queued"), false).unwrap();
        assert_eq!(other.run_pending(), Err(CoreError::NotOnCoreThread));
    })
    .join()
    .unwrap();

    assert_eq!(core.pending_count(), 1);
    let report = core.run_pending().unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(*log.lock(), vec!["owner", "queued"]);
    assert!(!core.is_terminated());

    core.shutdown().unwrap();
    assert!(core.is_terminated());
}

#[test]
fn test_run_pending_requires_inline() {
    let core = start();
    assert_eq!(core.run_pending(), Err(CoreError::NotInline));
}

#[test]
fn test_frame_allocs_with_commands() {
    let core = start();

    let handle = core.get_frame_alloc().alloc(&[0.5f32, 1.5, 2.5]).unwrap();

    let reader = Arc::clone(&core);
    let value = core
        .queue_return_command(move || reader.frame_allocs().read::<[f32; 3]>(handle), true)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(value, Ok([0.5, 1.5, 2.5]));

    core.update();
    assert!(core.frame_allocs().read::<[f32; 3]>(handle).is_ok());
    core.update();
    assert!(matches!(
        core.frame_allocs().read::<[f32; 3]>(handle),
        Err(CoreError::StaleFrameAllocation { .. })
    ));
    assert_eq!(core.stats().frames_advanced, 2);
}

#[test]
fn test_release_accessor() {
    let core = start();
    let ran = Arc::new(AtomicUsize::new(0));

    let accessor = core.get_accessor();
    let r = Arc::clone(&ran);
    accessor.queue_command(
        move || {
            r.fetch_add(1, Ordering::SeqCst);
        },
        false,
    );
    assert_eq!(core.accessor_count(), 1);

    core.release_accessor().unwrap();
    assert_eq!(core.accessor_count(), 0);

    core.shutdown().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_invalid_config_rejected() {
    let config = CoreThreadConfig {
        frame_arena_capacity: 0,
        ..CoreThreadConfig::default()
    };
    assert!(matches!(
        CoreThread::new(config),
        Err(CoreError::InvalidConfig(_))
    ));
}
