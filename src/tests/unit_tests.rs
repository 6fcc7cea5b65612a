use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::thread;
use std::time::Duration;

use crate::diagnostic::{CounterFlags, Diagnostic, DiagnosticSink, Operation};
use crate::rwlock::{self, Mode};
use crate::semaphore::{self, RawSemaphore};
use crate::{AtomicCounter, Lock, Mutex, RwLock, Semaphore, TracedCounter};

/// Fails `post` while `fail_post` is set.
#[derive(Debug, Default)]
struct FaultySemaphore {
    semaphore: Semaphore,
    fail_post: Arc<AtomicBool>,
}

impl RawSemaphore for FaultySemaphore {
    fn init(&self, permits: usize) -> Result<(), semaphore::Error> {
        self.semaphore.reset(permits)
    }

    fn wait(&self) -> Result<(), semaphore::Error> {
        self.semaphore.acquire_sync()
    }

    fn post(&self) -> Result<(), semaphore::Error> {
        if self.fail_post.load(Relaxed) {
            return Err(semaphore::Error::Destroyed);
        }
        self.semaphore.release()
    }

    fn destroy(&self) -> Result<(), semaphore::Error> {
        self.semaphore.destroy()
    }
}

#[derive(Debug, Default)]
struct RecordingSink(std::sync::Mutex<Vec<Diagnostic>>);

impl RecordingSink {
    fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.0.lock().unwrap().push(diagnostic);
    }
}

#[test]
fn semaphore_sync() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 256 };
    let capacity = 4;

    let semaphore: Arc<Semaphore> = Arc::new(Semaphore::new(0, capacity));
    let check = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let semaphore = semaphore.clone();
        let check = check.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..num_iters {
                assert!(semaphore.acquire_sync().is_ok());
                assert!(check.fetch_add(1, Relaxed) < capacity);
                thread::sleep(Duration::from_micros(1));
                check.fetch_sub(1, Relaxed);
                assert!(semaphore.release().is_ok());
            }
        }));
    }

    thread::sleep(Duration::from_millis(1));
    for _ in 0..capacity {
        assert!(semaphore.release().is_ok());
    }
    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(check.load(Relaxed), 0);
    assert_eq!(semaphore.available_permits(Relaxed), capacity);
    assert_eq!(semaphore.release(), Err(semaphore::Error::Overflow));
}

#[test]
fn semaphore_destroy_wakes_waiters() {
    let num_threads = 4;

    let semaphore: Arc<Semaphore> = Arc::new(Semaphore::new(0, 1));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let semaphore = semaphore.clone();
        threads.push(thread::spawn(move || semaphore.acquire_sync()));
    }

    thread::sleep(Duration::from_millis(50));
    assert!(semaphore.destroy().is_ok());

    for thread in threads {
        assert_eq!(thread.join().unwrap(), Err(semaphore::Error::Destroyed));
    }
    assert_eq!(semaphore.release(), Err(semaphore::Error::Destroyed));

    assert!(semaphore.reset(1).is_ok());
    assert!(semaphore.acquire_sync().is_ok());
}

#[test]
fn lock_sync() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 1024 };

    let mutex: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    let lock: Arc<Lock> = Arc::new(Lock::new());
    let check = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let mutex = mutex.clone();
        let lock = lock.clone();
        let check = check.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..num_iters {
                *mutex.lock() += 1;

                lock.lock_sync();
                assert_eq!(check.fetch_add(1, Relaxed), 0);
                check.fetch_sub(1, Relaxed);
                assert!(lock.release_lock());
            }
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(*mutex.lock(), num_threads * num_iters);
    assert!(!lock.is_locked(Relaxed));
}

#[test]
fn rwlock_sync() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 256 };

    let lock = Arc::new(RwLock::<Semaphore>::new());
    let check = Arc::new(AtomicUsize::new(0));

    assert!(lock.acquire_write().is_ok());
    check.fetch_add(usize::MAX, Relaxed);

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let lock = lock.clone();
        let check = check.clone();
        threads.push(thread::spawn(move || {
            for j in 0..num_iters {
                if j % 11 == 0 {
                    assert!(lock.acquire_write().is_ok());
                    assert_eq!(check.fetch_add(usize::MAX, Relaxed), 0);
                    thread::sleep(Duration::from_micros(1));
                    check.fetch_sub(usize::MAX, Relaxed);
                    assert!(lock.release_write().is_ok());
                } else {
                    assert!(lock.acquire_read().is_ok());
                    assert!(check.fetch_add(1, Relaxed) < num_threads);
                    thread::sleep(Duration::from_micros(1));
                    check.fetch_sub(1, Relaxed);
                    assert!(lock.release_read().is_ok());
                }
            }
        }));
    }

    thread::sleep(Duration::from_micros(1));
    check.fetch_sub(usize::MAX, Relaxed);
    assert!(lock.release_write().is_ok());

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(check.load(Relaxed), 0);
    assert_eq!(lock.readers(Relaxed), 0);

    assert!(lock.acquire_write().is_ok());
    assert!(lock.release_write().is_ok());
}

#[test]
fn rwlock_concurrent_readers() {
    let num_threads = 3;

    let lock = Arc::new(RwLock::<Semaphore>::new());
    let barrier = Arc::new(std::sync::Barrier::new(num_threads));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let lock = lock.clone();
        let barrier = barrier.clone();
        threads.push(thread::spawn(move || {
            assert!(lock.acquire_read().is_ok());
            barrier.wait();
            assert_eq!(lock.readers(Relaxed), num_threads);
            barrier.wait();
            assert!(lock.release_read().is_ok());
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(lock.readers(Relaxed), 0);
}

#[test]
fn rwlock_write_preference() {
    let lock = Arc::new(RwLock::<Semaphore>::new());
    let order = Arc::new(AtomicUsize::new(0));

    assert!(lock.acquire_read().is_ok());

    let writer = {
        let lock = lock.clone();
        let order = order.clone();
        thread::spawn(move || {
            assert!(lock.acquire_write().is_ok());
            let stamp = order.fetch_add(1, Relaxed);
            thread::sleep(Duration::from_millis(10));
            assert!(lock.release_write().is_ok());
            stamp
        })
    };

    // The writer now holds the gate and waits for the reader to leave.
    thread::sleep(Duration::from_millis(50));

    let late_reader = {
        let lock = lock.clone();
        let order = order.clone();
        thread::spawn(move || {
            assert!(lock.acquire_read().is_ok());
            let stamp = order.fetch_add(1, Relaxed);
            assert!(lock.release_read().is_ok());
            stamp
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(lock.readers(Relaxed), 1);
    assert_eq!(order.load(Relaxed), 0);

    assert!(lock.release_read().is_ok());
    assert_eq!(writer.join().unwrap(), 0);
    assert_eq!(late_reader.join().unwrap(), 1);
}

#[test]
fn rwlock_uninit() {
    let lock: RwLock = RwLock::uninit();

    assert!(!lock.is_initialized());
    assert_eq!(lock.acquire_read(), Err(rwlock::Error::NotInitialized));
    assert_eq!(lock.acquire_write(), Err(rwlock::Error::NotInitialized));
    assert_eq!(lock.release_read(), Err(rwlock::Error::NotInitialized));
    assert_eq!(lock.release_write(), Err(rwlock::Error::NotInitialized));
    assert_eq!(lock.destroy(), Err(rwlock::Error::NotInitialized));
    assert!(lock.read().is_err());
    assert!(lock.write().is_err());

    assert!(lock.init().is_ok());
    assert_eq!(lock.init(), Err(rwlock::Error::InvalidArgument));
    assert!(lock.acquire_read().is_ok());
    assert_eq!(lock.mode(), Mode::Read);
    assert!(lock.release_read().is_ok());
}

#[test]
fn rwlock_destroy_waits_for_holders() {
    let lock = Arc::new(RwLock::<Semaphore>::new());
    assert!(lock.acquire_read().is_ok());

    let destroyer = {
        let lock = lock.clone();
        thread::spawn(move || lock.destroy())
    };

    thread::sleep(Duration::from_millis(50));
    assert!(lock.is_initialized());

    assert!(lock.release_read().is_ok());
    assert_eq!(destroyer.join().unwrap(), Ok(()));
    assert!(!lock.is_initialized());

    assert_eq!(lock.acquire_read(), Err(rwlock::Error::NotInitialized));
    assert_eq!(lock.acquire_write(), Err(rwlock::Error::NotInitialized));
    assert_eq!(lock.destroy(), Err(rwlock::Error::NotInitialized));

    assert!(lock.init().is_ok());
    assert!(lock.acquire_write().is_ok());
    assert!(lock.release_write().is_ok());
}

#[test]
fn rwlock_release_unheld() {
    let lock: RwLock = RwLock::new();

    assert_eq!(lock.release_read(), Err(rwlock::Error::InvalidArgument));
    assert_eq!(
        lock.release_write(),
        Err(rwlock::Error::PrimitiveFailure(semaphore::Error::Overflow))
    );

    // Neither failure changes the state of the lock.
    assert!(lock.acquire_write().is_ok());
    assert!(lock.release_write().is_ok());
    assert!(lock.acquire_read().is_ok());
    assert!(lock.release_read().is_ok());
}

#[test]
fn rwlock_release_read_rollback() {
    let fail_post = Arc::new(AtomicBool::new(false));
    let lock = RwLock::with_semaphores(
        FaultySemaphore::default(),
        FaultySemaphore::default(),
        FaultySemaphore {
            semaphore: Semaphore::binary(),
            fail_post: fail_post.clone(),
        },
    );

    assert!(lock.acquire_read().is_ok());
    assert!(lock.acquire_read().is_ok());
    assert_eq!(lock.readers(Relaxed), 2);

    fail_post.store(true, Relaxed);

    // The writer barrier is not released by the first reader to leave.
    assert!(lock.release_read().is_ok());
    assert_eq!(lock.readers(Relaxed), 1);

    assert_eq!(
        lock.release_read(),
        Err(rwlock::Error::PrimitiveFailure(semaphore::Error::Destroyed))
    );
    assert_eq!(lock.readers(Relaxed), 1);

    fail_post.store(false, Relaxed);
    assert!(lock.release_read().is_ok());
    assert_eq!(lock.readers(Relaxed), 0);

    assert!(lock.acquire_write().is_ok());
    assert!(lock.release_write().is_ok());
}

#[test]
fn rwlock_release_write_failure() {
    let fail_post = Arc::new(AtomicBool::new(false));
    let lock = Arc::new(RwLock::with_semaphores(
        FaultySemaphore::default(),
        FaultySemaphore::default(),
        FaultySemaphore {
            semaphore: Semaphore::binary(),
            fail_post: fail_post.clone(),
        },
    ));

    assert!(lock.acquire_write().is_ok());

    fail_post.store(true, Relaxed);
    assert_eq!(
        lock.release_write(),
        Err(rwlock::Error::PrimitiveFailure(semaphore::Error::Destroyed))
    );

    // The gate stays closed, so readers are still barred.
    let reader = {
        let lock = lock.clone();
        thread::spawn(move || {
            assert!(lock.acquire_read().is_ok());
            assert!(lock.release_read().is_ok());
        })
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(lock.readers(Relaxed), 0);
    assert!(!reader.is_finished());

    fail_post.store(false, Relaxed);
    assert!(lock.release_write().is_ok());
    reader.join().unwrap();
}

#[cfg_attr(miri, ignore = "Tokio is not compatible with Miri")]
#[tokio::test(flavor = "multi_thread", worker_threads = 16)]
async fn rwlock_guards() {
    let num_tasks = 64;
    let num_iters = 64;

    let lock = Arc::new(RwLock::<Semaphore>::new());
    let data = Arc::new(AtomicCounter::<Lock>::new(0));
    let check = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..num_tasks {
        let lock = lock.clone();
        let data = data.clone();
        let check = check.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            for j in 0..num_iters {
                if (i + j) % 8 == 0 {
                    let _guard = lock.write().unwrap();
                    assert_eq!(check.fetch_add(usize::MAX, Relaxed), 0);
                    data.add(1);
                    check.fetch_sub(usize::MAX, Relaxed);
                } else {
                    let _guard = lock.read().unwrap();
                    assert!(check.fetch_add(1, Relaxed) < num_tasks);
                    check.fetch_sub(1, Relaxed);
                }
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(check.load(Relaxed), 0);
    assert_eq!(lock.readers(Relaxed), 0);
    assert_eq!(data.read(), num_tasks * num_iters / 8);
}

#[test]
fn counter_sync() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 4096 };

    let counter = Arc::new(AtomicCounter::<Lock>::new(0));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let counter = counter.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..num_iters {
                counter.add(1);
            }
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(counter.read(), num_threads * num_iters);
}

#[cfg_attr(miri, ignore = "Tokio is not compatible with Miri")]
#[tokio::test(flavor = "multi_thread", worker_threads = 16)]
async fn counter_async() {
    let num_tasks = 64;
    let num_iters = 256;

    let counter = Arc::new(AtomicCounter::<Lock>::new(0));

    let mut tasks = Vec::new();
    for _ in 0..num_tasks {
        let counter = counter.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..num_iters {
                counter.add(1);
                tokio::task::yield_now().await;
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(counter.read(), num_tasks * num_iters);
}

#[test]
fn counter_bitwise_sync() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 1024 };

    let counter = Arc::new(AtomicCounter::<Lock>::new(0));

    let mut threads = Vec::new();
    for i in 0..num_threads {
        let counter = counter.clone();
        threads.push(thread::spawn(move || {
            let bit = 1_usize << i;
            for _ in 0..num_iters {
                assert_eq!(counter.or(bit) & bit, 0);
                assert_eq!(counter.and(!bit) & bit, bit);
            }
            counter.or(bit);
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(counter.read(), (1_usize << num_threads) - 1);
}

#[test]
fn counter_previous_values() {
    let counter: AtomicCounter = AtomicCounter::new(0);

    assert_eq!(counter.write(5), 0);
    assert_eq!(counter.write(7), 5);
    assert_eq!(counter.and(0b0101), 7);
    assert_eq!(counter.read(), 0b0101);
    assert_eq!(counter.or(0b1010), 0b0101);
    assert_eq!(counter.read(), 0b1111);
}

#[test]
fn counter_read_after_write() {
    let counter: AtomicCounter = AtomicCounter::default();
    let mut expected = 0_usize;

    for i in 0..256_usize {
        match i % 4 {
            0 => {
                counter.write(i * 31);
                expected = i * 31;
            }
            1 => {
                expected = expected.wrapping_add(i);
                assert_eq!(counter.add(i), expected);
            }
            2 => {
                counter.and(!i);
                expected &= !i;
            }
            _ => {
                counter.or(i << 3);
                expected |= i << 3;
            }
        }
        assert_eq!(counter.read(), expected);
    }
    assert_eq!(counter.into_inner(), expected);
}

#[test]
fn counter_wraps() {
    let counter: AtomicCounter = AtomicCounter::new(usize::MAX);
    assert_eq!(counter.add(2), 1);
}

#[test]
fn traced_counter_uninitialized() {
    let counter: TracedCounter<Lock, RecordingSink> =
        TracedCounter::uninit(RecordingSink::default());

    assert_eq!(counter.add(3), 3);
    assert_eq!(counter.read(), 3);

    let diagnostics = counter.sink().take();
    assert_eq!(diagnostics.len(), 2);
    assert!(matches!(
        diagnostics[0],
        Diagnostic::Uninitialized {
            operation: Operation::Add,
            ..
        }
    ));
    assert!(matches!(
        diagnostics[1],
        Diagnostic::Uninitialized {
            operation: Operation::Read,
            ..
        }
    ));
    assert!(diagnostics[0].location().file().ends_with("unit_tests.rs"));
}

#[test]
fn traced_counter_double_init() {
    let mut counter: TracedCounter<Lock, RecordingSink> =
        TracedCounter::uninit(RecordingSink::default());

    counter.init(1, Some("sessions"));
    assert!(counter.sink().take().is_empty());

    counter.init(2, Some("sessions"));
    let diagnostics = counter.sink().take();
    assert_eq!(diagnostics.len(), 1);
    assert!(matches!(
        diagnostics[0],
        Diagnostic::DoubleInit {
            identity: "sessions",
            ..
        }
    ));
    assert_eq!(counter.read(), 2);

    counter.init(3, Some("requests"));
    counter.init(4, None);
    counter.init(5, None);
    assert!(counter.sink().take().is_empty());
    assert_eq!(counter.into_inner(), 5);
}

#[test]
fn traced_counter_rollover() {
    let high_bit = TracedCounter::<Lock, RecordingSink>::HIGH_BIT;
    let counter: TracedCounter<Lock, RecordingSink> =
        TracedCounter::new(high_bit - 1, None, RecordingSink::default());

    assert_eq!(counter.add(1), high_bit);
    assert_eq!(counter.add(usize::MAX), high_bit - 1);
    assert_eq!(counter.write(high_bit), high_bit - 1);
    assert_eq!(counter.write(high_bit + 1), high_bit);
    assert_eq!(counter.read(), high_bit + 1);

    let diagnostics = counter.sink().take();
    assert_eq!(
        diagnostics
            .iter()
            .map(|diagnostic| match *diagnostic {
                Diagnostic::SuspectedRollover {
                    operation,
                    before,
                    after,
                    ..
                } => (operation, before, after),
                _ => unreachable!(),
            })
            .collect::<Vec<_>>(),
        vec![
            (Operation::Add, high_bit - 1, high_bit),
            (Operation::Add, high_bit, high_bit - 1),
            (Operation::Write, high_bit - 1, high_bit),
        ]
    );

    counter.set_flags(CounterFlags::WARN_ON_READ);
    assert_eq!(counter.read(), high_bit + 1);
    let diagnostics = counter.sink().take();
    assert_eq!(diagnostics.len(), 1);
    assert!(matches!(
        diagnostics[0],
        Diagnostic::SuspectedRollover {
            operation: Operation::Read,
            ..
        }
    ));

    counter.set_flags(CounterFlags::WARN_ON_READ | CounterFlags::IGNORE_HIGH_BIT);
    assert_eq!(counter.read(), high_bit + 1);
    assert_eq!(counter.write(0), high_bit + 1);
    assert_eq!(counter.add(high_bit), high_bit);
    assert!(counter.sink().take().is_empty());
}

#[test]
fn traced_counter_trace() {
    let counter: TracedCounter<Lock, RecordingSink> =
        TracedCounter::new(10, Some("hits"), RecordingSink::default());

    assert_eq!(counter.add(5), 15);
    assert_eq!(counter.and(0x0F), 15);
    assert_eq!(counter.or(0x10), 15);
    assert_eq!(counter.read(), 31);

    let diagnostics = counter.sink().take();
    assert_eq!(diagnostics.len(), 1);
    assert!(matches!(
        diagnostics[0],
        Diagnostic::Trace {
            identity: "hits",
            before: 10,
            delta: 5,
            after: 15,
            ..
        }
    ));
    assert_eq!(
        diagnostics[0].to_string(),
        format!("{}: `hits` 10+5=15", diagnostics[0].location())
    );
}

#[test]
fn traced_counter_shared_sink() {
    let num_threads = if cfg!(miri) { 4 } else { 8 };
    let num_iters = if cfg!(miri) { 16 } else { 256 };

    let sink = Arc::new(RecordingSink::default());
    let counter: Arc<TracedCounter<Lock, Arc<RecordingSink>>> =
        Arc::new(TracedCounter::new(0, Some("shared"), sink.clone()));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let counter = counter.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..num_iters {
                counter.add(1);
            }
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(counter.read(), num_threads * num_iters);
    assert_eq!(sink.take().len(), num_threads * num_iters);
}
