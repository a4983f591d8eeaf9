//! Pool of worker threads servicing channels
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Condvar};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender, Receiver, SendError};

use server::error::Error;


/// Unit of work handed to the pool
pub trait Job: Send + Sync {
    /// Run the job on a worker thread
    fn service(self: Arc<Self>) -> Result<(), Error>;
    /// The job will never run because the pool is shutting down
    fn cancel(&self);
}

enum Entry {
    Job(Arc<dyn Job>),
    Stop,
}

struct Counters {
    threads: usize,
    pending_stops: usize,
}

struct Inner {
    sender: Sender<Entry>,
    receiver: Receiver<Entry>,
    idle: AtomicUsize,
    next_id: AtomicUsize,
    counters: Mutex<Counters>,
    exited: Condvar,
}

/// Resizable pool of threads pulling jobs from a FIFO queue
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

fn run_job(job: &Arc<dyn Job>) {
    match catch_unwind(AssertUnwindSafe(|| job.clone().service())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Exception when servicing task: {}", e),
        Err(_) => error!("Task panicked while being serviced"),
    }
}

fn worker(inner: Arc<Inner>) {
    let stopped = loop {
        inner.idle.fetch_add(1, Ordering::SeqCst);
        let entry = inner.receiver.recv();
        inner.idle.fetch_sub(1, Ordering::SeqCst);
        match entry {
            Ok(Entry::Job(job)) => run_job(&job),
            Ok(Entry::Stop) => break true,
            Err(_) => break false,
        }
    };
    let mut counters = inner.counters.lock()
        .unwrap_or_else(|e| e.into_inner());
    if stopped {
        counters.pending_stops -= 1;
    }
    counters.threads -= 1;
    inner.exited.notify_all();
    debug!("Worker thread {:?} exited", thread::current().name());
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        let (tx, rx) = unbounded();
        Dispatcher {
            inner: Arc::new(Inner {
                sender: tx,
                receiver: rx,
                idle: AtomicUsize::new(0),
                next_id: AtomicUsize::new(0),
                counters: Mutex::new(Counters {
                    threads: 0,
                    pending_stops: 0,
                }),
                exited: Condvar::new(),
            }),
        }
    }

    /// Number of threads that are not asked to stop yet
    pub fn thread_count(&self) -> usize {
        let counters = self.inner.counters.lock()
            .unwrap_or_else(|e| e.into_inner());
        counters.threads - counters.pending_stops
    }

    /// Grow or shrink the pool
    ///
    /// Shrinking is done by queueing stop markers, so threads finish the
    /// jobs queued before them first.
    pub fn set_thread_count(&self, count: usize) -> io::Result<()> {
        let mut counters = self.inner.counters.lock()
            .unwrap_or_else(|e| e.into_inner());
        let running = counters.threads - counters.pending_stops;
        if count > running {
            for _ in running..count {
                let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
                let inner = self.inner.clone();
                thread::Builder::new()
                    .name(format!("tk-httpd-worker-{}", id))
                    .spawn(move || worker(inner))?;
                counters.threads += 1;
            }
        } else {
            for _ in count..running {
                counters.pending_stops += 1;
                // receiver lives in `inner`, sending can't fail
                self.inner.sender.send(Entry::Stop).ok();
            }
        }
        Ok(())
    }

    /// Queue a job, warns if there is no idle worker to pick it
    pub fn add_task(&self, job: Arc<dyn Job>) {
        if self.inner.idle.load(Ordering::SeqCst) == 0 {
            let depth = self.inner.receiver.len() + 1;
            warn!("Task queue depth is {}", depth);
        }
        if let Err(SendError(Entry::Job(job))) =
            self.inner.sender.send(Entry::Job(job))
        {
            job.cancel();
        }
    }

    /// Stop all the workers
    ///
    /// With `cancel_pending` jobs that are queued but not started yet are
    /// cancelled instead of serviced. Returns `false` if some threads are
    /// still running after `timeout`.
    pub fn shutdown(&self, cancel_pending: bool, timeout: Duration) -> bool {
        if cancel_pending {
            let mut stops = 0;
            for entry in self.inner.receiver.try_iter() {
                match entry {
                    Entry::Job(job) => {
                        info!("Canceled task that was not started yet");
                        job.cancel();
                    }
                    Entry::Stop => stops += 1,
                }
            }
            for _ in 0..stops {
                self.inner.sender.send(Entry::Stop).ok();
            }
        }
        // shrinking never spawns threads
        self.set_thread_count(0).ok();
        let deadline = Instant::now() + timeout;
        let mut counters = self.inner.counters.lock()
            .unwrap_or_else(|e| e.into_inner());
        while counters.threads > 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!("{} worker thread(s) still running after shutdown \
                    timeout", counters.threads);
                return false;
            }
            counters = match self.inner.exited.wait_timeout(counters,
                                                             deadline - now)
            {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    use server::error::Error;
    use super::{Dispatcher, Job};

    #[derive(Default)]
    struct Counter {
        serviced: AtomicUsize,
        cancelled: AtomicUsize,
        sleep_ms: u64,
        panic: bool,
    }

    impl Job for Counter {
        fn service(self: Arc<Self>) -> Result<(), Error> {
            if self.sleep_ms > 0 {
                sleep(Duration::from_millis(self.sleep_ms));
            }
            if self.panic {
                panic!("job failed");
            }
            self.serviced.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn cancel(&self) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for<F: Fn() -> bool>(f: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !f() {
            assert!(Instant::now() < deadline, "timed out");
            sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn services_jobs() {
        let disp = Dispatcher::new();
        disp.set_thread_count(2).unwrap();
        let job = Arc::new(Counter::default());
        for _ in 0..10 {
            disp.add_task(job.clone());
        }
        wait_for(|| job.serviced.load(Ordering::SeqCst) == 10);
        assert!(disp.shutdown(false, Duration::from_secs(5)));
        assert_eq!(disp.thread_count(), 0);
    }

    #[test]
    fn panic_keeps_worker() {
        let disp = Dispatcher::new();
        disp.set_thread_count(1).unwrap();
        disp.add_task(Arc::new(Counter { panic: true, ..Counter::default() }));
        let job = Arc::new(Counter::default());
        disp.add_task(job.clone());
        wait_for(|| job.serviced.load(Ordering::SeqCst) == 1);
        assert_eq!(disp.thread_count(), 1);
        assert!(disp.shutdown(false, Duration::from_secs(5)));
    }

    #[test]
    fn resize() {
        let disp = Dispatcher::new();
        disp.set_thread_count(4).unwrap();
        assert_eq!(disp.thread_count(), 4);
        disp.set_thread_count(1).unwrap();
        assert_eq!(disp.thread_count(), 1);
        let job = Arc::new(Counter::default());
        disp.add_task(job.clone());
        wait_for(|| job.serviced.load(Ordering::SeqCst) == 1);
        assert!(disp.shutdown(false, Duration::from_secs(5)));
    }

    #[test]
    fn cancel_pending() {
        let disp = Dispatcher::new();
        disp.set_thread_count(1).unwrap();
        let job = Arc::new(Counter { sleep_ms: 200, ..Counter::default() });
        for _ in 0..4 {
            disp.add_task(job.clone());
        }
        sleep(Duration::from_millis(50));
        assert!(disp.shutdown(true, Duration::from_secs(5)));
        let serviced = job.serviced.load(Ordering::SeqCst);
        let cancelled = job.cancelled.load(Ordering::SeqCst);
        assert_eq!(serviced + cancelled, 4);
        assert!(cancelled >= 3);
    }
}
