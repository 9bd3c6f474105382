//! Site pool
//!
//! A fixed set of threads that run blocking site calls, so a slow site never
//! holds up a dispatch worker. Calls are handed over through an MPMC channel;
//! when every thread is busy a call simply waits in the channel while its
//! token stays parked. Nothing else in the engine waits on the pool.
//!
//! Shutting the pool down drops the sending side. Threads finish the calls
//! already queued (calls for cancelled tokens return at once) and exit when
//! the channel reports disconnection.

use may::sync::mpmc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub threads: usize,
    pub busy: usize,
    pub queued: usize,
    pub completed: u64,
}

pub(crate) struct SitePool {
    sender: Mutex<Option<mpmc::Sender<Job>>>,
    threads: AtomicUsize,
    busy: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
}

impl SitePool {
    pub fn new() -> Self {
        SitePool {
            sender: Mutex::new(None),
            threads: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Spawn `size` site threads
    ///
    /// `pool` must be the `SitePool` inside an `Arc` the threads can keep.
    pub fn start(pool: &std::sync::Arc<Self>, size: usize) -> std::io::Result<()> {
        let (sender, receiver) = mpmc::channel::<Job>();
        for i in 0..size.max(1) {
            let receiver = receiver.clone();
            let worker = pool.clone();
            pool.threads.fetch_add(1, Ordering::AcqRel);
            let spawned = std::thread::Builder::new()
                .name(format!("weft-site-{}", i))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        worker.queued.fetch_sub(1, Ordering::AcqRel);
                        worker.busy.fetch_add(1, Ordering::AcqRel);
                        job();
                        worker.busy.fetch_sub(1, Ordering::AcqRel);
                        worker.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    worker.threads.fetch_sub(1, Ordering::AcqRel);
                    debug!("site thread exiting");
                });
            if let Err(e) = spawned {
                pool.threads.fetch_sub(1, Ordering::AcqRel);
                return Err(e);
            }
        }
        *pool.sender.lock().expect("site pool: lock poisoned") = Some(sender);
        Ok(())
    }

    /// Queue a call; the job is handed back if the pool is shut down
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        let sender = self.sender.lock().expect("site pool: lock poisoned");
        let Some(sender) = sender.as_ref() else {
            return Err(job);
        };
        self.queued.fetch_add(1, Ordering::AcqRel);
        sender.send(job).map_err(|err| {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            err.0
        })
    }

    pub fn shutdown(&self) {
        self.sender.lock().expect("site pool: lock poisoned").take();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            threads: self.threads.load(Ordering::Acquire),
            busy: self.busy.load(Ordering::Acquire),
            queued: self.queued.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}
