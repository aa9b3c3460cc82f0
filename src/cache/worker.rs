//! Single-writer background worker.
//!
//! Jobs are pushed onto an unbounded FIFO and executed one at a time by a
//! dedicated thread, so asynchronous store operations complete in
//! submission order and never overlap.
//!
//! Shutdown closes the queue and joins the thread. Jobs already queued are
//! drained first; jobs submitted afterwards run synchronously on the caller's
//! thread. A panicking job is logged and its handle resolves with an error;
//! the worker keeps running.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crate::error::{CacheError, CacheResult};

/// A unit of work run against the shared state `S`.
pub type Job<S> = Box<dyn FnOnce(&S) + Send + 'static>;

pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the worker thread and the sending half of its queue.
pub struct Worker<S: Send + Sync + 'static> {
    state: Arc<S>,
    sender: Mutex<Option<Sender<Job<S>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: Option<ThreadId>,
}

impl<S: Send + Sync + 'static> Worker<S> {
    /// Spawn the worker thread.
    pub fn spawn(name: &str, state: Arc<S>) -> CacheResult<Self> {
        let (tx, rx) = mpsc::channel::<Job<S>>();
        let thread_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_queue(&*thread_state, rx))?;
        let thread_id = Some(handle.thread().id());

        Ok(Self {
            state,
            sender: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Queue `job`, or run it inline if the worker has been shut down.
    pub fn submit(&self, job: Job<S>) {
        let rejected = {
            let sender = lock(&self.sender);
            match sender.as_ref() {
                Some(tx) => tx.send(job).err().map(|e| e.0),
                None => Some(job),
            }
        };
        if let Some(job) = rejected {
            log::debug!("Store worker stopped, running job on the calling thread");
            run_job(&*self.state, job);
        }
    }

    /// Whether the worker still accepts queued jobs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.sender).is_some()
    }

    /// Stop accepting jobs, drain the queue and join the thread.
    ///
    /// Calling this more than once is harmless.
    pub fn shutdown(&self) {
        drop(lock(&self.sender).take());
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if Some(thread::current().id()) == self.thread_id {
                return;
            }
            if handle.join().is_err() {
                log::error!("Store worker thread terminated abnormally");
            }
        }
    }
}

impl<S: Send + Sync + 'static> Drop for Worker<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_queue<S>(state: &S, rx: Receiver<Job<S>>) {
    let mut executed: u64 = 0;
    while let Ok(job) = rx.recv() {
        run_job(state, job);
        executed += 1;
    }
    log::debug!("Store worker drained after {} jobs", executed);
}

fn run_job<S>(state: &S, job: Job<S>) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| job(state))) {
        let msg = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        log::error!("Store worker job panicked: {}", msg);
    }
}

/// Handle to the result of a queued operation.
///
/// Resolves exactly once. Dropping the handle does not stop the operation.
#[must_use = "the operation runs regardless; wait() to observe its result"]
pub struct PendingOp<T> {
    rx: Receiver<CacheResult<T>>,
}

/// Sending half paired with a [`PendingOp`].
pub struct Resolver<T> {
    tx: SyncSender<CacheResult<T>>,
}

impl<T> Resolver<T> {
    /// Deliver the result. A dropped handle is ignored.
    pub fn resolve(self, result: CacheResult<T>) {
        let _ = self.tx.send(result);
    }
}

impl<T> PendingOp<T> {
    /// Create a linked resolver and handle.
    pub fn channel() -> (Resolver<T>, Self) {
        let (tx, rx) = mpsc::sync_channel(1);
        (Resolver { tx }, Self { rx })
    }

    /// A handle that is already resolved.
    pub fn ready(result: CacheResult<T>) -> Self {
        let (resolver, op) = Self::channel();
        resolver.resolve(result);
        op
    }

    /// Block until the operation finishes.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or [`CacheError::Database`] if the job
    /// was aborted before producing a result.
    pub fn wait(self) -> CacheResult<T> {
        self.rx.recv().unwrap_or_else(|_| Err(aborted()))
    }

    /// Take the result if it is available, without blocking.
    ///
    /// Once a result has been taken, later calls report the operation as
    /// aborted.
    pub fn poll(&self) -> Option<CacheResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(aborted())),
        }
    }

    /// Queued operations cannot be cancelled; this always fails.
    pub fn cancel(&self) -> CacheResult<()> {
        Err(CacheError::Unsupported("cancelling a queued cache operation"))
    }
}

fn aborted() -> CacheError {
    CacheError::Database("asynchronous operation aborted before completing".to_string())
}
