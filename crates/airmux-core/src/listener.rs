// ── Listener registry and callback dispatch ──
//
// One generic registration abstraction covers every listener kind: a
// (listener, executor) pair stored in an arena, deregistered by handle.
// Dispatch compares the registration's executor identity against the
// executor the current thread belongs to: same (or no executor) means the
// callback runs inline, otherwise it is posted, optionally to the front of
// the target queue when ordering must be preserved. Listener callbacks are
// never invoked while the arbiter lock is held.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use airmux_hal::InterfaceKind;

/// Events the arbiter delivers to registered listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterEvent {
    /// Manager status changed; poll `is_started()` / `is_ready()`.
    StatusChanged,
    /// The vendor service restarted underneath the stack.
    SubsystemRestart,
    /// A live interface transitioned to destroyed.
    InterfaceDestroyed { name: String, kind: InterfaceKind },
}

/// A listener for [`ArbiterEvent`]s. Registration identity is the listener
/// allocation itself: registering the same `Arc` twice is a no-op.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ArbiterEvent);
}

impl<F> EventListener for F
where
    F: Fn(&ArbiterEvent) + Send + Sync,
{
    fn on_event(&self, event: &ArbiterEvent) {
        self(event);
    }
}

/// Opaque identity of a callback executor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutorId(u64);

impl ExecutorId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A queued unit of callback work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Execution context a listener wants its callbacks delivered on.
pub trait CallbackExecutor: Send + Sync {
    /// Stable identity, compared against the current thread's executor to
    /// decide inline versus enqueue.
    fn id(&self) -> ExecutorId;

    /// Append a job to the queue.
    fn post(&self, job: Job);

    /// Push a job ahead of everything already queued. Used when a
    /// notification must be observed before work the same caller already
    /// enqueued.
    fn post_front(&self, job: Job);
}

thread_local! {
    static CURRENT_EXECUTOR: Cell<Option<ExecutorId>> = const { Cell::new(None) };
}

/// The executor identity of the calling thread, if it belongs to one.
pub fn current_executor() -> Option<ExecutorId> {
    CURRENT_EXECUTOR.with(Cell::get)
}

// ── Registrations ────────────────────────────────────────────────────

/// One (listener, executor) pair. `executor == None` means "run inline in
/// whatever context triggers the event".
#[derive(Clone)]
pub(crate) struct Registration {
    pub listener: Arc<dyn EventListener>,
    pub executor: Option<Arc<dyn CallbackExecutor>>,
}

impl Registration {
    /// Whether delivery from the current thread would run inline.
    pub fn runs_inline_here(&self) -> bool {
        match &self.executor {
            None => true,
            Some(executor) => current_executor() == Some(executor.id()),
        }
    }

    /// Deliver `event`: inline when the current context matches, otherwise
    /// posted (to the front of the queue when `front` is set).
    pub fn deliver(&self, event: &ArbiterEvent, front: bool) {
        match &self.executor {
            Some(executor) if current_executor() != Some(executor.id()) => {
                let listener = Arc::clone(&self.listener);
                let event = event.clone();
                let job: Job = Box::new(move || listener.on_event(&event));
                if front {
                    executor.post_front(job);
                } else {
                    executor.post(job);
                }
            }
            _ => self.listener.on_event(event),
        }
    }
}

/// Handle returned by a successful registration; deregister with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// Arena of registrations for one listener kind.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    entries: IndexMap<u64, Registration>,
    next_handle: u64,
}

impl ListenerRegistry {
    /// Register a listener. Duplicate registration (same listener
    /// allocation) is a warn-and-ignore, not an error.
    pub fn register(
        &mut self,
        listener: Arc<dyn EventListener>,
        executor: Option<Arc<dyn CallbackExecutor>>,
    ) -> Option<ListenerHandle> {
        if self
            .entries
            .values()
            .any(|reg| Arc::ptr_eq(&reg.listener, &listener))
        {
            warn!("duplicate listener registration ignored");
            return None;
        }
        self.next_handle += 1;
        let handle = self.next_handle;
        self.entries.insert(handle, Registration { listener, executor });
        Some(ListenerHandle(handle))
    }

    /// Remove a registration. Returns whether it existed.
    pub fn deregister(&mut self, handle: ListenerHandle) -> bool {
        self.entries.shift_remove(&handle.0).is_some()
    }

    /// Clone out the current registrations for dispatch outside the lock.
    pub fn registrations(&self) -> Vec<Registration> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ── Worker executor ──────────────────────────────────────────────────

struct WorkerShared {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// A dedicated callback thread with a double-ended job queue.
///
/// Jobs posted with [`post_front`](CallbackExecutor::post_front) jump the
/// queue. Dropping the executor drains nothing: pending jobs are discarded
/// after the in-flight one finishes.
pub struct WorkerExecutor {
    id: ExecutorId,
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerExecutor {
    pub fn spawn(name: &str) -> Arc<Self> {
        let id = ExecutorId::next();
        let shared = Arc::new(WorkerShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                CURRENT_EXECUTOR.with(|current| current.set(Some(id)));
                loop {
                    let job = {
                        let mut queue = worker_shared.queue.lock();
                        loop {
                            if let Some(job) = queue.pop_front() {
                                break job;
                            }
                            if worker_shared.shutdown.load(Ordering::Acquire) {
                                return;
                            }
                            worker_shared.available.wait(&mut queue);
                        }
                    };
                    job();
                }
            })
            .unwrap_or_else(|e| panic!("failed to spawn callback worker '{name}': {e}"));
        Arc::new(Self {
            id,
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Block until every job posted before this call has run. Must not be
    /// called from the worker thread itself.
    pub fn flush(&self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.post(Box::new(move || {
            let _ = tx.send(());
        }));
        let _ = rx.recv();
    }
}

impl CallbackExecutor for WorkerExecutor {
    fn id(&self) -> ExecutorId {
        self.id
    }

    fn post(&self, job: Job) {
        self.shared.queue.lock().push_back(job);
        self.shared.available.notify_one();
    }

    fn post_front(&self, job: Job) {
        self.shared.queue.lock().push_front(job);
        self.shared.available.notify_one();
    }
}

impl Drop for WorkerExecutor {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.available.notify_one();
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}
