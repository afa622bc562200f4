//! Coalesced change notifications.
//!
//! A mutation marks its list kind as pending. Only the first mark in a turn
//! enqueues a flush on the [`DeferredScheduler`]; the flush clears the flag and
//! calls every subscriber once. Marks made before the flush runs are folded
//! into it, marks made after it produce a new one.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::runtime::RuntimeFlavor;
use tracing::{trace, warn};

use crate::ListKind;

/// Work queued to run after the current turn.
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// Callback invoked with the list that changed.
pub type ChangeCallback = Arc<dyn Fn(ListKind) + Send + Sync>;

/// Runs tasks after the currently executing synchronous section.
pub trait DeferredScheduler: Send + Sync {
    /// Queues `task` to run later.
    fn defer(&self, task: DeferredTask);
}

/// Defers onto the task set of the mutating thread.
///
/// Flushes must share a thread with the code that marks changes, so a flush
/// cannot start until that code yields. On a current-thread runtime tasks are
/// spawned on the runtime. On a multi-thread runtime they are spawned with
/// [`tokio::task::spawn_local`], so registry mutations must run inside a
/// [`tokio::task::LocalSet`]. Tasks deferred with no runtime entered are held
/// and spawned by the next `defer` made inside one.
///
/// # Panics
///
/// `defer` panics on a multi-thread runtime outside a `LocalSet`, or if the
/// held task lock is poisoned.
#[derive(Default)]
pub struct TokioScheduler {
    held: Mutex<VecDeque<DeferredTask>>,
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("held", &self.held())
            .finish()
    }
}

impl TokioScheduler {
    /// Creates a scheduler with nothing held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tasks deferred while no runtime was entered.
    ///
    /// # Panics
    ///
    /// Panics if the held task lock is poisoned.
    #[must_use]
    pub fn held(&self) -> usize {
        self.held.lock().expect("held tasks poisoned").len()
    }
}

impl DeferredScheduler for TokioScheduler {
    fn defer(&self, task: DeferredTask) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            trace!("no tokio runtime entered; holding deferred task");
            self.held.lock().expect("held tasks poisoned").push_back(task);
            return;
        };

        let mut tasks: Vec<DeferredTask> =
            self.held.lock().expect("held tasks poisoned").drain(..).collect();
        tasks.push(task);
        let run = async move {
            for task in tasks {
                task();
            }
        };
        match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => {
                handle.spawn(run);
            }
            _ => {
                tokio::task::spawn_local(run);
            }
        }
    }
}

/// Queues tasks until [`run_pending`](Self::run_pending) is called.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<DeferredTask>>,
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("queued", &self.queued())
            .finish()
    }
}

impl ManualScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of queued tasks.
    ///
    /// # Panics
    ///
    /// Panics if the queue lock is poisoned.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.lock().expect("scheduler queue poisoned").len()
    }

    /// Runs queued tasks, including tasks they queue, until none remain.
    /// Returns how many ran.
    ///
    /// # Panics
    ///
    /// Panics if the queue lock is poisoned.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.lock().expect("scheduler queue poisoned").pop_front();
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }
}

impl DeferredScheduler for ManualScheduler {
    fn defer(&self, task: DeferredTask) {
        self.queue
            .lock()
            .expect("scheduler queue poisoned")
            .push_back(task);
    }
}

/// Identifier returned by [`ChangeNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct NotifierInner {
    scheduler: Arc<dyn DeferredScheduler>,
    pending: [AtomicBool; 3],
    subscribers: RwLock<Vec<(SubscriptionId, ChangeCallback)>>,
    next_id: AtomicU64,
}

impl NotifierInner {
    fn flush(&self, kind: ListKind) {
        if !self.pending[kind.index()].swap(false, Ordering::AcqRel) {
            return;
        }

        let subscribers: Vec<ChangeCallback> = match self.subscribers.read() {
            Ok(guard) => guard.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => return,
        };
        trace!(%kind, subscribers = subscribers.len(), "flushing change notification");

        for callback in subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(kind))).is_err() {
                warn!(%kind, "change callback panicked; ignoring");
            }
        }
    }
}

/// Batches list mutations into deferred notifications.
#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<NotifierInner>,
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending: Vec<ListKind> = ListKind::ALL
            .into_iter()
            .filter(|kind| self.is_pending(*kind))
            .collect();
        f.debug_struct("ChangeNotifier")
            .field("pending", &pending)
            .finish_non_exhaustive()
    }
}

impl ChangeNotifier {
    /// Creates a notifier that defers flushes onto `scheduler`.
    #[must_use]
    pub fn new(scheduler: Arc<dyn DeferredScheduler>) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                scheduler,
                pending: [AtomicBool::new(false), AtomicBool::new(false), AtomicBool::new(false)],
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Records a change to `kind`, scheduling a flush if none is pending.
    pub fn mark(&self, kind: ListKind) {
        if self.inner.pending[kind.index()].swap(true, Ordering::AcqRel) {
            return;
        }
        let weak: Weak<NotifierInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.defer(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.flush(kind);
            }
        }));
    }

    /// Returns `true` if a flush for `kind` is scheduled but has not run.
    #[must_use]
    pub fn is_pending(&self, kind: ListKind) -> bool {
        self.inner.pending[kind.index()].load(Ordering::Acquire)
    }

    /// Adds a subscriber.
    ///
    /// # Panics
    ///
    /// Panics if the subscriber lock is poisoned.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(ListKind) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .write()
            .expect("notifier subscribers poisoned")
            .push((id, Arc::new(callback)));
        id
    }

    /// Removes a subscriber. Returns `false` if it was already gone.
    ///
    /// # Panics
    ///
    /// Panics if the subscriber lock is poisoned.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .expect("notifier subscribers poisoned");
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(notifier: &ChangeNotifier) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        notifier.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn marks_in_one_turn_coalesce() {
        let scheduler = Arc::new(ManualScheduler::new());
        let notifier = ChangeNotifier::new(scheduler.clone());
        let count = counting(&notifier);

        for _ in 0..10 {
            notifier.mark(ListKind::Tools);
        }
        assert_eq!(scheduler.queued(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        scheduler.run_pending();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!notifier.is_pending(ListKind::Tools));
    }

    #[test]
    fn marks_across_turns_notify_each_time() {
        let scheduler = Arc::new(ManualScheduler::new());
        let notifier = ChangeNotifier::new(scheduler.clone());
        let count = counting(&notifier);

        for _ in 0..3 {
            notifier.mark(ListKind::Tools);
            scheduler.run_pending();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn kinds_flush_independently() {
        let scheduler = Arc::new(ManualScheduler::new());
        let notifier = ChangeNotifier::new(scheduler.clone());
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kinds);
        notifier.subscribe(move |kind| sink.lock().unwrap().push(kind));

        notifier.mark(ListKind::Tools);
        notifier.mark(ListKind::Prompts);
        notifier.mark(ListKind::Tools);
        scheduler.run_pending();

        assert_eq!(*kinds.lock().unwrap(), vec![ListKind::Tools, ListKind::Prompts]);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let scheduler = Arc::new(ManualScheduler::new());
        let notifier = ChangeNotifier::new(scheduler.clone());
        notifier.subscribe(|_| panic!("subscriber bug"));
        let count = counting(&notifier);

        notifier.mark(ListKind::Resources);
        scheduler.run_pending();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let scheduler = Arc::new(ManualScheduler::new());
        let notifier = ChangeNotifier::new(scheduler.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let id = notifier.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.mark(ListKind::Tools);
        scheduler.run_pending();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tokio_scheduler_flushes_after_yield() {
        let notifier = ChangeNotifier::new(Arc::new(TokioScheduler::new()));
        let count = counting(&notifier);

        notifier.mark(ListKind::Tools);
        notifier.mark(ListKind::Tools);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        notifier.mark(ListKind::Tools);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn tokio_scheduler_coalesces_on_multi_thread_runtime() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let notifier = ChangeNotifier::new(Arc::new(TokioScheduler::new()));
                let count = counting(&notifier);

                for _ in 0..200 {
                    notifier.mark(ListKind::Tools);
                }
                std::thread::sleep(std::time::Duration::from_millis(20));
                assert_eq!(count.load(Ordering::SeqCst), 0);

                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                assert_eq!(count.load(Ordering::SeqCst), 1);
            })
            .await;
    }

    #[test]
    fn tokio_scheduler_holds_tasks_without_runtime() {
        let scheduler = Arc::new(TokioScheduler::new());
        let notifier = ChangeNotifier::new(scheduler.clone());
        let count = counting(&notifier);

        notifier.mark(ListKind::Tools);
        notifier.mark(ListKind::Prompts);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.held(), 2);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            notifier.mark(ListKind::Resources);
            assert_eq!(scheduler.held(), 0);
            assert_eq!(count.load(Ordering::SeqCst), 0);
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        });
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
