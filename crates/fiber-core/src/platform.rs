//! Platform abstraction traits for the reconciler's scheduling services.
//!
//! The engine never decides *when* work runs. It hands callbacks to a host
//! supplied [`Scheduler`], asks it whether the current time slice is over,
//! and relies on it for microtask timing. `fiber-runtime-std` ships a
//! `std` backed implementation; tests drive the same one with a manual clock.

use std::fmt;

/// Priority levels understood by the external scheduler, highest first.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchedulerPriority {
    Immediate = 1,
    UserBlocking = 2,
    #[default]
    Normal = 3,
    Low = 4,
    Idle = 5,
}

/// Cancellation handle returned by [`Scheduler::schedule_callback`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(pub u64);

/// A unit of scheduled work.
///
/// The callback receives `did_timeout` (the task outlived its priority's
/// timeout) and may hand back a continuation that the scheduler keeps under
/// the same handle and expiration time.
pub struct Task(Box<dyn FnOnce(bool) -> Option<Task>>);

impl Task {
    pub fn new(callback: impl FnOnce(bool) -> Option<Task> + 'static) -> Self {
        Self(Box::new(callback))
    }

    /// Wraps a callback that never yields a continuation.
    pub fn once(callback: impl FnOnce() + 'static) -> Self {
        Self::new(move |_| {
            callback();
            None
        })
    }

    pub fn run(self, did_timeout: bool) -> Option<Task> {
        (self.0)(did_timeout)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task(..)")
    }
}

/// Cooperative, single-threaded priority scheduler.
///
/// Implementations must tolerate re-entrant calls: a running task may
/// schedule, cancel, or query the scheduler.
pub trait Scheduler {
    /// Queue `task` at `priority` and return a handle that can cancel it.
    fn schedule_callback(&self, priority: SchedulerPriority, task: Task) -> TaskHandle;

    /// Cancel a queued task. Cancelling a finished or unknown task is a no-op.
    fn cancel_callback(&self, handle: TaskHandle);

    /// Whether the running task should hand control back to the host.
    fn should_yield(&self) -> bool;

    /// Priority of the task currently executing, or the ambient level.
    fn current_priority_level(&self) -> SchedulerPriority;

    /// Run `f` with the ambient priority temporarily set to `priority`.
    fn run_with_priority(&self, priority: SchedulerPriority, f: &mut dyn FnMut());

    /// Run `callback` at microtask timing.
    ///
    /// Hosts without a microtask queue fall back to an immediate-priority task.
    fn schedule_microtask(&self, callback: Box<dyn FnOnce()>) {
        self.schedule_callback(SchedulerPriority::Immediate, Task::once(callback));
    }
}

/// Provides timing information for schedulers.
pub trait Clock: Send + Sync {
    /// Instant type produced by this clock implementation.
    type Instant: Copy + Send + Sync;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Returns the number of milliseconds elapsed since `since`.
    fn elapsed_millis(&self, since: Self::Instant) -> u64;
}
