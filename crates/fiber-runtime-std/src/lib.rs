//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform
//! abstraction traits defined in `fiber-core`: a cooperative priority
//! scheduler with expiration times, time slicing and a microtask queue, and
//! a monotonic clock. Applications construct a [`StdRuntime`] and pump it
//! from their event loop with [`StdRuntime::run_slice`].

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use fiber_core::collections::map::HashMap;
use fiber_core::{
    Clock, HostConfig, NodeId, Root, Runtime, RuntimeHandle, Scheduler, SchedulerPriority, Task,
    TaskHandle,
};

/// Timeout used for idle work: effectively never.
pub const IDLE_TIMEOUT_MS: i64 = 1_073_741_823;

/// Time slicing and starvation settings of a [`StdScheduler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Length of one time slice; `should_yield` turns true once it elapses.
    pub frame_interval_ms: u64,
    pub immediate_timeout_ms: i64,
    pub user_blocking_timeout_ms: i64,
    pub normal_timeout_ms: i64,
    pub low_timeout_ms: i64,
    pub idle_timeout_ms: i64,
}

impl SchedulerConfig {
    /// How long a task of `priority` may wait before it runs without yielding.
    pub fn timeout_ms(&self, priority: SchedulerPriority) -> i64 {
        match priority {
            SchedulerPriority::Immediate => self.immediate_timeout_ms,
            SchedulerPriority::UserBlocking => self.user_blocking_timeout_ms,
            SchedulerPriority::Normal => self.normal_timeout_ms,
            SchedulerPriority::Low => self.low_timeout_ms,
            SchedulerPriority::Idle => self.idle_timeout_ms,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 5,
            immediate_timeout_ms: -1,
            user_blocking_timeout_ms: 250,
            normal_timeout_ms: 5_000,
            low_timeout_ms: 10_000,
            idle_timeout_ms: IDLE_TIMEOUT_MS,
        }
    }
}

struct ScheduledTask {
    priority: SchedulerPriority,
    expiration: i64,
    task: Task,
}

struct RunningTask {
    handle: TaskHandle,
    cancelled: bool,
}

#[derive(Default)]
struct SchedulerState {
    next_id: u64,
    // (expiration, id); entries whose id is no longer in `tasks` were cancelled
    queue: BinaryHeap<Reverse<(i64, u64)>>,
    tasks: HashMap<u64, ScheduledTask>,
    microtasks: VecDeque<Box<dyn FnOnce()>>,
    running: Option<RunningTask>,
}

/// Single-threaded priority scheduler.
///
/// Tasks are ordered by expiration time (enqueue time plus the priority's
/// timeout), ties broken by insertion order. A slice runs tasks until the
/// frame interval has elapsed; a task that is already expired runs even
/// then and is told so through `did_timeout`. No borrow is held while a task
/// or microtask runs, so they may re-enter the scheduler.
pub struct StdScheduler<C: Clock = StdClock> {
    clock: C,
    origin: C::Instant,
    config: SchedulerConfig,
    state: RefCell<SchedulerState>,
    current_priority: Cell<SchedulerPriority>,
    slice_start: Cell<i64>,
}

impl StdScheduler<StdClock> {
    pub fn new() -> Self {
        Self::with_clock(StdClock)
    }
}

impl Default for StdScheduler<StdClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> StdScheduler<C> {
    pub fn with_clock(clock: C) -> Self {
        Self::with_config(clock, SchedulerConfig::default())
    }

    pub fn with_config(clock: C, config: SchedulerConfig) -> Self {
        let origin = clock.now();
        Self {
            clock,
            origin,
            config,
            state: RefCell::new(SchedulerState::default()),
            current_priority: Cell::new(SchedulerPriority::Normal),
            slice_start: Cell::new(0),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Milliseconds since the scheduler was created.
    pub fn now_ms(&self) -> i64 {
        i64::try_from(self.clock.elapsed_millis(self.origin)).unwrap_or(i64::MAX)
    }

    /// Number of queued (not cancelled) tasks.
    pub fn pending_tasks(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    pub fn has_pending_microtasks(&self) -> bool {
        !self.state.borrow().microtasks.is_empty()
    }

    pub fn has_pending_work(&self) -> bool {
        let state = self.state.borrow();
        !state.tasks.is_empty() || !state.microtasks.is_empty()
    }

    /// Runs queued microtasks, including ones queued meanwhile.
    pub fn flush_microtasks(&self) {
        loop {
            let next = self.state.borrow_mut().microtasks.pop_front();
            let Some(microtask) = next else {
                break;
            };
            microtask();
        }
    }

    /// Runs one time slice. Returns whether tasks remain queued.
    pub fn run_slice(&self) -> bool {
        self.flush_microtasks();
        self.slice_start.set(self.now_ms());
        let mut ran_any = false;
        while let Some((id, expiration)) = self.peek() {
            let expired = expiration <= self.now_ms();
            if ran_any && !expired && self.should_yield() {
                break;
            }
            self.run_task(id, expired);
            ran_any = true;
            self.flush_microtasks();
        }
        self.pending_tasks() > 0
    }

    /// Runs slices until no task or microtask is left.
    ///
    /// Gives up after `max_slices` slices, which only happens when tasks keep
    /// rescheduling themselves.
    pub fn run_until_idle(&self, max_slices: usize) -> bool {
        for _ in 0..max_slices {
            self.run_slice();
            if !self.has_pending_work() {
                return true;
            }
        }
        log::warn!("scheduler still busy after {max_slices} slices");
        false
    }

    /// Earliest live task, dropping cancelled heap entries on the way.
    fn peek(&self) -> Option<(u64, i64)> {
        let mut state = self.state.borrow_mut();
        while let Some(Reverse((expiration, id))) = state.queue.peek().copied() {
            if state.tasks.contains_key(&id) {
                return Some((id, expiration));
            }
            state.queue.pop();
        }
        None
    }

    fn run_task(&self, id: u64, did_timeout: bool) {
        let scheduled = {
            let mut state = self.state.borrow_mut();
            state.queue.pop();
            let Some(scheduled) = state.tasks.remove(&id) else {
                return;
            };
            state.running = Some(RunningTask {
                handle: TaskHandle(id),
                cancelled: false,
            });
            scheduled
        };
        let previous = self.current_priority.replace(scheduled.priority);
        let continuation = scheduled.task.run(did_timeout);
        self.current_priority.set(previous);

        let mut state = self.state.borrow_mut();
        let cancelled = state
            .running
            .take()
            .map_or(false, |running| running.cancelled);
        if let (Some(task), false) = (continuation, cancelled) {
            state.tasks.insert(
                id,
                ScheduledTask {
                    priority: scheduled.priority,
                    expiration: scheduled.expiration,
                    task,
                },
            );
            state.queue.push(Reverse((scheduled.expiration, id)));
        }
    }
}

impl<C: Clock> Scheduler for StdScheduler<C> {
    fn schedule_callback(&self, priority: SchedulerPriority, task: Task) -> TaskHandle {
        let expiration = self
            .now_ms()
            .saturating_add(self.config.timeout_ms(priority));
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        state.tasks.insert(
            id,
            ScheduledTask {
                priority,
                expiration,
                task,
            },
        );
        state.queue.push(Reverse((expiration, id)));
        TaskHandle(id)
    }

    fn cancel_callback(&self, handle: TaskHandle) {
        let mut state = self.state.borrow_mut();
        state.tasks.remove(&handle.0);
        if let Some(running) = state.running.as_mut() {
            if running.handle == handle {
                running.cancelled = true;
            }
        }
    }

    fn should_yield(&self) -> bool {
        let elapsed = self.now_ms() - self.slice_start.get();
        elapsed >= i64::try_from(self.config.frame_interval_ms).unwrap_or(i64::MAX)
    }

    fn current_priority_level(&self) -> SchedulerPriority {
        self.current_priority.get()
    }

    fn run_with_priority(&self, priority: SchedulerPriority, f: &mut dyn FnMut()) {
        let previous = self.current_priority.replace(priority);
        f();
        self.current_priority.set(previous);
    }

    fn schedule_microtask(&self, callback: Box<dyn FnOnce()>) {
        self.state.borrow_mut().microtasks.push_back(callback);
    }
}

impl<C: Clock> fmt::Debug for StdScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("StdScheduler")
            .field("tasks", &state.tasks.len())
            .field("microtasks", &state.microtasks.len())
            .field("current_priority", &self.current_priority.get())
            .field("config", &self.config)
            .finish()
    }
}

/// Clock implementation backed by [`std::time`].
#[derive(Debug, Default, Clone)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn elapsed_millis(&self, since: Self::Instant) -> u64 {
        since.elapsed().as_millis() as u64
    }
}

impl StdClock {
    /// Returns the elapsed time as a [`Duration`] for convenience.
    pub fn elapsed(&self, since: Instant) -> Duration {
        since.elapsed()
    }
}

/// Convenience container bundling the standard scheduler with a runtime.
#[derive(Clone)]
pub struct StdRuntime<C: Clock + 'static = StdClock> {
    scheduler: Rc<StdScheduler<C>>,
    runtime: Runtime,
}

impl StdRuntime<StdClock> {
    /// Creates a new standard runtime instance.
    pub fn new() -> Self {
        Self::with_scheduler(StdScheduler::new())
    }
}

impl Default for StdRuntime<StdClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + 'static> StdRuntime<C> {
    pub fn with_scheduler(scheduler: StdScheduler<C>) -> Self {
        let scheduler = Rc::new(scheduler);
        let runtime = Runtime::new(scheduler.clone());
        Self { scheduler, runtime }
    }

    /// Returns a [`fiber_core::Runtime`] driven by the standard scheduler.
    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    /// Returns a handle to the runtime.
    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    /// Returns the scheduler implementation.
    pub fn scheduler(&self) -> Rc<StdScheduler<C>> {
        Rc::clone(&self.scheduler)
    }

    pub fn create_container(&self, host: impl HostConfig + 'static, container: NodeId) -> Root {
        self.runtime.create_container(host, container)
    }

    /// Runs one time slice of scheduled work.
    pub fn run_slice(&self) -> bool {
        self.scheduler.run_slice()
    }

    /// Runs scheduled work until the scheduler is idle.
    pub fn run_until_idle(&self) -> bool {
        self.scheduler.run_until_idle(10_000)
    }
}

impl<C: Clock + 'static> fmt::Debug for StdRuntime<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Clone, Default)]
    struct StepClock {
        now: Arc<AtomicU64>,
    }

    impl StepClock {
        fn advance(&self, ms: u64) {
            self.now.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for StepClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }

        fn elapsed_millis(&self, since: u64) -> u64 {
            self.now().saturating_sub(since)
        }
    }

    fn record(log: &Rc<RefCell<Vec<String>>>, entry: &str) -> Task {
        let log = Rc::clone(log);
        let entry = entry.to_owned();
        Task::once(move || log.borrow_mut().push(entry))
    }

    #[test]
    fn tasks_run_by_priority_then_insertion_order() {
        let scheduler = StdScheduler::with_clock(StepClock::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule_callback(SchedulerPriority::Normal, record(&log, "normal-1"));
        scheduler.schedule_callback(SchedulerPriority::Idle, record(&log, "idle"));
        scheduler.schedule_callback(SchedulerPriority::Normal, record(&log, "normal-2"));
        scheduler.schedule_callback(SchedulerPriority::Immediate, record(&log, "immediate"));
        scheduler.schedule_callback(SchedulerPriority::UserBlocking, record(&log, "blocking"));

        assert!(scheduler.run_until_idle(10));
        assert_eq!(
            *log.borrow(),
            vec!["immediate", "blocking", "normal-1", "normal-2", "idle"]
        );
    }

    #[test]
    fn cancelled_tasks_never_run() {
        let scheduler = StdScheduler::with_clock(StepClock::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let handle = scheduler.schedule_callback(SchedulerPriority::Normal, record(&log, "a"));
        scheduler.schedule_callback(SchedulerPriority::Normal, record(&log, "b"));
        scheduler.cancel_callback(handle);
        scheduler.cancel_callback(TaskHandle(999));

        assert_eq!(scheduler.pending_tasks(), 1);
        scheduler.run_until_idle(10);
        assert_eq!(*log.borrow(), vec!["b"]);
    }

    #[test]
    fn continuations_keep_their_handle() {
        let scheduler = Rc::new(StdScheduler::with_clock(StepClock::default()));
        let runs = Rc::new(Cell::new(0));

        fn counting(runs: Rc<Cell<u32>>) -> Task {
            Task::new(move |_| {
                runs.set(runs.get() + 1);
                (runs.get() < 3).then(|| counting(Rc::clone(&runs)))
            })
        }

        scheduler.schedule_callback(SchedulerPriority::Normal, counting(Rc::clone(&runs)));
        scheduler.run_until_idle(10);
        assert_eq!(runs.get(), 3);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[test]
    fn continuation_of_a_task_that_cancelled_itself_is_dropped() {
        let scheduler = Rc::new(StdScheduler::with_clock(StepClock::default()));
        let handle = Rc::new(Cell::new(None));
        let runs = Rc::new(Cell::new(0));
        let task = {
            let scheduler = Rc::clone(&scheduler);
            let handle = Rc::clone(&handle);
            let runs = Rc::clone(&runs);
            Task::new(move |_| {
                runs.set(runs.get() + 1);
                if let Some(own) = handle.get() {
                    scheduler.cancel_callback(own);
                }
                Some(Task::once(|| panic!("cancelled continuation ran")))
            })
        };
        handle.set(Some(
            scheduler.schedule_callback(SchedulerPriority::Normal, task),
        ));
        assert!(scheduler.run_until_idle(10));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn slices_yield_once_the_frame_interval_elapses() {
        let clock = StepClock::default();
        let scheduler = StdScheduler::with_clock(clock.clone());
        let log = Rc::new(RefCell::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let log = Rc::clone(&log);
            let clock = clock.clone();
            scheduler.schedule_callback(
                SchedulerPriority::Normal,
                Task::once(move || {
                    clock.advance(3);
                    log.borrow_mut().push(name);
                }),
            );
        }

        assert!(scheduler.run_slice(), "work is left after the first slice");
        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert!(!scheduler.run_slice());
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn expired_tasks_run_without_yielding_and_see_the_timeout() {
        let clock = StepClock::default();
        let scheduler = StdScheduler::with_clock(clock.clone());
        let timeouts = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..3 {
            let timeouts = Rc::clone(&timeouts);
            let clock = clock.clone();
            scheduler.schedule_callback(
                SchedulerPriority::UserBlocking,
                Task::new(move |did_timeout| {
                    clock.advance(10);
                    timeouts.borrow_mut().push(did_timeout);
                    None
                }),
            );
        }
        clock.advance(300);
        assert!(!scheduler.run_slice(), "expired work drains in one slice");
        assert_eq!(*timeouts.borrow(), vec![true, true, true]);
    }

    #[test]
    fn microtasks_run_before_the_next_task() {
        let scheduler = Rc::new(StdScheduler::with_clock(StepClock::default()));
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let scheduler_in_task = Rc::clone(&scheduler);
            let log = Rc::clone(&log);
            scheduler.schedule_callback(
                SchedulerPriority::Normal,
                Task::once(move || {
                    log.borrow_mut().push("task-1".to_owned());
                    let log = Rc::clone(&log);
                    scheduler_in_task
                        .schedule_microtask(Box::new(move || log.borrow_mut().push("micro".to_owned())));
                }),
            );
        }
        scheduler.schedule_callback(SchedulerPriority::Normal, record(&log, "task-2"));
        scheduler.run_until_idle(10);
        assert_eq!(*log.borrow(), vec!["task-1", "micro", "task-2"]);
    }

    #[test]
    fn priority_is_scoped_to_the_running_task() {
        let scheduler = Rc::new(StdScheduler::with_clock(StepClock::default()));
        let seen = Rc::new(Cell::new(None));
        {
            let inner = Rc::clone(&scheduler);
            let seen = Rc::clone(&seen);
            scheduler.schedule_callback(
                SchedulerPriority::UserBlocking,
                Task::once(move || seen.set(Some(inner.current_priority_level()))),
            );
        }
        scheduler.run_until_idle(10);
        assert_eq!(seen.get(), Some(SchedulerPriority::UserBlocking));
        assert_eq!(scheduler.current_priority_level(), SchedulerPriority::Normal);

        let mut inside = None;
        scheduler.run_with_priority(SchedulerPriority::Idle, &mut || {
            inside = Some(scheduler.current_priority_level());
        });
        assert_eq!(inside, Some(SchedulerPriority::Idle));
        assert_eq!(scheduler.current_priority_level(), SchedulerPriority::Normal);
    }

    #[test]
    fn default_timeouts() {
        let config = SchedulerConfig::default();
        assert_eq!(config.timeout_ms(SchedulerPriority::Immediate), -1);
        assert_eq!(config.timeout_ms(SchedulerPriority::UserBlocking), 250);
        assert_eq!(config.timeout_ms(SchedulerPriority::Normal), 5_000);
        assert_eq!(config.timeout_ms(SchedulerPriority::Low), 10_000);
        assert_eq!(config.timeout_ms(SchedulerPriority::Idle), IDLE_TIMEOUT_MS);
        assert_eq!(config.frame_interval_ms, 5);
    }

    #[test]
    fn std_runtime_renders_into_a_memory_host() {
        use fiber_core::{h, MemoryHost};

        let runtime = StdRuntime::new();
        let host = MemoryHost::new();
        let container = host.create_container();
        let root = runtime.create_container(host.clone(), container);
        root.render(h("p").child("hello"));
        assert!(runtime.run_until_idle());
        assert_eq!(host.html(container), "<p>hello</p>");
    }
}
