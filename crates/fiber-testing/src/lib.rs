//! Headless harness for exercising fiber roots in tests.
//!
//! [`ReconcilerTestRule`] owns an in-memory host, a root rendering into it,
//! and a standard scheduler driven by a [`ManualClock`], so tests decide
//! exactly when time passes and when scheduled work runs.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fiber_core::{
    Clock, HostOp, Lanes, MemoryHost, Node, NodeId, RenderError, Root, Runtime,
    SchedulerPriority,
};
use fiber_runtime_std::{SchedulerConfig, StdRuntime, StdScheduler};

/// Upper bound on slices spent by [`ReconcilerTestRule::run_until_idle`].
const MAX_SLICES: usize = 10_000;

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    type Instant = u64;

    fn now(&self) -> u64 {
        self.millis()
    }

    fn elapsed_millis(&self, since: u64) -> u64 {
        self.millis().saturating_sub(since)
    }
}

/// Shared list of strings that components and effects append to.
#[derive(Clone, Debug, Default)]
pub struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    /// Returns and clears the recorded entries.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Headless root with a deterministic scheduler.
pub struct ReconcilerTestRule {
    runtime: StdRuntime<ManualClock>,
    clock: ManualClock,
    host: MemoryHost,
    root: Root,
}

impl ReconcilerTestRule {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let clock = ManualClock::new();
        let runtime = StdRuntime::with_scheduler(StdScheduler::with_config(clock.clone(), config));
        let host = MemoryHost::new();
        let container = host.create_container();
        let root = runtime.create_container(host.clone(), container);
        Self {
            runtime,
            clock,
            host,
            root,
        }
    }

    /// Renders `node` into the container and runs all resulting work,
    /// effects included.
    pub fn render(&self, node: impl Into<Node>) {
        self.root.render(node);
        self.run_until_idle();
    }

    /// Schedules a render of `node` without running it.
    pub fn schedule_render(&self, node: impl Into<Node>) {
        self.root.render(node);
    }

    /// Removes everything rendered and runs the resulting cleanups.
    pub fn unmount(&self) {
        self.root.unmount();
        self.run_until_idle();
    }

    /// Runs `f`, then everything it scheduled.
    pub fn act(&self, f: impl FnOnce()) {
        f();
        self.run_until_idle();
    }

    /// Runs only the queued sync renders, leaving scheduler tasks (and so
    /// passive effects) pending.
    pub fn flush_sync(&self) {
        self.runtime.runtime().flush_sync_callbacks();
    }

    /// Runs one scheduler time slice. Returns whether work remains.
    pub fn run_slice(&self) -> bool {
        self.runtime.run_slice()
    }

    /// Runs scheduled work until nothing is left.
    ///
    /// Panics when work keeps rescheduling itself.
    pub fn run_until_idle(&self) {
        let idle = self.runtime.scheduler().run_until_idle(MAX_SLICES);
        assert!(idle, "scheduler did not become idle");
    }

    pub fn advance_time(&self, millis: u64) {
        self.clock.advance(millis);
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Runs `f` with updates it dispatches assigned the lane of `priority`.
    pub fn with_priority(&self, priority: SchedulerPriority, f: impl FnOnce()) {
        self.runtime.runtime().run_with_priority(priority, f);
    }

    /// Runs `f` with updates it dispatches assigned the transition lane.
    pub fn start_transition(&self, f: impl FnOnce()) {
        self.runtime.runtime().start_transition(f);
    }

    /// Markup of the container's children.
    pub fn html(&self) -> String {
        self.host.html(self.root.container())
    }

    pub fn take_ops(&self) -> Vec<HostOp> {
        self.host.take_ops()
    }

    /// First element whose `id` attribute is `id`.
    pub fn find(&self, id: &str) -> Option<NodeId> {
        self.host.find_by_id(self.root.container(), id)
    }

    /// Clicks the element whose `id` attribute is `id` and runs the work it
    /// scheduled. Returns `false` when there is no such clickable element.
    pub fn click(&self, id: &str) -> bool {
        let Some(node) = self.find(id) else {
            log::warn!("no element with id {id:?}");
            return false;
        };
        let clicked = self.host.click(node);
        self.run_until_idle();
        clicked
    }

    pub fn pending_lanes(&self) -> Lanes {
        self.root.pending_lanes()
    }

    pub fn is_rendering(&self) -> bool {
        self.root.is_rendering()
    }

    pub fn take_render_error(&self) -> Option<RenderError> {
        self.root.take_render_error()
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn host(&self) -> &MemoryHost {
        &self.host
    }

    pub fn container(&self) -> NodeId {
        self.root.container()
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime.runtime()
    }

    pub fn scheduler(&self) -> Rc<StdScheduler<ManualClock>> {
        self.runtime.scheduler()
    }
}

impl Default for ReconcilerTestRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for tests that only need a rule for one closure.
pub fn run_test_root<R>(f: impl FnOnce(&ReconcilerTestRule) -> R) -> R {
    let rule = ReconcilerTestRule::new();
    f(&rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiber_core::{h, Component};

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();
        other.advance(7);
        assert_eq!(clock.elapsed_millis(start), 7);
        clock.set(2);
        assert_eq!(other.millis(), 2);
    }

    #[test]
    fn rule_renders_and_reports_markup() {
        run_test_root(|rule| {
            let greeting = Component::new("Greeting", |_, props| {
                let name = props.get_str("name").unwrap_or("nobody").to_owned();
                Ok(h("p").child(format!("hi {name}")).into())
            });
            rule.render(greeting.element().attr("name", "rule"));
            assert_eq!(rule.html(), "<p>hi rule</p>");
            assert!(!rule.is_rendering());
            assert_eq!(rule.pending_lanes(), Lanes::NO_LANES);
        });
    }

    #[test]
    fn scheduled_render_waits_for_the_sync_flush() {
        let rule = ReconcilerTestRule::new();
        rule.schedule_render(h("p").child("later"));
        assert_eq!(rule.html(), "");
        assert_eq!(rule.pending_lanes(), Lanes::SYNC);
        rule.flush_sync();
        assert_eq!(rule.html(), "<p>later</p>");
    }

    #[test]
    fn event_log_take_clears() {
        let log = EventLog::new();
        log.push("a");
        log.push(String::from("b"));
        assert_eq!(log.entries(), vec!["a", "b"]);
        assert_eq!(log.take(), vec!["a", "b"]);
        assert!(log.entries().is_empty());
    }
}
