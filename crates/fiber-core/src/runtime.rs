use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::commit::{flush_passive_effects, PendingPassiveEffects};
use crate::element::Node;
use crate::error::RenderError;
use crate::fiber::{Fiber, FiberArena, FiberId, FiberProps, FiberState, RootState, WorkTag};
use crate::host::{HostConfig, NodeId};
use crate::lanes::{Lane, Lanes};
use crate::platform::{Scheduler, SchedulerPriority, TaskHandle};
use crate::update_queue::{SharedQueue, UpdateQueue};
use crate::work_loop::update_container;

pub(crate) struct RuntimeInner {
    scheduler: Rc<dyn Scheduler>,
    sync_queue: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    flushing_sync_queue: Cell<bool>,
    in_transition: Cell<bool>,
}

impl RuntimeInner {
    fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            sync_queue: RefCell::new(VecDeque::new()),
            flushing_sync_queue: Cell::new(false),
            in_transition: Cell::new(false),
        }
    }

    pub(crate) fn scheduler(&self) -> &dyn Scheduler {
        &*self.scheduler
    }

    pub(crate) fn schedule_sync_callback(&self, callback: Box<dyn FnOnce()>) {
        self.sync_queue.borrow_mut().push_back(callback);
    }

    /// Drains the sync queue, including callbacks queued while draining.
    /// Nested calls return immediately.
    pub(crate) fn flush_sync_callbacks(&self) {
        if self.flushing_sync_queue.replace(true) {
            return;
        }
        struct Guard<'a>(&'a Cell<bool>);
        impl Drop for Guard<'_> {
            fn drop(&mut self) {
                self.0.set(false);
            }
        }
        let _guard = Guard(&self.flushing_sync_queue);
        loop {
            let next = self.sync_queue.borrow_mut().pop_front();
            let Some(callback) = next else {
                break;
            };
            callback();
        }
    }

    fn request_update_lane(&self) -> Lane {
        if self.in_transition.get() {
            return Lanes::TRANSITION;
        }
        Lanes::from_scheduler_priority(self.scheduler.current_priority_level())
    }

    fn run_with_priority(&self, priority: SchedulerPriority, f: impl FnOnce()) {
        let mut f = Some(f);
        self.scheduler.run_with_priority(priority, &mut || {
            if let Some(f) = f.take() {
                f();
            }
        });
    }
}

/// Owner of the scheduler binding shared by every root it creates.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(scheduler)),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(&self.inner))
    }

    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::clone(&self.inner.scheduler)
    }

    /// Creates a root rendering into `container`, a node of `host`.
    pub fn create_container(&self, host: impl HostConfig + 'static, container: NodeId) -> Root {
        let mut fibers = FiberArena::new();
        let mut root_fiber = Fiber::new(WorkTag::HostRoot, FiberProps::Root, None);
        root_fiber.state_node = Some(container);
        root_fiber.memoized_state = FiberState::Root(RootState::default());
        let current = fibers.insert(root_fiber);
        log::debug!("created root for container {container}");
        Root {
            inner: Rc::new(RootInner {
                runtime: self.handle(),
                container,
                host: RefCell::new(Box::new(host)),
                fibers: RefCell::new(fibers),
                current: Cell::new(current),
                finished_work: Cell::new(None),
                finished_lane: Cell::new(Lanes::NO_LANE),
                pending_lanes: Cell::new(Lanes::NO_LANES),
                interleaved_lanes: Cell::new(Lanes::NO_LANES),
                callback_node: Cell::new(None),
                callback_priority: Cell::new(Lanes::NO_LANE),
                pending_passive_effects: RefCell::new(PendingPassiveEffects::default()),
                passive_flush_scheduled: Cell::new(false),
                work_in_progress: Cell::new(None),
                wip_render_lane: Cell::new(Lanes::NO_LANE),
                render_error: RefCell::new(None),
                root_queue: UpdateQueue::shared(),
            }),
        }
    }

    /// Runs every queued sync render now.
    pub fn flush_sync_callbacks(&self) {
        self.inner.flush_sync_callbacks();
    }

    pub fn has_pending_sync_callbacks(&self) -> bool {
        !self.inner.sync_queue.borrow().is_empty()
    }

    /// Runs `f` with updates it dispatches assigned the lane of `priority`.
    pub fn run_with_priority(&self, priority: SchedulerPriority, f: impl FnOnce()) {
        self.inner.run_with_priority(priority, f);
    }

    /// Runs `f` with updates it dispatches assigned the transition lane.
    pub fn start_transition(&self, f: impl FnOnce()) {
        self.handle().with_transition(f);
    }
}

#[derive(Clone)]
pub struct RuntimeHandle(pub(crate) Weak<RuntimeInner>);

impl RuntimeHandle {
    pub(crate) fn upgrade(&self) -> Option<Rc<RuntimeInner>> {
        self.0.upgrade()
    }

    /// Lane for an update requested now: the transition lane inside a
    /// transition, otherwise the lane matching the scheduler's current
    /// priority.
    pub fn request_update_lane(&self) -> Lane {
        self.0
            .upgrade()
            .map(|inner| inner.request_update_lane())
            .unwrap_or(Lanes::DEFAULT)
    }

    pub fn flush_sync_callbacks(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.flush_sync_callbacks();
        }
    }

    /// Sets the transition flag and returns its previous value.
    pub(crate) fn set_in_transition(&self, value: bool) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.in_transition.replace(value))
            .unwrap_or(false)
    }

    pub(crate) fn with_transition(&self, f: impl FnOnce()) {
        let previous = self.set_in_transition(true);
        f();
        self.set_in_transition(previous);
    }
}

/// State of one mounted tree.
pub(crate) struct RootInner {
    runtime: RuntimeHandle,
    container: NodeId,
    pub(crate) host: RefCell<Box<dyn HostConfig>>,
    pub(crate) fibers: RefCell<FiberArena>,
    /// Root fiber of the committed tree.
    pub(crate) current: Cell<FiberId>,
    pub(crate) finished_work: Cell<Option<FiberId>>,
    pub(crate) finished_lane: Cell<Lane>,
    pub(crate) pending_lanes: Cell<Lanes>,
    /// Lanes updated while a render was in progress; they stay pending after
    /// that render commits.
    pub(crate) interleaved_lanes: Cell<Lanes>,
    pub(crate) callback_node: Cell<Option<TaskHandle>>,
    pub(crate) callback_priority: Cell<Lane>,
    pub(crate) pending_passive_effects: RefCell<PendingPassiveEffects>,
    pub(crate) passive_flush_scheduled: Cell<bool>,
    pub(crate) work_in_progress: Cell<Option<FiberId>>,
    pub(crate) wip_render_lane: Cell<Lane>,
    pub(crate) render_error: RefCell<Option<RenderError>>,
    pub(crate) root_queue: SharedQueue<Node>,
}

impl RootInner {
    pub(crate) fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub(crate) fn container(&self) -> NodeId {
        self.container
    }

    pub(crate) fn mark_root_updated(&self, lane: Lane) {
        self.pending_lanes.set(self.pending_lanes.get() | lane);
        if self.work_in_progress.get().is_some() {
            self.interleaved_lanes
                .set(self.interleaved_lanes.get() | lane);
        }
    }

    /// Removes `lane` from the pending set, keeping interleaved updates.
    pub(crate) fn mark_root_finished(&self, lane: Lane) {
        let remaining = self.pending_lanes.get().subtract(lane) | self.interleaved_lanes.get();
        self.pending_lanes.set(remaining);
        self.interleaved_lanes.set(Lanes::NO_LANES);
    }
}

/// Handle to a root created by [`Runtime::create_container`].
#[derive(Clone)]
pub struct Root {
    inner: Rc<RootInner>,
}

impl Root {
    /// Schedules a sync render of `node` into the container.
    ///
    /// The render itself runs when the sync queue is flushed, at microtask
    /// timing or through [`Runtime::flush_sync_callbacks`].
    pub fn render(&self, node: impl Into<Node>) {
        if self.inner.runtime.upgrade().is_none() {
            log::warn!("render on a root whose runtime was dropped");
            return;
        }
        update_container(&self.inner, node.into());
    }

    /// Schedules removal of everything rendered into the container.
    pub fn unmount(&self) {
        self.render(Node::Empty);
    }

    pub fn container(&self) -> NodeId {
        self.inner.container()
    }

    pub fn pending_lanes(&self) -> Lanes {
        self.inner.pending_lanes.get()
    }

    /// Whether a time-sliced render yielded with work left.
    pub fn is_rendering(&self) -> bool {
        self.inner.work_in_progress.get().is_some()
    }

    /// The error that aborted the most recent failed render, if any.
    pub fn take_render_error(&self) -> Option<RenderError> {
        self.inner.render_error.borrow_mut().take()
    }

    /// Runs pending passive effects now. Returns whether any ran.
    pub fn flush_passive_effects(&self) -> bool {
        flush_passive_effects(&self.inner)
    }

    /// Root fiber of the committed tree.
    pub fn current(&self) -> FiberId {
        self.inner.current.get()
    }

    /// Inspects the fiber arena.
    pub fn with_fibers<R>(&self, f: impl FnOnce(&FiberArena) -> R) -> R {
        f(&self.inner.fibers.borrow())
    }
}
