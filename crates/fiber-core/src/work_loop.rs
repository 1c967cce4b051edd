//! Render phase: scheduling roots, walking the work-in-progress tree and
//! building it one fiber at a time.

use std::mem;
use std::rc::{Rc, Weak};

use crate::commit::{commit_root, flush_passive_effects};
use crate::element::{ElementType, Node};
use crate::error::RenderError;
use crate::fiber::{FiberArena, FiberId, FiberProps, FiberState, Flags, RootState, WorkTag};
use crate::hooks::{Dispatcher, Hook, RenderContext};
use crate::host::{HostConfig, NodeId};
use crate::lanes::{Lane, Lanes};
use crate::platform::Task;
use crate::reconcile::{mount_child_fibers, reconcile_child_fibers};
use crate::runtime::RootInner;
use crate::update_queue::{create_update, enqueue_update, merge_and_process, Action};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RootExitStatus {
    /// A time-sliced render yielded with work left.
    Incomplete,
    Completed,
    Errored,
}

/// Queues `element` as the root's new content on the sync lane and schedules
/// the root. Ambient priority and transitions do not apply.
pub(crate) fn update_container(root: &Rc<RootInner>, element: Node) {
    let lane = Lanes::SYNC;
    let current = root.current.get();
    {
        let mut fibers = root.fibers.borrow_mut();
        enqueue_update(
            &mut root.root_queue.borrow_mut(),
            create_update(Action::Replace(element), lane),
            &mut fibers,
            current,
            lane,
        );
    }
    schedule_update_on_fiber(root, current, lane);
}

pub(crate) fn schedule_update_on_fiber(root: &Rc<RootInner>, fiber: FiberId, lane: Lane) {
    let reached = root
        .fibers
        .borrow_mut()
        .mark_update_lane_to_root(fiber, lane);
    if reached.is_none() {
        log::warn!("update on a fiber detached from its root ignored");
        return;
    }
    root.mark_root_updated(lane);
    ensure_root_is_scheduled(root);
}

/// Makes sure exactly one callback is queued for the root's most urgent
/// pending lane.
pub(crate) fn ensure_root_is_scheduled(root: &Rc<RootInner>) {
    let Some(runtime) = root.runtime().upgrade() else {
        log::error!("root scheduled after its runtime was dropped");
        return;
    };
    let scheduler = runtime.scheduler();
    let update_lane = root.pending_lanes.get().highest_priority();
    let existing = root.callback_node.get();

    if update_lane == Lanes::NO_LANE {
        if let Some(handle) = existing {
            scheduler.cancel_callback(handle);
        }
        root.callback_node.set(None);
        root.callback_priority.set(Lanes::NO_LANE);
        return;
    }
    if update_lane == root.callback_priority.get() {
        return;
    }
    if let Some(handle) = existing {
        scheduler.cancel_callback(handle);
    }

    let weak = Rc::downgrade(root);
    let callback_node = if update_lane == Lanes::SYNC {
        log::debug!("scheduling sync render");
        runtime.schedule_sync_callback(Box::new(move || {
            if let Some(root) = weak.upgrade() {
                perform_sync_work_on_root(&root);
            }
        }));
        let handle = root.runtime().clone();
        scheduler.schedule_microtask(Box::new(move || handle.flush_sync_callbacks()));
        None
    } else {
        let priority = update_lane.to_scheduler_priority();
        log::debug!("scheduling concurrent render of {update_lane:?} at {priority:?}");
        Some(scheduler.schedule_callback(priority, concurrent_task(weak)))
    };
    root.callback_node.set(callback_node);
    root.callback_priority.set(update_lane);
}

fn concurrent_task(root: Weak<RootInner>) -> Task {
    Task::new(move |did_timeout| {
        let root = root.upgrade()?;
        perform_concurrent_work_on_root(&root, did_timeout)
    })
}

fn perform_sync_work_on_root(root: &Rc<RootInner>) {
    if root.pending_lanes.get().highest_priority() != Lanes::SYNC {
        ensure_root_is_scheduled(root);
        return;
    }
    flush_passive_effects(root);
    if root.pending_lanes.get().highest_priority() != Lanes::SYNC {
        ensure_root_is_scheduled(root);
        return;
    }
    match render_root(root, Lanes::SYNC, false) {
        RootExitStatus::Completed => commit_finished_render(root, Lanes::SYNC),
        RootExitStatus::Errored => ensure_root_is_scheduled(root),
        RootExitStatus::Incomplete => {
            log::error!("sync render returned with work left");
            ensure_root_is_scheduled(root);
        }
    }
}

fn perform_concurrent_work_on_root(root: &Rc<RootInner>, did_timeout: bool) -> Option<Task> {
    let original = root.callback_node.get();
    let did_flush = flush_passive_effects(root);
    if did_flush && root.callback_node.get() != original {
        // the effects scheduled more urgent work, which replaced this task
        return None;
    }

    let lane = root.pending_lanes.get().highest_priority();
    if lane == Lanes::NO_LANE {
        return None;
    }
    let current_node = root.callback_node.get();
    let need_sync = lane == Lanes::SYNC || did_timeout;
    match render_root(root, lane, !need_sync) {
        RootExitStatus::Completed => {
            commit_finished_render(root, lane);
            None
        }
        RootExitStatus::Errored => {
            ensure_root_is_scheduled(root);
            None
        }
        RootExitStatus::Incomplete => {
            ensure_root_is_scheduled(root);
            let still_current = current_node.is_some() && root.callback_node.get() == current_node;
            still_current.then(|| concurrent_task(Rc::downgrade(root)))
        }
    }
}

fn commit_finished_render(root: &Rc<RootInner>, lane: Lane) {
    let finished = root
        .fibers
        .borrow()
        .alternate(root.current.get());
    root.finished_work.set(finished);
    root.finished_lane.set(lane);
    root.wip_render_lane.set(Lanes::NO_LANE);
    commit_root(root);
}

fn render_root(root: &Rc<RootInner>, lane: Lane, should_time_slice: bool) -> RootExitStatus {
    log::trace!("render of {lane:?} (time sliced: {should_time_slice})");
    if root.wip_render_lane.get() != lane || root.work_in_progress.get().is_none() {
        prepare_fresh_stack(root, lane);
    }

    let result = if should_time_slice {
        work_loop_concurrent(root, lane)
    } else {
        work_loop_sync(root, lane)
    };
    if let Err(error) = result {
        handle_render_error(root, lane, error);
        return RootExitStatus::Errored;
    }
    if root.work_in_progress.get().is_some() {
        return RootExitStatus::Incomplete;
    }
    RootExitStatus::Completed
}

fn prepare_fresh_stack(root: &RootInner, lane: Lane) {
    root.finished_work.set(None);
    root.finished_lane.set(Lanes::NO_LANE);
    // every update queued so far is visible to the fresh render
    root.interleaved_lanes.set(Lanes::NO_LANES);
    let mut fibers = root.fibers.borrow_mut();
    release_orphans(root, fibers.discard_fresh());
    let wip = fibers.create_work_in_progress(root.current.get(), FiberProps::Root);
    root.work_in_progress.set(Some(wip));
    root.wip_render_lane.set(lane);
}

fn handle_render_error(root: &RootInner, lane: Lane, error: RenderError) {
    log::error!("render of {lane:?} failed: {error}");
    root.work_in_progress.set(None);
    root.wip_render_lane.set(Lanes::NO_LANE);
    let orphaned = root.fibers.borrow_mut().discard_fresh();
    release_orphans(root, orphaned);
    root.mark_root_finished(lane);
    root.callback_node.set(None);
    root.callback_priority.set(Lanes::NO_LANE);
    *root.render_error.borrow_mut() = Some(error);
}

fn release_orphans(root: &RootInner, orphaned: Vec<NodeId>) {
    if orphaned.is_empty() {
        return;
    }
    log::trace!("releasing {} host nodes of a discarded render", orphaned.len());
    let mut host = root.host.borrow_mut();
    for instance in orphaned {
        host.release_instance(instance);
    }
}

fn work_loop_sync(root: &Rc<RootInner>, lane: Lane) -> Result<(), RenderError> {
    while let Some(fiber) = root.work_in_progress.get() {
        perform_unit_of_work(root, fiber, lane)?;
    }
    Ok(())
}

fn work_loop_concurrent(root: &Rc<RootInner>, lane: Lane) -> Result<(), RenderError> {
    let Some(runtime) = root.runtime().upgrade() else {
        return work_loop_sync(root, lane);
    };
    while let Some(fiber) = root.work_in_progress.get() {
        if runtime.scheduler().should_yield() {
            log::trace!("render of {lane:?} yielded");
            break;
        }
        perform_unit_of_work(root, fiber, lane)?;
    }
    Ok(())
}

fn perform_unit_of_work(root: &Rc<RootInner>, fiber: FiberId, lane: Lane) -> Result<(), RenderError> {
    let next = begin_work(root, fiber, lane)?;
    {
        let mut fibers = root.fibers.borrow_mut();
        let fiber = &mut fibers[fiber];
        fiber.memoized_props = Some(fiber.pending_props.clone());
    }
    match next {
        Some(child) => root.work_in_progress.set(Some(child)),
        None => complete_unit_of_work(root, fiber)?,
    }
    Ok(())
}

fn complete_unit_of_work(root: &RootInner, fiber: FiberId) -> Result<(), RenderError> {
    let mut node = Some(fiber);
    while let Some(id) = node {
        complete_work(root, id)?;
        let (sibling, parent) = {
            let fibers = root.fibers.borrow();
            (fibers[id].sibling, fibers[id].return_fiber)
        };
        if let Some(sibling) = sibling {
            root.work_in_progress.set(Some(sibling));
            return Ok(());
        }
        node = parent;
        root.work_in_progress.set(node);
    }
    Ok(())
}

/// Renders `wip` and reconciles its children. Returns the first child.
fn begin_work(root: &Rc<RootInner>, wip: FiberId, lane: Lane) -> Result<Option<FiberId>, RenderError> {
    let tag = root.fibers.borrow()[wip].tag;
    match tag {
        WorkTag::HostRoot => Ok(update_host_root(root, wip, lane)),
        WorkTag::HostComponent => {
            let mut fibers = root.fibers.borrow_mut();
            let children = fibers[wip]
                .pending_props
                .element()
                .map(|props| props.children().clone())
                .unwrap_or_default();
            mark_ref(&mut fibers, wip);
            Ok(reconcile_children(&mut fibers, wip, &children))
        }
        WorkTag::HostText => Ok(None),
        WorkTag::FunctionComponent => {
            let children = render_with_hooks(root, wip, lane)?;
            Ok(reconcile_children(&mut root.fibers.borrow_mut(), wip, &children))
        }
        WorkTag::Fragment => {
            let mut fibers = root.fibers.borrow_mut();
            let children = match &fibers[wip].pending_props {
                FiberProps::Fragment(children) => children.clone(),
                _ => Node::Empty,
            };
            Ok(reconcile_children(&mut fibers, wip, &children))
        }
    }
}

fn update_host_root(root: &RootInner, wip: FiberId, lane: Lane) -> Option<FiberId> {
    let pending = root.root_queue.borrow_mut().take_pending();
    let mut fibers = root.fibers.borrow_mut();
    let current = root.current.get();
    let mut committed = match mem::take(&mut fibers[current].memoized_state) {
        FiberState::Root(state) => state,
        _ => RootState::default(),
    };
    let processed = merge_and_process(
        committed.base_state.clone(),
        &mut committed.base_queue,
        pending,
        lane,
    );
    fibers[current].memoized_state = FiberState::Root(committed);

    let element = processed.memoized_state.clone();
    let fiber = &mut fibers[wip];
    fiber.memoized_state = FiberState::Root(RootState {
        element: processed.memoized_state,
        base_state: processed.base_state,
        base_queue: processed.base_queue,
    });
    fiber.lanes = processed.skipped_lanes;
    reconcile_children(&mut fibers, wip, &element)
}

/// Flags a host component whose ref was added, removed or replaced.
fn mark_ref(fibers: &mut FiberArena, wip: FiberId) {
    let changed = match fibers.alternate(wip) {
        None => fibers[wip].host_ref.is_some(),
        Some(current) => fibers[current].host_ref != fibers[wip].host_ref,
    };
    if changed {
        fibers[wip].flags |= Flags::REF;
    }
}

/// Calls the component with no arena borrow held, swapping the committed
/// hook list in and back out around the call.
fn render_with_hooks(root: &Rc<RootInner>, wip: FiberId, lane: Lane) -> Result<Node, RenderError> {
    let (component, props, current, current_hooks) = {
        let mut fibers = root.fibers.borrow_mut();
        let Some(ElementType::Component(component)) = fibers[wip].element_type.clone() else {
            return Err(RenderError::component("?", "function fiber without a component"));
        };
        let props = fibers[wip].pending_props.element().cloned().unwrap_or_default();
        let current = fibers.alternate(wip);
        let current_hooks: Vec<Hook> = match current {
            Some(current) => match mem::take(&mut fibers[current].memoized_state) {
                FiberState::Hooks(hooks) => hooks,
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        fibers[wip].lanes = Lanes::NO_LANES;
        (component, props, current, current_hooks)
    };

    let dispatcher = if current.is_some() {
        Dispatcher::Update
    } else {
        Dispatcher::Mount
    };
    let mut cx = RenderContext::new(
        dispatcher,
        wip,
        Rc::downgrade(root),
        root.runtime().clone(),
        lane,
        current_hooks,
    );
    log::trace!("rendering {}", component.name());
    let rendered = component.render(&mut cx, &props);
    let (current_hooks, hooks) = cx.finish();

    let mut fibers = root.fibers.borrow_mut();
    if let Some(current) = current.and_then(|id| fibers.get_mut(id)) {
        current.memoized_state = FiberState::Hooks(current_hooks);
    }
    let children = rendered?;
    let hooks = hooks.map_err(|error| {
        log::error!("{} broke the rules of hooks: {error}", component.name());
        error
    })?;
    let fiber = &mut fibers[wip];
    fiber.memoized_state = FiberState::Hooks(hooks.hooks);
    fiber.effects = hooks.effects;
    fiber.flags |= hooks.flags;
    fiber.lanes = hooks.skipped_lanes;
    Ok(children)
}

fn reconcile_children(fibers: &mut FiberArena, wip: FiberId, children: &Node) -> Option<FiberId> {
    let child = match fibers.alternate(wip) {
        Some(current) => {
            let current_first = fibers[current].child;
            reconcile_child_fibers(fibers, wip, current_first, children)
        }
        None => mount_child_fibers(fibers, wip, children),
    };
    fibers[wip].child = child;
    child
}

/// Creates or diffs the host instance of `wip` and bubbles its subtree state.
fn complete_work(root: &RootInner, wip: FiberId) -> Result<(), RenderError> {
    let mut fibers = root.fibers.borrow_mut();
    let current = fibers.alternate(wip);
    let tag = fibers[wip].tag;
    match tag {
        WorkTag::HostComponent => {
            let existing = current.and(fibers[wip].state_node);
            if let (Some(current), Some(_)) = (current, existing) {
                let unchanged = match (
                    fibers[current].memoized_props.as_ref().and_then(FiberProps::element),
                    fibers[wip].pending_props.element(),
                ) {
                    (Some(old), Some(new)) => old.same_attributes(new),
                    _ => false,
                };
                if !unchanged {
                    fibers[wip].flags |= Flags::UPDATE;
                }
            } else {
                let tag_name = match &fibers[wip].element_type {
                    Some(ElementType::Host(tag_name)) => Rc::clone(tag_name),
                    _ => return Err(RenderError::component("?", "host fiber without a tag")),
                };
                let props = fibers[wip].pending_props.element().cloned().unwrap_or_default();
                let mut host = root.host.borrow_mut();
                let instance = host.create_instance(&tag_name, &props);
                append_all_children(&fibers, &mut **host, instance, wip)?;
                fibers[wip].state_node = Some(instance);
            }
        }
        WorkTag::HostText => {
            let content = fibers[wip].pending_props.text().unwrap_or_default().to_owned();
            let existing = current.and(fibers[wip].state_node);
            if let (Some(current), Some(_)) = (current, existing) {
                let old = fibers[current].memoized_props.as_ref().and_then(FiberProps::text);
                if old != Some(content.as_str()) {
                    fibers[wip].flags |= Flags::UPDATE;
                }
            } else {
                let instance = root.host.borrow_mut().create_text_instance(&content);
                fibers[wip].state_node = Some(instance);
            }
        }
        WorkTag::HostRoot | WorkTag::FunctionComponent | WorkTag::Fragment => {}
    }
    bubble_properties(&mut fibers, wip);
    Ok(())
}

/// Appends the top-level host nodes below `wip` to a freshly created instance.
fn append_all_children(
    fibers: &FiberArena,
    host: &mut dyn HostConfig,
    parent: NodeId,
    wip: FiberId,
) -> Result<(), RenderError> {
    let mut node = fibers[wip].child;
    while let Some(id) = node {
        let fiber = &fibers[id];
        if fiber.is_host() {
            if let Some(child) = fiber.state_node {
                host.append_initial_child(parent, child)?;
            }
        } else if let Some(child) = fiber.child {
            node = Some(child);
            continue;
        }

        let mut cursor = id;
        node = loop {
            if let Some(sibling) = fibers[cursor].sibling {
                break Some(sibling);
            }
            match fibers[cursor].return_fiber {
                Some(parent_fiber) if parent_fiber != wip => cursor = parent_fiber,
                _ => break None,
            }
        };
    }
    Ok(())
}

fn bubble_properties(fibers: &mut FiberArena, wip: FiberId) {
    let mut subtree_flags = Flags::empty();
    let mut child_lanes = Lanes::NO_LANES;
    let mut child = fibers[wip].child;
    while let Some(id) = child {
        let fiber = &mut fibers[id];
        subtree_flags |= fiber.subtree_flags | fiber.flags;
        child_lanes |= fiber.lanes | fiber.child_lanes;
        fiber.return_fiber = Some(wip);
        child = fiber.sibling;
    }
    let fiber = &mut fibers[wip];
    fiber.subtree_flags |= subtree_flags;
    fiber.child_lanes = child_lanes;
}
