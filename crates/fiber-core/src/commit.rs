//! Commit phase: applies a finished tree's host mutations, swaps it in as
//! the current tree, then runs refs and effects.
//!
//! Arena and host borrows are released before any user callback runs, so
//! effects and cleanups may dispatch updates freely.

use std::mem;
use std::rc::{Rc, Weak};

use crate::element::HostRef;
use crate::fiber::{EffectTag, FiberArena, FiberId, FiberProps, Flags, WorkTag};
use crate::hooks::Effect;
use crate::host::{HostConfig, NodeId};
use crate::lanes::Lanes;
use crate::platform::{SchedulerPriority, Task};
use crate::runtime::RootInner;
use crate::work_loop::ensure_root_is_scheduled;

/// Passive effect lists collected by commits, run by the next flush.
#[derive(Default)]
pub(crate) struct PendingPassiveEffects {
    /// Effect lists of deleted components.
    pub unmount: Vec<Vec<Rc<Effect>>>,
    /// Effect lists of components flagged with a passive effect.
    pub update: Vec<Vec<Rc<Effect>>>,
}

/// Callbacks collected by the mutation and layout walks.
#[derive(Default)]
struct CommitCallbacks {
    layout_destroys: Vec<Rc<Effect>>,
    layout_creates: Vec<Rc<Effect>>,
}

pub(crate) fn commit_root(root: &Rc<RootInner>) {
    let Some(finished_work) = root.finished_work.take() else {
        return;
    };
    let lane = root.finished_lane.replace(Lanes::NO_LANE);
    if lane == Lanes::NO_LANE {
        log::warn!("committing a finished tree without a lane");
    }
    log::trace!("commit of {lane:?}");
    root.callback_node.set(None);
    root.callback_priority.set(Lanes::NO_LANE);
    root.mark_root_finished(lane);

    let flags = {
        let mut fibers = root.fibers.borrow_mut();
        fibers.commit_fresh();
        let fiber = &fibers[finished_work];
        fiber.flags | fiber.subtree_flags
    };

    if flags.intersects(Flags::PASSIVE_MASK) && !root.passive_flush_scheduled.replace(true) {
        schedule_passive_flush(root);
    }

    let mut callbacks = CommitCallbacks::default();
    if flags.intersects(Flags::MUTATION_MASK | Flags::PASSIVE_MASK) {
        commit_mutation_effects(root, finished_work, &mut callbacks);
    }
    for effect in mem::take(&mut callbacks.layout_destroys) {
        effect.run_destroy();
    }

    root.current.set(finished_work);

    if flags.intersects(Flags::LAYOUT_MASK) {
        commit_layout_effects(root, finished_work, &mut callbacks);
    }
    for effect in callbacks.layout_creates {
        effect.run_create();
    }

    ensure_root_is_scheduled(root);
}

fn schedule_passive_flush(root: &Rc<RootInner>) {
    let Some(runtime) = root.runtime().upgrade() else {
        return;
    };
    let weak: Weak<RootInner> = Rc::downgrade(root);
    runtime.scheduler().schedule_callback(
        SchedulerPriority::Normal,
        Task::once(move || {
            if let Some(root) = weak.upgrade() {
                flush_passive_effects(&root);
            }
        }),
    );
}

/// Runs every pending passive cleanup, then every pending passive create,
/// then flushes the sync queue. Returns whether any effect list was pending.
pub(crate) fn flush_passive_effects(root: &Rc<RootInner>) -> bool {
    root.passive_flush_scheduled.set(false);
    let PendingPassiveEffects { unmount, update } =
        mem::take(&mut *root.pending_passive_effects.borrow_mut());
    let did_flush = !unmount.is_empty() || !update.is_empty();

    for effect in unmount.iter().flatten() {
        if effect.matches(EffectTag::PASSIVE) {
            effect.clear_has_effect();
            effect.run_destroy();
        }
    }
    let firing = EffectTag::PASSIVE | EffectTag::HAS_EFFECT;
    for effect in update.iter().flatten() {
        if effect.matches(firing) {
            effect.run_destroy();
        }
    }
    for effect in update.iter().flatten() {
        if effect.matches(firing) {
            effect.run_create();
        }
    }

    if let Some(runtime) = root.runtime().upgrade() {
        runtime.flush_sync_callbacks();
    }
    did_flush
}

/// Children-first walk over the fibers whose subtree carries `mask`.
fn post_order(fibers: &FiberArena, start: FiberId, mask: Flags) -> Vec<FiberId> {
    let mut order = Vec::new();
    let mut next = Some(start);
    while let Some(id) = next {
        let fiber = &fibers[id];
        if fiber.subtree_flags.intersects(mask) {
            if let Some(child) = fiber.child {
                next = Some(child);
                continue;
            }
        }
        let mut node = id;
        next = loop {
            order.push(node);
            if node == start {
                break None;
            }
            if let Some(sibling) = fibers[node].sibling {
                break Some(sibling);
            }
            match fibers[node].return_fiber {
                Some(parent) => node = parent,
                None => break None,
            }
        };
    }
    order
}

fn commit_mutation_effects(root: &RootInner, finished_work: FiberId, callbacks: &mut CommitCallbacks) {
    let mut fibers = root.fibers.borrow_mut();
    let mut host = root.host.borrow_mut();
    let order = post_order(&fibers, finished_work, Flags::MUTATION_MASK | Flags::PASSIVE_MASK);
    for id in order {
        let flags = fibers[id].flags;
        if flags.contains(Flags::PLACEMENT) {
            commit_placement(root, &fibers, &mut **host, id);
            fibers[id].flags.remove(Flags::PLACEMENT);
        }
        if flags.contains(Flags::UPDATE) {
            commit_update(&fibers, &mut **host, id);
            fibers[id].flags.remove(Flags::UPDATE);
        }
        if flags.contains(Flags::CHILD_DELETION) {
            let deletions = mem::take(&mut fibers[id].deletions);
            for child in deletions {
                commit_deletion(root, &mut fibers, &mut **host, child, callbacks);
            }
        }
        if flags.contains(Flags::PASSIVE_EFFECT) {
            let effects = fibers[id].effects.clone();
            root.pending_passive_effects.borrow_mut().update.push(effects);
        }
        if flags.contains(Flags::REF) {
            if let Some(current) = fibers.alternate(id) {
                detach_ref(fibers[current].host_ref.as_ref());
            }
        }
        if flags.contains(Flags::LAYOUT_EFFECT) {
            let firing = EffectTag::LAYOUT | EffectTag::HAS_EFFECT;
            callbacks.layout_destroys.extend(
                fibers[id]
                    .effects
                    .iter()
                    .filter(|effect| effect.matches(firing))
                    .cloned(),
            );
        }
    }
}

fn commit_layout_effects(root: &RootInner, finished_work: FiberId, callbacks: &mut CommitCallbacks) {
    let fibers = root.fibers.borrow();
    let firing = EffectTag::LAYOUT | EffectTag::HAS_EFFECT;
    for id in post_order(&fibers, finished_work, Flags::LAYOUT_MASK) {
        let fiber = &fibers[id];
        if fiber.flags.contains(Flags::REF) && fiber.tag == WorkTag::HostComponent {
            if let Some(host_ref) = &fiber.host_ref {
                host_ref.set(fiber.state_node);
            }
        }
        if fiber.flags.contains(Flags::LAYOUT_EFFECT) {
            callbacks.layout_creates.extend(
                fiber
                    .effects
                    .iter()
                    .filter(|effect| effect.matches(firing))
                    .cloned(),
            );
        }
    }
}

fn detach_ref(host_ref: Option<&HostRef>) {
    if let Some(host_ref) = host_ref {
        host_ref.set(None);
    }
}

/// The host node `id` is placed into: the nearest host component ancestor or
/// the root container.
fn host_parent(root: &RootInner, fibers: &FiberArena, id: FiberId) -> Option<NodeId> {
    let mut parent = fibers[id].return_fiber;
    while let Some(fiber_id) = parent {
        let fiber = &fibers[fiber_id];
        match fiber.tag {
            WorkTag::HostComponent => return fiber.state_node,
            WorkTag::HostRoot => return Some(root.container()),
            _ => parent = fiber.return_fiber,
        }
    }
    None
}

/// The first host node after `id` among its host siblings that is already
/// attached, used as the insertion anchor.
fn host_sibling(fibers: &FiberArena, id: FiberId) -> Option<NodeId> {
    let mut node = id;
    'siblings: loop {
        while fibers[node].sibling.is_none() {
            let parent = fibers[node].return_fiber?;
            if matches!(fibers[parent].tag, WorkTag::HostComponent | WorkTag::HostRoot) {
                return None;
            }
            node = parent;
        }
        node = fibers[node].sibling?;
        while !fibers[node].is_host() {
            if fibers[node].flags.contains(Flags::PLACEMENT) {
                continue 'siblings;
            }
            match fibers[node].child {
                Some(child) => node = child,
                None => continue 'siblings,
            }
        }
        if !fibers[node].flags.contains(Flags::PLACEMENT) {
            return fibers[node].state_node;
        }
    }
}

fn commit_placement(root: &RootInner, fibers: &FiberArena, host: &mut dyn HostConfig, id: FiberId) {
    let Some(parent) = host_parent(root, fibers, id) else {
        log::error!("placement of {id:?} without a host parent");
        return;
    };
    let before = host_sibling(fibers, id);
    for node in top_level_host_nodes(fibers, id) {
        let result = match before {
            Some(before) => host.insert_child_to_container(parent, node, before),
            None => host.append_child_to_container(parent, node),
        };
        if let Err(error) = result {
            log::error!("placing node {node} failed: {error}");
        }
    }
}

/// Host nodes of `id` itself or, for a non-host fiber, of its nearest host
/// descendants, in order.
fn top_level_host_nodes(fibers: &FiberArena, id: FiberId) -> Vec<NodeId> {
    let mut nodes = Vec::new();
    let mut stack = vec![id];
    while let Some(next) = stack.pop() {
        let fiber = &fibers[next];
        if fiber.is_host() {
            nodes.extend(fiber.state_node);
            continue;
        }
        let children: Vec<FiberId> = fibers.children(next).collect();
        stack.extend(children.into_iter().rev());
    }
    nodes
}

fn commit_update(fibers: &FiberArena, host: &mut dyn HostConfig, id: FiberId) {
    let fiber = &fibers[id];
    let Some(instance) = fiber.state_node else {
        return;
    };
    let old_props = fibers
        .alternate(id)
        .and_then(|current| fibers[current].memoized_props.clone());
    let result = match (fiber.tag, &fiber.memoized_props) {
        (WorkTag::HostText, Some(FiberProps::Text(content))) => {
            host.commit_text_update(instance, content)
        }
        (WorkTag::HostComponent, Some(FiberProps::Element(new_props))) => {
            let old_props = match old_props {
                Some(FiberProps::Element(props)) => props,
                _ => Default::default(),
            };
            host.commit_update(instance, &old_props, new_props)
        }
        _ => Ok(()),
    };
    if let Err(error) = result {
        log::error!("updating node {instance} failed: {error}");
    }
}

/// Unmounts the subtree of the committed fiber `child`: detaches refs,
/// queues its effect cleanups, removes its host nodes and frees its fibers.
fn commit_deletion(
    root: &RootInner,
    fibers: &mut FiberArena,
    host: &mut dyn HostConfig,
    child: FiberId,
    callbacks: &mut CommitCallbacks,
) {
    let mut stack = vec![child];
    while let Some(next) = stack.pop() {
        let Some(fiber) = fibers.get(next) else {
            continue;
        };
        match fiber.tag {
            WorkTag::HostComponent => detach_ref(fiber.host_ref.as_ref()),
            WorkTag::FunctionComponent if !fiber.effects.is_empty() => {
                callbacks.layout_destroys.extend(
                    fiber
                        .effects
                        .iter()
                        .filter(|effect| effect.matches(EffectTag::LAYOUT))
                        .cloned(),
                );
                root.pending_passive_effects
                    .borrow_mut()
                    .unmount
                    .push(fiber.effects.clone());
            }
            _ => {}
        }
        stack.extend(fibers.children(next));
    }

    if let Some(parent) = host_parent(root, fibers, child) {
        for node in top_level_host_nodes(fibers, child) {
            if let Err(error) = host.remove_child(parent, node) {
                log::error!("removing node {node} failed: {error}");
            }
        }
    } else {
        log::error!("deletion of {child:?} without a host parent");
    }
    fibers.free_subtree(child);
}
