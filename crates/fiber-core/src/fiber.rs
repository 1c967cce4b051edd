//! Fiber records and the double-buffered arena that owns them.
//!
//! Every logical element instance owns one arena entry with two slots. A
//! [`FiberId`] names one slot; the other slot is its alternate. Cloning a
//! fiber into its alternate slot and later pointing the root at it is the
//! whole current/work-in-progress swap, so `alternate(alternate(f)) == f`
//! holds by construction and no instance ever has more than two versions.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use bitflags::bitflags;
use slotmap::{new_key_type, SlotMap};

use crate::element::{Element, ElementType, HostRef, Key, Node, Props};
use crate::hooks::{Effect, Hook};
use crate::lanes::{Lane, Lanes};
use crate::update_queue::UpdateList;
use crate::NodeId;

new_key_type! {
    /// Identity of one logical element instance across both tree versions.
    pub struct InstanceId;
}

/// One tree version of an element instance.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FiberId {
    instance: InstanceId,
    slot: u8,
}

impl FiberId {
    pub fn instance(self) -> InstanceId {
        self.instance
    }

    /// The id of the other slot of the same instance. The slot may be empty.
    pub(crate) fn other_slot(self) -> FiberId {
        FiberId {
            instance: self.instance,
            slot: 1 - self.slot,
        }
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({:?}/{})", self.instance, self.slot)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WorkTag {
    FunctionComponent,
    HostRoot,
    HostComponent,
    HostText,
    Fragment,
}

bitflags! {
    /// Side effects a fiber requests from the commit phase.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u32 {
        const PLACEMENT = 1 << 1;
        const UPDATE = 1 << 2;
        const PASSIVE_EFFECT = 1 << 3;
        const CHILD_DELETION = 1 << 4;
        const REF = 1 << 5;
        const LAYOUT_EFFECT = 1 << 6;

        const MUTATION_MASK = Self::PLACEMENT.bits()
            | Self::UPDATE.bits()
            | Self::CHILD_DELETION.bits()
            | Self::REF.bits()
            | Self::LAYOUT_EFFECT.bits();
        const PASSIVE_MASK = Self::PASSIVE_EFFECT.bits() | Self::CHILD_DELETION.bits();
        const LAYOUT_MASK = Self::REF.bits() | Self::LAYOUT_EFFECT.bits();
    }
}

bitflags! {
    /// Kind of an effect record plus whether it must fire this commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EffectTag: u8 {
        const HAS_EFFECT = 1 << 0;
        const LAYOUT = 1 << 1;
        const PASSIVE = 1 << 2;
    }
}

/// Props a fiber is (re)rendered with.
#[derive(Clone, Debug)]
pub enum FiberProps {
    Root,
    Element(Props),
    Text(Rc<str>),
    Fragment(Node),
}

impl FiberProps {
    pub fn element(&self) -> Option<&Props> {
        match self {
            FiberProps::Element(props) => Some(props),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            FiberProps::Text(content) => Some(content),
            _ => None,
        }
    }
}

/// Root element state, driven by the container's update queue.
#[derive(Clone, Debug, Default)]
pub(crate) struct RootState {
    pub element: Node,
    pub base_state: Node,
    pub base_queue: Option<UpdateList<Node>>,
}

#[derive(Default)]
pub(crate) enum FiberState {
    #[default]
    None,
    Root(RootState),
    Hooks(Vec<Hook>),
}

impl FiberState {
    /// Copy carried into a work-in-progress clone. Hook lists are rebuilt by
    /// the next render, so they are not duplicated.
    fn carry(&self) -> FiberState {
        match self {
            FiberState::Root(state) => FiberState::Root(state.clone()),
            FiberState::None | FiberState::Hooks(_) => FiberState::None,
        }
    }
}

pub struct Fiber {
    pub(crate) tag: WorkTag,
    pub(crate) key: Option<Key>,
    pub(crate) element_type: Option<ElementType>,
    pub(crate) pending_props: FiberProps,
    pub(crate) memoized_props: Option<FiberProps>,
    pub(crate) state_node: Option<NodeId>,
    pub(crate) memoized_state: FiberState,
    pub(crate) effects: Vec<Rc<Effect>>,
    pub(crate) host_ref: Option<HostRef>,

    pub(crate) return_fiber: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) index: usize,

    pub(crate) flags: Flags,
    pub(crate) subtree_flags: Flags,
    pub(crate) deletions: Vec<FiberId>,

    pub(crate) lanes: Lanes,
    pub(crate) child_lanes: Lanes,
}

impl Fiber {
    pub(crate) fn new(tag: WorkTag, pending_props: FiberProps, key: Option<Key>) -> Self {
        Self {
            tag,
            key,
            element_type: None,
            pending_props,
            memoized_props: None,
            state_node: None,
            memoized_state: FiberState::None,
            effects: Vec::new(),
            host_ref: None,
            return_fiber: None,
            child: None,
            sibling: None,
            index: 0,
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            deletions: Vec::new(),
            lanes: Lanes::NO_LANES,
            child_lanes: Lanes::NO_LANES,
        }
    }

    pub fn tag(&self) -> WorkTag {
        self.tag
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn subtree_flags(&self) -> Flags {
        self.subtree_flags
    }

    pub fn lanes(&self) -> Lanes {
        self.lanes
    }

    pub fn child_lanes(&self) -> Lanes {
        self.child_lanes
    }

    pub fn state_node(&self) -> Option<NodeId> {
        self.state_node
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_host(&self) -> bool {
        matches!(self.tag, WorkTag::HostComponent | WorkTag::HostText)
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("tag", &self.tag)
            .field("key", &self.key)
            .field("index", &self.index)
            .field("flags", &self.flags)
            .field("subtree_flags", &self.subtree_flags)
            .field("lanes", &self.lanes)
            .field("state_node", &self.state_node)
            .finish_non_exhaustive()
    }
}

/// Pending props for a fiber rendering `element`.
pub(crate) fn element_props(element: &Element) -> FiberProps {
    match element.element_type() {
        ElementType::Fragment => FiberProps::Fragment(element.props().children().clone()),
        ElementType::Host(_) | ElementType::Component(_) => {
            FiberProps::Element(element.props().clone())
        }
    }
}

pub(crate) fn create_fiber_from_element(element: &Element) -> Fiber {
    let tag = match element.element_type() {
        ElementType::Host(_) => WorkTag::HostComponent,
        ElementType::Component(_) => WorkTag::FunctionComponent,
        ElementType::Fragment => WorkTag::Fragment,
    };
    let mut fiber = Fiber::new(tag, element_props(element), element.get_key().cloned());
    fiber.element_type = Some(element.element_type().clone());
    fiber.host_ref = element.host_ref().cloned();
    fiber
}

pub(crate) fn create_fiber_from_fragment(children: Node, key: Option<Key>) -> Fiber {
    let mut fiber = Fiber::new(WorkTag::Fragment, FiberProps::Fragment(children), key);
    fiber.element_type = Some(ElementType::Fragment);
    fiber
}

pub(crate) fn create_fiber_from_text(content: Rc<str>) -> Fiber {
    Fiber::new(WorkTag::HostText, FiberProps::Text(content), None)
}

struct Instance {
    slots: [Option<Fiber>; 2],
}

/// Owner of every fiber of one root.
#[derive(Default)]
pub struct FiberArena {
    instances: SlotMap<InstanceId, Instance>,
    // instances created by the render in progress
    fresh: Vec<InstanceId>,
}

impl FiberArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a long-lived fiber that no render owns.
    pub(crate) fn insert(&mut self, fiber: Fiber) -> FiberId {
        let instance = self.instances.insert(Instance {
            slots: [Some(fiber), None],
        });
        FiberId { instance, slot: 0 }
    }

    /// Inserts a fiber created by the render in progress.
    pub(crate) fn create(&mut self, fiber: Fiber) -> FiberId {
        let id = self.insert(fiber);
        self.fresh.push(id.instance);
        id
    }

    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.instances.get(id.instance)?.slots[usize::from(id.slot)].as_ref()
    }

    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.instances.get_mut(id.instance)?.slots[usize::from(id.slot)].as_mut()
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn alternate(&self, id: FiberId) -> Option<FiberId> {
        let other = id.other_slot();
        self.get(other).map(|_| other)
    }

    /// Records `lane` on the fiber and, when present, on its alternate.
    pub(crate) fn mark_lanes(&mut self, id: FiberId, lane: Lane) {
        if let Some(fiber) = self.get_mut(id) {
            fiber.lanes |= lane;
        }
        if let Some(alternate) = self.get_mut(id.other_slot()) {
            alternate.lanes |= lane;
        }
    }

    /// Walks the return path from `id`, adding `lane` to every ancestor's
    /// child lanes (in both slots). Returns the host root reached, or `None`
    /// when the path ends anywhere else.
    pub(crate) fn mark_update_lane_to_root(
        &mut self,
        id: FiberId,
        lane: Lane,
    ) -> Option<FiberId> {
        self.get(id)?;
        let mut node = id;
        while let Some(parent) = self.get(node).and_then(|fiber| fiber.return_fiber) {
            let fiber = self.get_mut(parent)?;
            fiber.child_lanes |= lane;
            if let Some(alternate) = self.get_mut(parent.other_slot()) {
                alternate.child_lanes |= lane;
            }
            node = parent;
        }
        (self.get(node)?.tag == WorkTag::HostRoot).then_some(node)
    }

    /// Returns the alternate of `current` prepared for a new render.
    ///
    /// A recycled alternate is cleared of flags and deletions. Child pointer,
    /// memoized props, root state, ref and lanes are copied from `current`.
    pub(crate) fn create_work_in_progress(
        &mut self,
        current: FiberId,
        pending_props: FiberProps,
    ) -> FiberId {
        let wip = current.other_slot();
        let carried_state = self[current].memoized_state.carry();
        let recycled = self.instances[current.instance].slots[usize::from(wip.slot)].take();
        let mut next = match recycled {
            Some(mut fiber) => {
                fiber.pending_props = pending_props;
                fiber.flags = Flags::empty();
                fiber.subtree_flags = Flags::empty();
                fiber.deletions.clear();
                fiber
            }
            None => {
                let source = &self[current];
                let mut fiber = Fiber::new(source.tag, pending_props, source.key.clone());
                fiber.state_node = source.state_node;
                fiber
            }
        };
        let source = &self[current];
        next.element_type = source.element_type.clone();
        next.effects = source.effects.clone();
        next.child = source.child;
        next.memoized_props = source.memoized_props.clone();
        next.memoized_state = carried_state;
        next.host_ref = source.host_ref.clone();
        next.lanes = source.lanes;
        next.child_lanes = source.child_lanes;
        self.instances[current.instance].slots[usize::from(wip.slot)] = Some(next);
        wip
    }

    /// Iterates the child chain of `id`.
    pub fn children(&self, id: FiberId) -> Children<'_> {
        Children {
            arena: self,
            next: self.get(id).and_then(|fiber| fiber.child),
        }
    }

    /// Frees every instance created since the last commit. Returns the host
    /// nodes those fibers had created, which nothing else references.
    pub(crate) fn discard_fresh(&mut self) -> Vec<NodeId> {
        let mut orphaned = Vec::new();
        for instance in self.fresh.drain(..) {
            let Some(instance) = self.instances.remove(instance) else {
                continue;
            };
            orphaned.extend(
                instance
                    .slots
                    .into_iter()
                    .flatten()
                    .filter(Fiber::is_host)
                    .filter_map(|fiber| fiber.state_node),
            );
        }
        orphaned
    }

    /// Keeps the instances created by the render being committed.
    pub(crate) fn commit_fresh(&mut self) {
        self.fresh.clear();
    }

    /// Frees the instances of `id` and all of its descendants.
    pub(crate) fn free_subtree(&mut self, id: FiberId) {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !self.contains(next) {
                continue;
            }
            stack.extend(self.children(next));
            self.instances.remove(next.instance);
        }
    }
}

impl Index<FiberId> for FiberArena {
    type Output = Fiber;

    fn index(&self, id: FiberId) -> &Fiber {
        match self.get(id) {
            Some(fiber) => fiber,
            None => panic!("stale fiber id {id:?}"),
        }
    }
}

impl IndexMut<FiberId> for FiberArena {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber {
        match self.get_mut(id) {
            Some(fiber) => fiber,
            None => panic!("stale fiber id {id:?}"),
        }
    }
}

pub struct Children<'a> {
    arena: &'a FiberArena,
    next: Option<FiberId>,
}

impl Iterator for Children<'_> {
    type Item = FiberId;

    fn next(&mut self) -> Option<FiberId> {
        let id = self.next?;
        self.next = self.arena.get(id).and_then(|fiber| fiber.sibling);
        Some(id)
    }
}

#[cfg(test)]
#[path = "tests/fiber_tests.rs"]
mod tests;
