//! Per-state update queues.
//!
//! Pending updates form a circular singly-linked list addressed through a
//! floating tail: `last.next` is the head, so appending is O(1) and two rings
//! can be spliced by swapping two `next` links. The nodes of a ring live in a
//! small arena owned by the ring and `next` links are indices into it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::fiber::{FiberArena, FiberId};
use crate::lanes::{Lane, Lanes};

/// A state transition: either a replacement value or a pure function of the
/// previous state.
pub enum Action<S> {
    Replace(S),
    Reduce(Rc<dyn Fn(&S) -> S>),
}

impl<S: Clone> Action<S> {
    pub fn reduce(f: impl Fn(&S) -> S + 'static) -> Self {
        Action::Reduce(Rc::new(f))
    }

    /// Applies the action on top of `previous`.
    pub fn apply(&self, previous: &S) -> S {
        match self {
            Action::Replace(value) => value.clone(),
            Action::Reduce(reducer) => reducer(previous),
        }
    }
}

impl<S: Clone> Clone for Action<S> {
    fn clone(&self) -> Self {
        match self {
            Action::Replace(value) => Action::Replace(value.clone()),
            Action::Reduce(reducer) => Action::Reduce(Rc::clone(reducer)),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Action<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Replace(value) => f.debug_tuple("Replace").field(value).finish(),
            Action::Reduce(_) => f.write_str("Reduce(..)"),
        }
    }
}

const UNLINKED: usize = usize::MAX;

/// One queued transition tagged with the lane it was requested at.
pub struct Update<S> {
    action: Action<S>,
    lane: Lane,
    next: usize,
}

impl<S> Update<S> {
    pub fn action(&self) -> &Action<S> {
        &self.action
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }
}

pub fn create_update<S>(action: Action<S>, lane: Lane) -> Update<S> {
    Update {
        action,
        lane,
        next: UNLINKED,
    }
}

/// A non-empty circular list of updates.
pub struct UpdateList<S> {
    nodes: Vec<Update<S>>,
    last: usize,
}

impl<S> UpdateList<S> {
    /// A ring holding a single update that links to itself.
    pub fn new(mut update: Update<S>) -> Self {
        update.next = 0;
        Self {
            nodes: vec![update],
            last: 0,
        }
    }

    /// Appends at the tail in O(1).
    pub fn push(&mut self, mut update: Update<S>) {
        let index = self.nodes.len();
        update.next = self.nodes[self.last].next;
        self.nodes.push(update);
        self.nodes[self.last].next = index;
        self.last = index;
    }

    /// Splices `pending` behind this ring.
    ///
    /// This ring's tail is linked to the head of `pending` and the tail of
    /// `pending` back to this ring's head; the tail of `pending` becomes the
    /// new tail. The nodes of `pending` move into this ring's arena.
    pub fn splice(&mut self, pending: UpdateList<S>) {
        let offset = self.nodes.len();
        let pending_last = pending.last + offset;
        self.nodes.extend(pending.nodes.into_iter().map(|mut update| {
            update.next += offset;
            update
        }));
        let base_first = self.nodes[self.last].next;
        let pending_first = self.nodes[pending_last].next;
        self.nodes[self.last].next = pending_first;
        self.nodes[pending_last].next = base_first;
        self.last = pending_last;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Union of the lanes of every queued update.
    pub fn lanes(&self) -> Lanes {
        self.iter()
            .fold(Lanes::NO_LANES, |lanes, update| lanes.merge(update.lane))
    }

    /// Walks the ring once, starting after the tail.
    pub fn iter(&self) -> UpdateIter<'_, S> {
        let head = self.nodes[self.last].next;
        UpdateIter {
            list: self,
            head,
            cursor: Some(head),
        }
    }
}

impl<S: Clone> Clone for UpdateList<S> {
    fn clone(&self) -> Self {
        Self {
            nodes: self
                .nodes
                .iter()
                .map(|update| Update {
                    action: update.action.clone(),
                    lane: update.lane,
                    next: update.next,
                })
                .collect(),
            last: self.last,
        }
    }
}

impl<S> fmt::Debug for UpdateList<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|update| update.lane))
            .finish()
    }
}

pub struct UpdateIter<'a, S> {
    list: &'a UpdateList<S>,
    head: usize,
    cursor: Option<usize>,
}

impl<'a, S> Iterator for UpdateIter<'a, S> {
    type Item = &'a Update<S>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let update = &self.list.nodes[index];
        self.cursor = (update.next != self.head).then_some(update.next);
        Some(update)
    }
}

/// The queue shared between a state owner and the dispatchers writing to it.
pub struct UpdateQueue<S> {
    pending: Option<UpdateList<S>>,
}

pub type SharedQueue<S> = Rc<RefCell<UpdateQueue<S>>>;

impl<S> UpdateQueue<S> {
    pub fn new() -> Self {
        Self { pending: None }
    }

    pub fn shared() -> SharedQueue<S> {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn enqueue(&mut self, update: Update<S>) {
        match self.pending.as_mut() {
            Some(pending) => pending.push(update),
            None => self.pending = Some(UpdateList::new(update)),
        }
    }

    pub fn take_pending(&mut self) -> Option<UpdateList<S>> {
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl<S> Default for UpdateQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Queues `update` and records `lane` on the fiber and its alternate, since
/// either may be the current tree by the time the update is processed.
pub fn enqueue_update<S>(
    queue: &mut UpdateQueue<S>,
    update: Update<S>,
    fibers: &mut FiberArena,
    fiber: FiberId,
    lane: Lane,
) {
    queue.enqueue(update);
    fibers.mark_lanes(fiber, lane);
}

/// Result of replaying a queue for one render lane.
#[derive(Debug)]
pub struct ProcessedQueue<S> {
    pub memoized_state: S,
    pub base_state: S,
    pub base_queue: Option<UpdateList<S>>,
    /// Lanes of the updates that did not qualify for this render.
    pub skipped_lanes: Lanes,
}

/// Replays `pending` on top of `base_state` for `render_lane`.
///
/// Updates outside `render_lane` are carried into the returned base queue
/// and freeze the base state at the value computed so far. Once something
/// has been skipped every later update is carried as well (at `NO_LANE`) so a
/// later replay from the frozen base state sees the same sequence.
pub fn process_update_queue<S: Clone>(
    base_state: S,
    pending: Option<&UpdateList<S>>,
    render_lane: Lane,
) -> ProcessedQueue<S> {
    let Some(pending) = pending else {
        return ProcessedQueue {
            memoized_state: base_state.clone(),
            base_state,
            base_queue: None,
            skipped_lanes: Lanes::NO_LANES,
        };
    };

    let mut new_state = base_state;
    let mut new_base_state: Option<S> = None;
    let mut new_base_queue: Option<UpdateList<S>> = None;
    let mut skipped_lanes = Lanes::NO_LANES;

    for update in pending.iter() {
        if !render_lane.includes(update.lane) {
            let clone = create_update(update.action.clone(), update.lane);
            match new_base_queue.as_mut() {
                Some(queue) => queue.push(clone),
                None => {
                    new_base_state = Some(new_state.clone());
                    new_base_queue = Some(UpdateList::new(clone));
                }
            }
            skipped_lanes |= update.lane;
            continue;
        }
        if let Some(queue) = new_base_queue.as_mut() {
            queue.push(create_update(update.action.clone(), Lanes::NO_LANE));
        }
        new_state = update.action.apply(&new_state);
    }

    let base_state = new_base_state.unwrap_or_else(|| new_state.clone());
    ProcessedQueue {
        memoized_state: new_state,
        base_state,
        base_queue: new_base_queue,
        skipped_lanes,
    }
}

/// Folds newly pending updates into `base_queue` and replays the merged ring.
///
/// The merged ring is written back into `base_queue` before processing so
/// that the owner of the committed state keeps every update even if this
/// render is thrown away.
pub fn merge_and_process<S: Clone>(
    base_state: S,
    base_queue: &mut Option<UpdateList<S>>,
    pending: Option<UpdateList<S>>,
    render_lane: Lane,
) -> ProcessedQueue<S> {
    if let Some(pending) = pending {
        match base_queue.as_mut() {
            Some(base) => base.splice(pending),
            None => *base_queue = Some(pending),
        }
    }
    process_update_queue(base_state, base_queue.as_ref(), render_lane)
}

#[cfg(test)]
#[path = "tests/update_queue_tests.rs"]
mod tests;
