//! Child reconciliation: decides which existing child fibers are reused,
//! moved, created or deleted for a new child description.

use std::rc::Rc;

use crate::collections::OrderedMap;
use crate::element::{Element, ElementType, Key, Node};
use crate::fiber::{
    create_fiber_from_element, create_fiber_from_fragment, create_fiber_from_text,
    element_props, FiberArena, FiberId, FiberProps, Flags, WorkTag,
};

/// Lookup key of an existing child: its explicit key, else its position.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ChildKey {
    Explicit(Key),
    Index(usize),
}

/// Existing children by key, in sibling order. Consumed entries become
/// `None` so the leftovers are deleted in their original order.
type ExistingChildren = OrderedMap<ChildKey, Option<FiberId>>;

/// Diffs children with (`RECONCILE`) or without (`MOUNT`) effect tracking.
///
/// The untracked variant is used below a fiber that is itself being
/// inserted: its whole subtree is appended to the host in one piece during
/// the complete phase.
pub(crate) struct ChildReconciler {
    track_effects: bool,
}

pub(crate) const RECONCILE: ChildReconciler = ChildReconciler {
    track_effects: true,
};
pub(crate) const MOUNT: ChildReconciler = ChildReconciler {
    track_effects: false,
};

impl ChildReconciler {
    /// Reconciles `new_child` against the children starting at
    /// `current_first_child` and returns the first new child fiber.
    pub(crate) fn reconcile(
        &self,
        fibers: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        new_child: &Node,
    ) -> Option<FiberId> {
        let new_child = match new_child {
            Node::Element(element)
                if matches!(element.element_type(), ElementType::Fragment)
                    && element.get_key().is_none() =>
            {
                element.props().children()
            }
            other => other,
        };
        match new_child {
            Node::Element(element) => {
                let fiber = self.reconcile_single_element(
                    fibers,
                    return_fiber,
                    current_first_child,
                    element,
                );
                Some(self.place_single_child(fibers, fiber))
            }
            Node::Text(content) => {
                let fiber = self.reconcile_single_text(
                    fibers,
                    return_fiber,
                    current_first_child,
                    content,
                );
                Some(self.place_single_child(fibers, fiber))
            }
            Node::List(items) => {
                self.reconcile_children_array(fibers, return_fiber, current_first_child, items)
            }
            Node::Empty => {
                self.delete_remaining_children(fibers, return_fiber, current_first_child);
                None
            }
        }
    }

    fn delete_child(&self, fibers: &mut FiberArena, return_fiber: FiberId, child: FiberId) {
        if !self.track_effects {
            return;
        }
        let parent = &mut fibers[return_fiber];
        parent.deletions.push(child);
        parent.flags |= Flags::CHILD_DELETION;
    }

    fn delete_remaining_children(
        &self,
        fibers: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
    ) {
        if !self.track_effects {
            return;
        }
        let mut next = current_first_child;
        while let Some(child) = next {
            next = fibers[child].sibling;
            self.delete_child(fibers, return_fiber, child);
        }
    }

    fn reconcile_single_element(
        &self,
        fibers: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        let key = element.get_key();
        let mut current = current_first_child;
        while let Some(id) = current {
            let fiber = &fibers[id];
            if fiber.key.as_ref() != key {
                current = fiber.sibling;
                self.delete_child(fibers, return_fiber, id);
                continue;
            }
            if fiber.element_type.as_ref() == Some(element.element_type()) {
                let sibling = fiber.sibling;
                let existing = use_fiber(fibers, id, element_props(element));
                let wip = &mut fibers[existing];
                wip.return_fiber = Some(return_fiber);
                wip.host_ref = element.host_ref().cloned();
                self.delete_remaining_children(fibers, return_fiber, sibling);
                return existing;
            }
            // same key, different type: nothing after this can match
            self.delete_remaining_children(fibers, return_fiber, Some(id));
            break;
        }
        let fiber = fibers.create(create_fiber_from_element(element));
        fibers[fiber].return_fiber = Some(return_fiber);
        fiber
    }

    fn reconcile_single_text(
        &self,
        fibers: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        content: &Rc<str>,
    ) -> FiberId {
        let mut current = current_first_child;
        while let Some(id) = current {
            let fiber = &fibers[id];
            if fiber.tag == WorkTag::HostText {
                let sibling = fiber.sibling;
                let existing = use_fiber(fibers, id, FiberProps::Text(Rc::clone(content)));
                fibers[existing].return_fiber = Some(return_fiber);
                self.delete_remaining_children(fibers, return_fiber, sibling);
                return existing;
            }
            current = fiber.sibling;
            self.delete_child(fibers, return_fiber, id);
        }
        let fiber = fibers.create(create_fiber_from_text(Rc::clone(content)));
        fibers[fiber].return_fiber = Some(return_fiber);
        fiber
    }

    fn place_single_child(&self, fibers: &mut FiberArena, fiber: FiberId) -> FiberId {
        if self.track_effects && fibers.alternate(fiber).is_none() {
            fibers[fiber].flags |= Flags::PLACEMENT;
        }
        fiber
    }

    fn reconcile_children_array(
        &self,
        fibers: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        items: &[Node],
    ) -> Option<FiberId> {
        let mut existing = ExistingChildren::default();
        let mut current = current_first_child;
        while let Some(id) = current {
            let fiber = &fibers[id];
            let key = match &fiber.key {
                Some(key) => ChildKey::Explicit(key.clone()),
                None => ChildKey::Index(fiber.index),
            };
            current = fiber.sibling;
            if let Some(Some(shadowed)) = existing.insert(key.clone(), Some(id)) {
                if cfg!(debug_assertions) {
                    log::warn!("duplicate child key {key:?}; the earlier child is removed");
                }
                self.delete_child(fibers, return_fiber, shadowed);
            }
        }

        // old index of the right-most reused child so far
        let mut last_placed_index = 0;
        let mut first_new_fiber: Option<FiberId> = None;
        let mut last_new_fiber: Option<FiberId> = None;

        for (index, item) in items.iter().enumerate() {
            let Some(new_fiber) = self.update_from_map(fibers, &mut existing, index, item)
            else {
                continue;
            };
            {
                let fiber = &mut fibers[new_fiber];
                fiber.index = index;
                fiber.return_fiber = Some(return_fiber);
            }
            match last_new_fiber {
                Some(previous) => fibers[previous].sibling = Some(new_fiber),
                None => first_new_fiber = Some(new_fiber),
            }
            last_new_fiber = Some(new_fiber);

            if !self.track_effects {
                continue;
            }
            match fibers.alternate(new_fiber) {
                Some(current) => {
                    let old_index = fibers[current].index;
                    if old_index < last_placed_index {
                        fibers[new_fiber].flags |= Flags::PLACEMENT;
                    } else {
                        last_placed_index = old_index;
                    }
                }
                None => fibers[new_fiber].flags |= Flags::PLACEMENT,
            }
        }

        let leftovers: Vec<FiberId> = existing.into_values().flatten().collect();
        for child in leftovers {
            self.delete_child(fibers, return_fiber, child);
        }
        first_new_fiber
    }

    fn update_from_map(
        &self,
        fibers: &mut FiberArena,
        existing: &mut ExistingChildren,
        index: usize,
        item: &Node,
    ) -> Option<FiberId> {
        let key = match item {
            Node::Element(element) => element
                .get_key()
                .map_or(ChildKey::Index(index), |key| ChildKey::Explicit(key.clone())),
            _ => ChildKey::Index(index),
        };
        let before = existing.get(&key).copied().flatten();

        match item {
            Node::Text(content) => {
                let reusable = before.filter(|&id| fibers[id].tag == WorkTag::HostText);
                Some(match reusable {
                    Some(id) => {
                        consume(existing, &key);
                        use_fiber(fibers, id, FiberProps::Text(Rc::clone(content)))
                    }
                    None => fibers.create(create_fiber_from_text(Rc::clone(content))),
                })
            }
            Node::Element(element) => {
                let element_type = Some(element.element_type());
                let reusable =
                    before.filter(|&id| fibers[id].element_type.as_ref() == element_type);
                Some(match reusable {
                    Some(id) => {
                        consume(existing, &key);
                        let fiber = use_fiber(fibers, id, element_props(element));
                        fibers[fiber].host_ref = element.host_ref().cloned();
                        fiber
                    }
                    None => fibers.create(create_fiber_from_element(element)),
                })
            }
            Node::List(items) => {
                // a nested list reconciles as an unkeyed fragment
                let children = Node::List(Rc::clone(items));
                let reusable = before.filter(|&id| fibers[id].tag == WorkTag::Fragment);
                Some(match reusable {
                    Some(id) => {
                        consume(existing, &key);
                        use_fiber(fibers, id, FiberProps::Fragment(children))
                    }
                    None => fibers.create(create_fiber_from_fragment(children, None)),
                })
            }
            Node::Empty => None,
        }
    }
}

fn consume(existing: &mut ExistingChildren, key: &ChildKey) {
    if let Some(slot) = existing.get_mut(key) {
        *slot = None;
    }
}

/// Clones `current` into its work-in-progress version with new props.
fn use_fiber(fibers: &mut FiberArena, current: FiberId, pending_props: FiberProps) -> FiberId {
    let clone = fibers.create_work_in_progress(current, pending_props);
    let fiber = &mut fibers[clone];
    fiber.index = 0;
    fiber.sibling = None;
    clone
}

pub(crate) fn reconcile_child_fibers(
    fibers: &mut FiberArena,
    return_fiber: FiberId,
    current_first_child: Option<FiberId>,
    new_child: &Node,
) -> Option<FiberId> {
    RECONCILE.reconcile(fibers, return_fiber, current_first_child, new_child)
}

pub(crate) fn mount_child_fibers(
    fibers: &mut FiberArena,
    return_fiber: FiberId,
    new_child: &Node,
) -> Option<FiberId> {
    MOUNT.reconcile(fibers, return_fiber, None, new_child)
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
