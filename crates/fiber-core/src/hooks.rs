//! Hook state stored on function component fibers.
//!
//! A component's hooks are identified purely by call order. On mount each
//! hook call appends a new record; on update the record at the same index of
//! the committed fiber is read and a fresh record is appended to the
//! work-in-progress list, so the committed list survives a discarded render.

use std::any::{type_name, Any};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::element::RefObject;
use crate::error::HookError;
use crate::fiber::{EffectTag, FiberId, Flags};
use crate::lanes::{Lane, Lanes};
use crate::runtime::{RootInner, RuntimeHandle};
use crate::update_queue::{
    create_update, enqueue_update, merge_and_process, Action, SharedQueue, UpdateList,
    UpdateQueue,
};
use crate::work_loop::schedule_update_on_fiber;

/// Cleanup returned by an effect's create callback.
pub type Destroy = Box<dyn FnOnce()>;

type Create = Box<dyn FnOnce() -> Option<Destroy>>;

/// Dependencies that never compare equal: the effect fires after every commit.
pub const NO_DEPS: Option<()> = None;

/// Whether hooks are being created or replayed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Dispatcher {
    Mount,
    Update,
}

/// One effect record. Successive renders of the same effect hook share the
/// `destroy` slot, so a cleanup produced by one commit is run by the next.
pub struct Effect {
    tag: Cell<EffectTag>,
    create: RefCell<Option<Create>>,
    destroy: Rc<RefCell<Option<Destroy>>>,
    deps: Option<Rc<dyn Any>>,
}

impl Effect {
    pub fn tag(&self) -> EffectTag {
        self.tag.get()
    }

    pub(crate) fn matches(&self, mask: EffectTag) -> bool {
        self.tag.get().contains(mask)
    }

    pub(crate) fn clear_has_effect(&self) {
        self.tag.set(self.tag.get() - EffectTag::HAS_EFFECT);
    }

    pub(crate) fn run_destroy(&self) {
        let destroy = self.destroy.borrow_mut().take();
        if let Some(destroy) = destroy {
            destroy();
        }
    }

    pub(crate) fn run_create(&self) {
        let create = self.create.borrow_mut().take();
        if let Some(create) = create {
            let destroy = create();
            *self.destroy.borrow_mut() = destroy;
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("tag", &self.tag.get())
            .field("has_destroy", &self.destroy.borrow().is_some())
            .finish_non_exhaustive()
    }
}

struct StateHook<S> {
    memoized_state: S,
    base_state: S,
    base_queue: Option<UpdateList<S>>,
    queue: SharedQueue<S>,
    dispatch: Dispatch<S>,
}

pub(crate) enum Hook {
    State(Box<dyn Any>),
    Effect(Rc<Effect>),
    Ref(Rc<dyn Any>),
    Transition(StartTransition),
}

impl Hook {
    fn kind(&self) -> &'static str {
        match self {
            Hook::State(_) => "state",
            Hook::Effect(effect) if effect.matches(EffectTag::LAYOUT) => "layout effect",
            Hook::Effect(_) => "effect",
            Hook::Ref(_) => "ref",
            Hook::Transition(_) => "transition",
        }
    }
}

/// Hook records and effects produced by one successful render.
pub(crate) struct RenderedHooks {
    pub hooks: Vec<Hook>,
    pub effects: Vec<Rc<Effect>>,
    pub flags: Flags,
    pub skipped_lanes: Lanes,
}

/// Handle passed to a component's render function; every hook is a method.
pub struct RenderContext {
    dispatcher: Dispatcher,
    fiber: FiberId,
    root: Weak<RootInner>,
    runtime: RuntimeHandle,
    render_lane: Lane,
    current_hooks: Vec<Hook>,
    hooks: Vec<Hook>,
    effects: Vec<Rc<Effect>>,
    flags: Flags,
    skipped_lanes: Lanes,
    failure: Option<HookError>,
}

impl RenderContext {
    pub(crate) fn new(
        dispatcher: Dispatcher,
        fiber: FiberId,
        root: Weak<RootInner>,
        runtime: RuntimeHandle,
        render_lane: Lane,
        current_hooks: Vec<Hook>,
    ) -> Self {
        Self {
            dispatcher,
            fiber,
            root,
            runtime,
            render_lane,
            current_hooks,
            hooks: Vec::new(),
            effects: Vec::new(),
            flags: Flags::empty(),
            skipped_lanes: Lanes::NO_LANES,
            failure: None,
        }
    }

    /// Lane of the render pass this component is rendered in.
    pub fn render_lane(&self) -> Lane {
        self.render_lane
    }

    /// Hands the committed hook list back together with the render result.
    ///
    /// A hook error is reported even if the component swallowed it.
    pub(crate) fn finish(self) -> (Vec<Hook>, Result<RenderedHooks, HookError>) {
        let result = match self.failure {
            Some(error) => Err(error),
            None if self.dispatcher == Dispatcher::Update
                && self.hooks.len() < self.current_hooks.len() =>
            {
                Err(HookError::FewerHooksThanPreviousRender {
                    rendered: self.hooks.len(),
                    expected: self.current_hooks.len(),
                })
            }
            None => Ok(RenderedHooks {
                hooks: self.hooks,
                effects: self.effects,
                flags: self.flags,
                skipped_lanes: self.skipped_lanes,
            }),
        };
        (self.current_hooks, result)
    }

    fn fail<T>(&mut self, error: HookError) -> Result<T, HookError> {
        if self.failure.is_none() {
            self.failure = Some(error.clone());
        }
        Err(error)
    }

    /// The committed hook at the position of the next call.
    fn current_hook(&mut self) -> Result<&mut Hook, HookError> {
        let index = self.hooks.len();
        if index >= self.current_hooks.len() {
            return self.fail(HookError::MoreHooksThanPreviousRender { index });
        }
        Ok(&mut self.current_hooks[index])
    }

    fn kind_mismatch<T>(&mut self, expected: &'static str, found: &'static str) -> Result<T, HookError> {
        let index = self.hooks.len();
        self.fail(HookError::KindMismatch {
            index,
            expected,
            found,
        })
    }

    /// Local state with a setter.
    ///
    /// `initial` runs only on mount. On update, queued updates whose lane
    /// belongs to this render are applied in order; the rest stay queued and
    /// keep the fiber pending at their lanes.
    pub fn use_state<S: Clone + 'static>(
        &mut self,
        initial: impl FnOnce() -> S,
    ) -> Result<(S, Dispatch<S>), HookError> {
        if self.dispatcher == Dispatcher::Mount {
            let state = initial();
            let queue = UpdateQueue::shared();
            let dispatch = Dispatch {
                queue: Rc::clone(&queue),
                fiber: self.fiber,
                root: self.root.clone(),
            };
            self.hooks.push(Hook::State(Box::new(StateHook {
                memoized_state: state.clone(),
                base_state: state.clone(),
                base_queue: None,
                queue,
                dispatch: dispatch.clone(),
            })));
            return Ok((state, dispatch));
        }

        let render_lane = self.render_lane;
        let found = self.current_hook()?.kind();
        let hook = match self.current_hook()? {
            Hook::State(state) => state.downcast_mut::<StateHook<S>>(),
            _ => None,
        };
        let Some(current) = hook else {
            let found = if found == "state" { "state of another type" } else { found };
            return self.kind_mismatch(type_name::<S>(), found);
        };
        let pending = current.queue.borrow_mut().take_pending();
        let processed = merge_and_process(
            current.base_state.clone(),
            &mut current.base_queue,
            pending,
            render_lane,
        );
        let next = StateHook {
            memoized_state: processed.memoized_state.clone(),
            base_state: processed.base_state,
            base_queue: processed.base_queue,
            queue: Rc::clone(&current.queue),
            dispatch: current.dispatch.clone(),
        };
        let dispatch = next.dispatch.clone();
        self.skipped_lanes |= processed.skipped_lanes;
        self.hooks.push(Hook::State(Box::new(next)));
        Ok((processed.memoized_state, dispatch))
    }

    /// Passive effect: runs after the commit, outside the render call stack.
    ///
    /// With `deps == None` the effect fires after every commit, otherwise only
    /// when the dependencies compare unequal to the previous render's.
    pub fn use_effect<D: PartialEq + 'static>(
        &mut self,
        create: impl FnOnce() -> Option<Destroy> + 'static,
        deps: Option<D>,
    ) -> Result<(), HookError> {
        self.effect_hook(EffectTag::PASSIVE, Flags::PASSIVE_EFFECT, Box::new(create), deps)
    }

    /// Layout effect: runs synchronously during the commit, after host
    /// mutations and ref attachment.
    pub fn use_layout_effect<D: PartialEq + 'static>(
        &mut self,
        create: impl FnOnce() -> Option<Destroy> + 'static,
        deps: Option<D>,
    ) -> Result<(), HookError> {
        self.effect_hook(EffectTag::LAYOUT, Flags::LAYOUT_EFFECT, Box::new(create), deps)
    }

    fn effect_hook<D: PartialEq + 'static>(
        &mut self,
        kind: EffectTag,
        flag: Flags,
        create: Create,
        deps: Option<D>,
    ) -> Result<(), HookError> {
        let (destroy, unchanged) = match self.dispatcher {
            Dispatcher::Mount => (Rc::new(RefCell::new(None)), false),
            Dispatcher::Update => {
                let previous = match self.current_hook()? {
                    Hook::Effect(effect) if effect.matches(kind) => Some(Rc::clone(effect)),
                    _ => None,
                };
                let Some(previous) = previous else {
                    let found = self.current_hook()?.kind();
                    let expected = if kind == EffectTag::LAYOUT { "layout effect" } else { "effect" };
                    return self.kind_mismatch(expected, found);
                };
                let unchanged = match (&deps, &previous.deps) {
                    (Some(next), Some(prev)) => prev.downcast_ref::<D>() == Some(next),
                    _ => false,
                };
                (Rc::clone(&previous.destroy), unchanged)
            }
        };

        let tag = if unchanged {
            kind
        } else {
            self.flags |= flag;
            kind | EffectTag::HAS_EFFECT
        };
        let effect = Rc::new(Effect {
            tag: Cell::new(tag),
            create: RefCell::new(Some(create)),
            destroy,
            deps: deps.map(|deps| Rc::new(deps) as Rc<dyn Any>),
        });
        self.effects.push(Rc::clone(&effect));
        self.hooks.push(Hook::Effect(effect));
        Ok(())
    }

    /// A mutable box that keeps its identity for the component's lifetime.
    pub fn use_ref<T: 'static>(&mut self, initial: T) -> Result<RefObject<T>, HookError> {
        if self.dispatcher == Dispatcher::Mount {
            let object = RefObject::new(initial);
            self.hooks.push(Hook::Ref(Rc::new(object.clone())));
            return Ok(object);
        }
        let stored = match self.current_hook()? {
            Hook::Ref(stored) => Some(Rc::clone(stored)),
            _ => None,
        };
        let object = stored
            .as_ref()
            .and_then(|stored| stored.downcast_ref::<RefObject<T>>())
            .cloned();
        match (stored, object) {
            (Some(stored), Some(object)) => {
                self.hooks.push(Hook::Ref(stored));
                Ok(object)
            }
            (Some(_), None) => self.kind_mismatch(type_name::<T>(), "ref of another type"),
            (None, _) => {
                let found = self.current_hook()?.kind();
                self.kind_mismatch("ref", found)
            }
        }
    }

    /// Pending flag plus a starter that runs updates at transition priority.
    pub fn use_transition(&mut self) -> Result<(bool, StartTransition), HookError> {
        let (is_pending, set_pending) = self.use_state(|| false)?;
        let start = match self.dispatcher {
            Dispatcher::Mount => StartTransition {
                set_pending,
                runtime: self.runtime.clone(),
            },
            Dispatcher::Update => {
                let start = match self.current_hook()? {
                    Hook::Transition(start) => Some(start.clone()),
                    _ => None,
                };
                match start {
                    Some(start) => start,
                    None => {
                        let found = self.current_hook()?.kind();
                        return self.kind_mismatch("transition", found);
                    }
                }
            }
        };
        self.hooks.push(Hook::Transition(start.clone()));
        Ok((is_pending, start))
    }
}

/// Setter returned by [`RenderContext::use_state`].
///
/// Every call requests a lane from the runtime, queues the update and
/// schedules the owning root. Calls on an unmounted component are dropped.
pub struct Dispatch<S> {
    queue: SharedQueue<S>,
    fiber: FiberId,
    root: Weak<RootInner>,
}

impl<S: Clone + 'static> Dispatch<S> {
    pub fn set(&self, value: S) {
        self.dispatch(Action::Replace(value));
    }

    /// Queues a function of the state computed by the preceding updates.
    pub fn update(&self, reducer: impl Fn(&S) -> S + 'static) {
        self.dispatch(Action::reduce(reducer));
    }

    pub fn dispatch(&self, action: Action<S>) {
        let Some(root) = self.root.upgrade() else {
            log::warn!("state update on a component of a dropped root ignored");
            return;
        };
        let lane = root.runtime().request_update_lane();
        {
            let mut fibers = root.fibers.borrow_mut();
            if !fibers.contains(self.fiber) {
                log::warn!("state update on an unmounted component ignored");
                return;
            }
            enqueue_update(
                &mut self.queue.borrow_mut(),
                create_update(action, lane),
                &mut fibers,
                self.fiber,
                lane,
            );
        }
        schedule_update_on_fiber(&root, self.fiber, lane);
    }
}

impl<S> Clone for Dispatch<S> {
    fn clone(&self) -> Self {
        Self {
            queue: Rc::clone(&self.queue),
            fiber: self.fiber,
            root: self.root.clone(),
        }
    }
}

impl<S> PartialEq for Dispatch<S> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.queue, &other.queue)
    }
}

impl<S> fmt::Debug for Dispatch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dispatch").field(&self.fiber).finish()
    }
}

/// Starter returned by [`RenderContext::use_transition`].
#[derive(Clone)]
pub struct StartTransition {
    set_pending: Dispatch<bool>,
    runtime: RuntimeHandle,
}

impl StartTransition {
    /// Marks the transition pending at the current priority, then runs
    /// `callback` with every update it dispatches assigned the transition
    /// lane (including the pending flag reset).
    pub fn start(&self, callback: impl FnOnce()) {
        self.set_pending.set(true);
        let previous = self.runtime.set_in_transition(true);
        callback();
        self.set_pending.set(false);
        self.runtime.set_in_transition(previous);
    }
}

impl fmt::Debug for StartTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StartTransition(..)")
    }
}

#[cfg(test)]
#[path = "tests/hooks_tests.rs"]
mod tests;
