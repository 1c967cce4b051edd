#![doc = r"Fiber reconciliation engine: element trees, hooks, priority lanes and an interruptible render/commit loop."]

extern crate self as fiber_core;

pub mod collections;
mod commit;
pub mod element;
pub mod error;
pub mod fiber;
pub mod hash;
pub mod hooks;
pub mod host;
pub mod lanes;
pub mod platform;
mod reconcile;
pub mod runtime;
pub mod update_queue;
mod work_loop;

pub use element::{
    Attributes, Component, Element, ElementType, EventHandler, HostRef, Key, Node, PropValue,
    Props, RefObject,
};
pub use error::{HookError, NodeError, RenderError};
pub use fiber::{EffectTag, Fiber, FiberArena, FiberId, Flags, WorkTag};
pub use hooks::{Destroy, Dispatch, RenderContext, StartTransition, NO_DEPS};
pub use host::{HostConfig, HostOp, MemoryHost, MemoryNode, MemoryNodeKind, NodeId};
pub use lanes::{Lane, Lanes};
pub use platform::{Clock, Scheduler, SchedulerPriority, Task, TaskHandle};
pub use runtime::{Root, Runtime, RuntimeHandle};
pub use update_queue::Action;

/// Builds a host element: `h("div")`.
pub fn h(tag: &str) -> Element {
    Element::host(tag)
}
