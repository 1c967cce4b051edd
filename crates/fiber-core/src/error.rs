use thiserror::Error;

use crate::NodeId;

/// Failure reported by a [`HostConfig`](crate::HostConfig) operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("node {id} missing")]
    Missing { id: NodeId },
    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("node {id} type mismatch; expected {expected}")]
    TypeMismatch { id: NodeId, expected: &'static str },
}

/// Hook call sequence violations detected while rendering a component.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("rendered more hooks than during the previous render (hook #{index})")]
    MoreHooksThanPreviousRender { index: usize },
    #[error("rendered fewer hooks than expected ({rendered} of {expected})")]
    FewerHooksThanPreviousRender { rendered: usize, expected: usize },
    #[error("hook #{index} changed kind: expected {expected}, found {found}")]
    KindMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
}

/// Error that aborts a render pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("component {component} failed: {message}")]
    Component { component: String, message: String },
}

impl RenderError {
    /// Error raised from inside a component's render function.
    pub fn component(component: &str, message: impl Into<String>) -> Self {
        RenderError::Component {
            component: component.to_owned(),
            message: message.into(),
        }
    }
}
