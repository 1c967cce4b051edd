//! Host-independent element descriptions.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::collections::OrderedMap;
use crate::error::RenderError;
use crate::hooks::RenderContext;
use crate::NodeId;

/// Identity of an element among its siblings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Rc<str>);

impl Key {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key(Rc::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key(Rc::from(value))
    }
}

macro_rules! key_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Key {
            fn from(value: $ty) -> Self {
                Key(Rc::from(value.to_string()))
            }
        })*
    };
}

key_from_int!(i32, i64, u32, u64, usize);

/// Shared mutable box with a stable identity.
///
/// Returned by `use_ref`, and attached to host elements to receive their
/// [`NodeId`] once committed.
pub struct RefObject<T>(Rc<RefCell<T>>);

impl<T> RefObject<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    pub fn set(&self, value: T) {
        *self.0.borrow_mut() = value;
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> RefObject<T> {
    pub fn get(&self) -> T {
        self.0.borrow().clone()
    }
}

impl<T> Clone for RefObject<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T> PartialEq for RefObject<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: fmt::Debug> fmt::Debug for RefObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefObject").field(&*self.0.borrow()).finish()
    }
}

/// Ref attached to a host element.
pub type HostRef = RefObject<Option<NodeId>>;

type RenderFn = dyn Fn(&mut RenderContext, &Props) -> Result<Node, RenderError>;

/// A function component.
///
/// Components compare by identity: clones of one `Component` are the same
/// type, two components built from identical closures are not.
#[derive(Clone)]
pub struct Component {
    name: Rc<str>,
    render: Rc<RenderFn>,
}

impl Component {
    pub fn new(
        name: &str,
        render: impl Fn(&mut RenderContext, &Props) -> Result<Node, RenderError> + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name),
            render: Rc::new(render),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element(&self) -> Element {
        Element::new(ElementType::Component(self.clone()))
    }

    pub(crate) fn render(
        &self,
        cx: &mut RenderContext,
        props: &Props,
    ) -> Result<Node, RenderError> {
        (self.render)(cx, props)
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Rc::as_ptr(&self.render) as *const u8 == Rc::as_ptr(&other.render) as *const u8
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ElementType {
    Host(Rc<str>),
    Component(Component),
    Fragment,
}

/// Event handler stored in props and invoked by the host's input layer.
#[derive(Clone)]
pub struct EventHandler(Rc<dyn Fn()>);

impl EventHandler {
    pub fn new(handler: impl Fn() + 'static) -> Self {
        Self(Rc::new(handler))
    }

    pub fn call(&self) {
        (self.0)()
    }
}

impl PartialEq for EventHandler {
    fn eq(&self, other: &Self) -> bool {
        Rc::as_ptr(&self.0) as *const u8 == Rc::as_ptr(&other.0) as *const u8
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventHandler(..)")
    }
}

#[derive(Clone)]
pub enum PropValue {
    Str(Rc<str>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Handler(EventHandler),
    Any(Rc<dyn Any>),
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Float(a), PropValue::Float(b)) => a == b,
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Handler(a), PropValue::Handler(b)) => a == b,
            (PropValue::Any(a), PropValue::Any(b)) => {
                Rc::as_ptr(a) as *const u8 == Rc::as_ptr(b) as *const u8
            }
            _ => false,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Str(value) => fmt::Debug::fmt(value, f),
            PropValue::Int(value) => fmt::Debug::fmt(value, f),
            PropValue::Float(value) => fmt::Debug::fmt(value, f),
            PropValue::Bool(value) => fmt::Debug::fmt(value, f),
            PropValue::Handler(handler) => fmt::Debug::fmt(handler, f),
            PropValue::Any(_) => f.write_str("Any(..)"),
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Int(value.into())
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<EventHandler> for PropValue {
    fn from(value: EventHandler) -> Self {
        PropValue::Handler(value)
    }
}

pub type Attributes = OrderedMap<Rc<str>, PropValue>;

/// Element attributes plus the element's children.
#[derive(Clone, Default)]
pub struct Props {
    attributes: Rc<Attributes>,
    children: Rc<Node>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        Rc::make_mut(&mut self.attributes).insert(Rc::from(name), value.into());
        self
    }

    pub fn with_children(mut self, children: impl Into<Node>) -> Self {
        self.children = Rc::new(children.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.attributes.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            PropValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            PropValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            PropValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn handler(&self, name: &str) -> Option<&EventHandler> {
        match self.get(name)? {
            PropValue::Handler(handler) => Some(handler),
            _ => None,
        }
    }

    pub fn get_any<T: 'static>(&self, name: &str) -> Option<&T> {
        match self.get(name)? {
            PropValue::Any(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn children(&self) -> &Node {
        &self.children
    }

    /// Attribute equality, ignoring children.
    pub fn same_attributes(&self, other: &Props) -> bool {
        Rc::ptr_eq(&self.attributes, &other.attributes) || self.attributes == other.attributes
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("attributes", &self.attributes)
            .field("children", &self.children)
            .finish()
    }
}

/// A single element description.
#[derive(Clone)]
pub struct Element {
    element_type: ElementType,
    key: Option<Key>,
    host_ref: Option<HostRef>,
    props: Props,
}

impl Element {
    pub fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            key: None,
            host_ref: None,
            props: Props::default(),
        }
    }

    pub fn host(tag: &str) -> Self {
        Self::new(ElementType::Host(Rc::from(tag)))
    }

    pub fn fragment(children: impl Into<Node>) -> Self {
        Self::new(ElementType::Fragment).with_props(Props::new().with_children(children))
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_ref(mut self, host_ref: &HostRef) -> Self {
        self.host_ref = Some(host_ref.clone());
        self
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.props = props;
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.props = self.props.with(name, value);
        self
    }

    pub fn on(self, event: &str, handler: impl Fn() + 'static) -> Self {
        self.attr(event, EventHandler::new(handler))
    }

    /// Adds a child. A single child stays a single node; further children
    /// turn the children into a list.
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        let child = child.into();
        let children = match &*self.props.children {
            Node::Empty => child,
            Node::List(items) => {
                let mut items = items.to_vec();
                items.push(child);
                Node::List(items.into())
            }
            single => Node::List(vec![single.clone(), child].into()),
        };
        self.props.children = Rc::new(children);
        self
    }

    pub fn children<I, N>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        self.props.children = Rc::new(Node::list(children));
        self
    }

    pub fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    pub fn get_key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn host_ref(&self) -> Option<&HostRef> {
        self.host_ref.as_ref()
    }

    pub fn props(&self) -> &Props {
        &self.props
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Element");
        s.field("type", &self.element_type);
        if let Some(key) = &self.key {
            s.field("key", key);
        }
        s.field("props", &self.props).finish()
    }
}

/// A child description.
#[derive(Clone, Debug, Default)]
pub enum Node {
    #[default]
    Empty,
    Text(Rc<str>),
    Element(Element),
    List(Rc<[Node]>),
}

impl Node {
    pub fn text(content: impl fmt::Display) -> Self {
        Node::Text(Rc::from(content.to_string()))
    }

    pub fn list<I, N>(items: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        Node::List(items.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }
}

impl From<Element> for Node {
    fn from(value: Element) -> Self {
        Node::Element(value)
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::Text(Rc::from(value))
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::Text(Rc::from(value))
    }
}

impl From<Vec<Node>> for Node {
    fn from(value: Vec<Node>) -> Self {
        Node::List(value.into())
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(value: Option<T>) -> Self {
        value.map_or(Node::Empty, Into::into)
    }
}

macro_rules! node_from_number {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Node {
            fn from(value: $ty) -> Self {
                Node::text(value)
            }
        })*
    };
}

node_from_number!(i32, i64, u32, u64, usize, f64);
