use super::*;
use std::cell::Cell;

#[test]
fn append_builds_markup() {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let div = host.create_instance("div", &Props::new().with("id", "a"));
    let text = host.create_text_instance("hi & bye");
    host.append_initial_child(div, text).unwrap();
    host.append_child_to_container(container, div).unwrap();
    assert_eq!(host.html(container), "<div id=\"a\">hi &amp; bye</div>");
    assert_eq!(host.find_by_tag(container, "div"), Some(div));
    assert_eq!(host.find_by_id(container, "a"), Some(div));
}

#[test]
fn append_of_attached_child_moves_it() {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let a = host.create_text_instance("a");
    let b = host.create_text_instance("b");
    host.append_child_to_container(container, a).unwrap();
    host.append_child_to_container(container, b).unwrap();
    host.append_child_to_container(container, a).unwrap();
    assert_eq!(host.children(container), vec![b, a]);

    host.insert_child_to_container(container, a, b).unwrap();
    assert_eq!(host.children(container), vec![a, b]);
}

#[test]
fn insert_before_unknown_sibling_fails() {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let a = host.create_text_instance("a");
    let stray = host.create_text_instance("stray");
    assert_eq!(
        host.insert_child_to_container(container, a, stray),
        Err(NodeError::NotAChild {
            parent: container,
            child: stray
        })
    );
}

#[test]
fn remove_child_drops_the_subtree() {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let div = host.create_instance("div", &Props::new());
    let text = host.create_text_instance("x");
    host.append_initial_child(div, text).unwrap();
    host.append_child_to_container(container, div).unwrap();
    assert_eq!(host.len(), 3);

    host.remove_child(container, div).unwrap();
    assert_eq!(host.len(), 1);
    assert!(host.node(text).is_none());
    assert_eq!(
        host.remove_child(container, div),
        Err(NodeError::Missing { id: div })
    );
}

#[test]
fn released_instances_leave_no_trace() {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let div = host.create_instance("div", &Props::new());
    let text = host.create_text_instance("x");
    host.append_initial_child(div, text).unwrap();
    host.take_ops();

    host.release_instance(text);
    host.release_instance(div);
    host.release_instance(div);

    assert_eq!(host.len(), 1);
    assert!(host.node(container).is_some());
    assert!(host.take_ops().is_empty());
}

#[test]
fn updates_are_logged_and_applied() {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let span = host.create_instance("span", &Props::new().with("n", 1));
    let text = host.create_text_instance("old");
    host.append_child_to_container(container, span).unwrap();
    host.append_child_to_container(container, text).unwrap();
    host.take_ops();

    host.commit_update(span, &Props::new(), &Props::new().with("n", 2))
        .unwrap();
    host.commit_text_update(text, "new").unwrap();
    assert_eq!(host.html(container), "<span n=\"2\"></span>new");
    assert_eq!(
        host.take_ops(),
        vec![
            HostOp::CommitUpdate { id: span },
            HostOp::CommitTextUpdate {
                id: text,
                content: "new".into()
            },
        ]
    );
    assert!(matches!(
        host.commit_text_update(span, "nope"),
        Err(NodeError::TypeMismatch { .. })
    ));
}

#[test]
fn click_invokes_the_handler() {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let clicks = std::rc::Rc::new(Cell::new(0));
    let counter = clicks.clone();
    let button = host.create_instance(
        "button",
        &Props::new().with("onClick", EventHandler::new(move || counter.set(counter.get() + 1))),
    );
    host.append_child_to_container(container, button).unwrap();
    assert_eq!(host.html(container), "<button></button>");
    assert!(host.click(button));
    assert!(host.click(button));
    assert_eq!(clicks.get(), 2);
    assert!(!host.click(container));
}
