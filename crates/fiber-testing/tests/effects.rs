use fiber_core::{h, Component, Destroy, Element, HostRef, Node, RefObject, NO_DEPS};
use fiber_testing::{EventLog, ReconcilerTestRule};

fn child(log: &EventLog) -> Component {
    let log = log.clone();
    Component::new("Child", move |cx, props| {
        let value = props.get_int("value").unwrap_or_default();
        let effect_log = log.clone();
        cx.use_effect(
            move || -> Option<Destroy> {
                effect_log.push(format!("child effect {value}"));
                let cleanup_log = effect_log.clone();
                Some(Box::new(move || cleanup_log.push(format!("child cleanup {value}"))))
            },
            Some(value),
        )?;
        Ok(h("span").child(value.to_string()).into())
    })
}

fn parent(log: &EventLog, child: Component) -> Component {
    let log = log.clone();
    Component::new("Parent", move |cx, props| {
        let value = props.get_int("value").unwrap_or_default();
        let effect_log = log.clone();
        cx.use_effect(
            move || -> Option<Destroy> {
                effect_log.push("parent effect");
                None
            },
            NO_DEPS,
        )?;
        Ok(h("div").child(child.element().attr("value", value)).into())
    })
}

#[test]
fn passive_effects_run_children_first_after_the_commit() {
    let rule = ReconcilerTestRule::new();
    let log = EventLog::new();
    let app = parent(&log, child(&log));

    rule.schedule_render(app.element().attr("value", 1));
    rule.flush_sync();
    assert_eq!(rule.html(), "<div><span>1</span></div>");
    assert!(log.entries().is_empty(), "passive effects wait for the scheduler");

    rule.run_until_idle();
    assert_eq!(log.take(), vec!["child effect 1", "parent effect"]);
}

#[test]
fn effects_fire_only_when_their_dependencies_change() {
    let rule = ReconcilerTestRule::new();
    let log = EventLog::new();
    let app = parent(&log, child(&log));

    rule.render(app.element().attr("value", 1));
    log.take();

    rule.render(app.element().attr("value", 1));
    assert_eq!(log.take(), vec!["parent effect"]);

    rule.render(app.element().attr("value", 2));
    assert_eq!(
        log.take(),
        vec!["child cleanup 1", "child effect 2", "parent effect"]
    );
}

#[test]
fn unmount_runs_every_cleanup_once() {
    let rule = ReconcilerTestRule::new();
    let log = EventLog::new();
    let app = parent(&log, child(&log));
    rule.render(app.element().attr("value", 3));
    log.take();

    rule.unmount();
    assert_eq!(log.take(), vec!["child cleanup 3"]);
    assert_eq!(rule.html(), "");

    rule.run_until_idle();
    assert!(log.take().is_empty());
}

#[test]
fn effects_scheduling_updates_render_again() {
    let rule = ReconcilerTestRule::new();
    let renders = EventLog::new();
    let app = {
        let renders = renders.clone();
        Component::new("Loader", move |cx, _| {
            let (loaded, set_loaded) = cx.use_state(|| false)?;
            renders.push(format!("render {loaded}"));
            cx.use_effect(
                move || -> Option<Destroy> {
                    set_loaded.set(true);
                    None
                },
                Some(()),
            )?;
            Ok(h("p").child(if loaded { "ready" } else { "loading" }).into())
        })
    };

    rule.render(app.element());

    assert_eq!(rule.html(), "<p>ready</p>");
    assert_eq!(renders.take(), vec!["render false", "render true"]);
}

#[test]
fn layout_effects_run_during_the_commit_with_refs_attached() {
    let rule = ReconcilerTestRule::new();
    let log = EventLog::new();
    let host = rule.host().clone();
    let app = {
        let log = log.clone();
        Component::new("Measured", move |cx, props| {
            let label = props.get_str("label").unwrap_or_default().to_owned();
            let node: RefObject<HostRef> = cx.use_ref(HostRef::new(None))?;
            let host_ref = node.get();
            {
                let log = log.clone();
                let host_ref = host_ref.clone();
                let host = host.clone();
                cx.use_layout_effect(
                    move || -> Option<Destroy> {
                        let children = host_ref
                            .get()
                            .and_then(|id| host.node(id))
                            .map(|node| node.children.len());
                        log.push(format!("layout {children:?}"));
                        let log = log.clone();
                        Some(Box::new(move || log.push("layout cleanup")))
                    },
                    NO_DEPS,
                )?;
            }
            {
                let log = log.clone();
                cx.use_effect(
                    move || -> Option<Destroy> {
                        log.push("passive");
                        None
                    },
                    NO_DEPS,
                )?;
            }
            Ok(h("div").with_ref(&host_ref).child(label).into())
        })
    };

    rule.schedule_render(app.element().attr("label", "x"));
    rule.flush_sync();
    assert_eq!(log.take(), vec!["layout Some(1)"]);
    rule.run_until_idle();
    assert_eq!(log.take(), vec!["passive"]);

    rule.render(app.element().attr("label", "y"));
    assert_eq!(log.take(), vec!["layout cleanup", "layout Some(1)", "passive"]);

    rule.unmount();
    assert_eq!(log.take(), vec!["layout cleanup"]);
}

#[test]
fn host_refs_follow_the_mounted_node() {
    let rule = ReconcilerTestRule::new();
    let node_ref = HostRef::new(None);
    let with_ref = |show: bool| -> Element {
        if show {
            h("main").child(h("input").attr("id", "field").with_ref(&node_ref))
        } else {
            h("main")
        }
    };

    rule.render(with_ref(true));
    assert_eq!(node_ref.get(), rule.find("field"));
    assert!(node_ref.get().is_some());

    rule.render(with_ref(false));
    assert_eq!(node_ref.get(), None);
}

fn tracked(name: &'static str, log: &EventLog) -> Component {
    let log = log.clone();
    Component::new(name, move |cx, props| {
        let value = props.get_int("value").unwrap_or_default();
        let log = log.clone();
        cx.use_effect(
            move || -> Option<Destroy> {
                log.push(format!("create {name}{value}"));
                let log = log.clone();
                Some(Box::new(move || log.push(format!("destroy {name}{value}"))))
            },
            Some(value),
        )?;
        Ok(Node::Empty)
    })
}

#[test]
fn every_cleanup_of_a_commit_runs_before_any_new_effect() {
    let rule = ReconcilerTestRule::new();
    let log = EventLog::new();
    let (a, b) = (tracked("a", &log), tracked("b", &log));
    let tree = |value: i64| {
        h("div")
            .child(a.element().attr("value", value))
            .child(b.element().attr("value", value))
    };

    rule.render(tree(1));
    assert_eq!(log.take(), vec!["create a1", "create b1"]);

    rule.render(tree(2));
    assert_eq!(
        log.take(),
        vec!["destroy a1", "destroy b1", "create a2", "create b2"]
    );
}
