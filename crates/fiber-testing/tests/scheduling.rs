use std::cell::RefCell;
use std::rc::Rc;

use fiber_core::{
    h, Component, Dispatch, Lanes, MemoryHost, NodeId, SchedulerPriority, StartTransition,
};
use fiber_testing::{EventLog, ManualClock, ReconcilerTestRule};

/// A row whose render takes `cost` milliseconds of manual clock time.
fn slow_row(clock: &ManualClock, renders: &EventLog, cost: u64) -> Component {
    let clock = clock.clone();
    let renders = renders.clone();
    Component::new("SlowRow", move |_, props| {
        let label = props.get_str("label").unwrap_or_default().to_owned();
        clock.advance(cost);
        renders.push(label.clone());
        Ok(h("li").child(label).into())
    })
}

struct Setters {
    label: Option<Dispatch<String>>,
    urgent: Option<Dispatch<u32>>,
    generation: Option<Dispatch<u32>>,
}

fn slow_list(row: Component, rows: usize, setters: Rc<RefCell<Setters>>) -> Component {
    Component::new("SlowList", move |cx, _| {
        let (label, set_label) = cx.use_state(|| "first".to_owned())?;
        let (urgent, set_urgent) = cx.use_state(|| 0u32)?;
        {
            let mut setters = setters.borrow_mut();
            setters.label = Some(set_label);
            setters.urgent = Some(set_urgent);
        }
        let items = (0..rows).map(|index| {
            row.element()
                .key(index)
                .attr("label", format!("{label}-{index}"))
        });
        Ok(h("div")
            .child(h("b").child(urgent.to_string()))
            .child(h("ul").children(items))
            .into())
    })
}

fn setters() -> Rc<RefCell<Setters>> {
    Rc::new(RefCell::new(Setters {
        label: None,
        urgent: None,
        generation: None,
    }))
}

#[test]
fn concurrent_render_yields_and_resumes_where_it_stopped() {
    let rule = ReconcilerTestRule::new();
    let renders = EventLog::new();
    let row = slow_row(rule.clock(), &renders, 2);
    let setters = setters();
    rule.render(slow_list(row, 6, Rc::clone(&setters)).element());
    renders.take();
    let set_label = setters.borrow().label.clone().expect("label setter");

    set_label.set("second".to_owned());
    assert!(rule.run_slice(), "the render yields with rows left");
    assert!(rule.is_rendering());
    assert_eq!(renders.take(), vec!["second-0", "second-1", "second-2"]);
    assert!(rule.html().contains("first-0"), "nothing is committed mid-render");

    rule.run_until_idle();
    assert_eq!(renders.take(), vec!["second-3", "second-4", "second-5"]);
    assert!(!rule.is_rendering());
    assert!(rule.html().contains("second-5"));
}

#[test]
fn urgent_update_interrupts_and_restarts_a_concurrent_render() {
    let rule = ReconcilerTestRule::new();
    let renders = EventLog::new();
    let row = slow_row(rule.clock(), &renders, 2);
    let setters = setters();
    rule.render(slow_list(row, 6, Rc::clone(&setters)).element());
    renders.take();
    let (set_label, set_urgent) = {
        let setters = setters.borrow();
        (
            setters.label.clone().expect("label setter"),
            setters.urgent.clone().expect("urgent setter"),
        )
    };

    set_label.set("second".to_owned());
    rule.run_slice();
    assert!(rule.is_rendering());
    renders.take();

    rule.with_priority(SchedulerPriority::Immediate, || set_urgent.set(1));
    assert_eq!(rule.pending_lanes(), Lanes::SYNC | Lanes::DEFAULT);
    rule.flush_sync();

    // the sync pass skips the default-lane label update
    assert!(rule.html().starts_with("<div><b>1</b>"));
    assert!(rule.html().contains("first-5"));
    assert_eq!(renders.take().len(), 6);
    assert_eq!(rule.pending_lanes(), Lanes::DEFAULT);

    rule.run_until_idle();
    let html = rule.html();
    assert!(html.starts_with("<div><b>1</b>"));
    assert!(html.contains("second-0") && html.contains("second-5"));
    assert_eq!(
        renders.take(),
        (0..6).map(|index| format!("second-{index}")).collect::<Vec<_>>(),
        "the interrupted render starts over"
    );
}

#[test]
fn expired_work_finishes_without_yielding() {
    let rule = ReconcilerTestRule::new();
    let renders = EventLog::new();
    let row = slow_row(rule.clock(), &renders, 3);
    let setters = setters();
    rule.render(slow_list(row, 10, Rc::clone(&setters)).element());
    renders.take();
    let set_label = setters.borrow().label.clone().expect("label setter");

    set_label.set("late".to_owned());
    rule.run_slice();
    assert!(rule.is_rendering());
    let first_slice = renders.take().len();
    assert!(first_slice < 10);

    rule.advance_time(6_000);
    rule.run_slice();

    assert!(!rule.is_rendering());
    assert_eq!(renders.take().len(), 10 - first_slice);
    assert!(rule.html().contains("late-9"));
}

#[test]
fn transition_updates_render_after_urgent_ones() {
    let rule = ReconcilerTestRule::new();
    let renders = EventLog::new();
    let handles: Rc<RefCell<Option<(Dispatch<String>, StartTransition)>>> = Rc::default();
    let app = {
        let renders = renders.clone();
        let handles = Rc::clone(&handles);
        Component::new("Search", move |cx, _| {
            let (query, set_query) = cx.use_state(String::new)?;
            let (pending, start) = cx.use_transition()?;
            renders.push(format!("{query:?} pending={pending}"));
            *handles.borrow_mut() = Some((set_query, start));
            Ok(h("p").child(query).into())
        })
    };
    rule.render(app.element());
    renders.take();
    let (set_query, start) = handles.borrow().clone().expect("handles captured");

    start.start(|| set_query.set("rust".to_owned()));
    assert_eq!(rule.pending_lanes(), Lanes::DEFAULT | Lanes::TRANSITION);

    rule.run_until_idle();

    assert_eq!(
        renders.take(),
        vec![r#""" pending=true"#, r#""rust" pending=false"#]
    );
    assert_eq!(rule.html(), "<p>rust</p>");
    assert_eq!(rule.pending_lanes(), Lanes::NO_LANES);
}

#[test]
fn runtime_transitions_use_the_transition_lane() {
    let rule = ReconcilerTestRule::new();
    let setter: Rc<RefCell<Option<Dispatch<i32>>>> = Rc::default();
    let app = {
        let setter = Rc::clone(&setter);
        Component::new("Deferred", move |cx, _| {
            let (value, set_value) = cx.use_state(|| 0)?;
            *setter.borrow_mut() = Some(set_value);
            Ok(h("em").child(value.to_string()).into())
        })
    };
    rule.render(app.element());
    let set_value = setter.borrow().clone().expect("setter captured");

    rule.start_transition(|| set_value.set(9));

    assert_eq!(rule.pending_lanes(), Lanes::TRANSITION);
    rule.run_until_idle();
    assert_eq!(rule.html(), "<em>9</em>");
}

#[test]
fn root_renders_stay_sync_inside_transitions() {
    let rule = ReconcilerTestRule::new();

    rule.start_transition(|| rule.root().render(h("p").child("x")));
    assert_eq!(rule.pending_lanes(), Lanes::SYNC);

    rule.with_priority(SchedulerPriority::Idle, || {
        rule.root().render(h("p").child("y"))
    });
    assert_eq!(rule.pending_lanes(), Lanes::SYNC);

    rule.flush_sync();
    assert_eq!(rule.html(), "<p>y</p>");
    assert_eq!(rule.pending_lanes(), Lanes::NO_LANES);
}

fn reachable(host: &MemoryHost, id: NodeId) -> usize {
    1 + host
        .children(id)
        .into_iter()
        .map(|child| reachable(host, child))
        .sum::<usize>()
}

#[test]
fn interrupted_renders_release_the_host_nodes_they_created() {
    let rule = ReconcilerTestRule::new();
    let renders = EventLog::new();
    let row = slow_row(rule.clock(), &renders, 2);
    let setters = setters();
    let generation = {
        let setters = Rc::clone(&setters);
        Component::new("Generations", move |cx, _| {
            let (generation, set_generation) = cx.use_state(|| 0u32)?;
            let (urgent, set_urgent) = cx.use_state(|| 0u32)?;
            {
                let mut setters = setters.borrow_mut();
                setters.urgent = Some(set_urgent);
                setters.generation = Some(set_generation);
            }
            // fresh keys every generation, so each render builds new rows
            let items = (0..6).map(|index| {
                row.element()
                    .key(format!("{generation}-{index}"))
                    .attr("label", format!("{generation}-{index}"))
            });
            Ok(h("div")
                .child(h("b").child(urgent.to_string()))
                .child(h("ul").children(items))
                .into())
        })
    };
    rule.render(generation.element());
    let (set_generation, set_urgent) = {
        let setters = setters.borrow();
        (
            setters.generation.clone().expect("generation setter"),
            setters.urgent.clone().expect("urgent setter"),
        )
    };

    for round in 1..=5u32 {
        set_generation.set(round);
        rule.run_slice();
        assert!(rule.is_rendering());
        rule.with_priority(SchedulerPriority::Immediate, || set_urgent.set(round));
        rule.flush_sync();
        assert_eq!(
            rule.host().len(),
            reachable(rule.host(), rule.container()),
            "round {round}"
        );
    }

    rule.run_until_idle();
    assert!(rule.html().contains("5-5"));
    assert_eq!(rule.host().len(), reachable(rule.host(), rule.container()));
}
