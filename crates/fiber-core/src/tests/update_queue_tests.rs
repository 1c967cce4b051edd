use super::*;

fn add(n: i32) -> Action<i32> {
    Action::reduce(move |prev: &i32| prev + n)
}

fn ring(updates: Vec<(Action<i32>, Lane)>) -> UpdateList<i32> {
    let mut iter = updates.into_iter();
    let (action, lane) = iter.next().expect("at least one update");
    let mut list = UpdateList::new(create_update(action, lane));
    for (action, lane) in iter {
        list.push(create_update(action, lane));
    }
    list
}

fn lanes_of(list: &UpdateList<i32>) -> Vec<Lane> {
    list.iter().map(|update| update.lane()).collect()
}

#[test]
fn push_keeps_enqueue_order() {
    let list = ring(vec![
        (add(1), Lanes::SYNC),
        (add(2), Lanes::DEFAULT),
        (add(3), Lanes::TRANSITION),
    ]);
    assert_eq!(
        lanes_of(&list),
        vec![Lanes::SYNC, Lanes::DEFAULT, Lanes::TRANSITION]
    );
    assert_eq!(list.len(), 3);
    assert_eq!(list.lanes(), Lanes::SYNC | Lanes::DEFAULT | Lanes::TRANSITION);
}

#[test]
fn splice_puts_pending_after_base() {
    let mut base = ring(vec![(add(1), Lanes::TRANSITION), (add(2), Lanes::NO_LANE)]);
    let pending = ring(vec![(add(3), Lanes::SYNC), (add(4), Lanes::DEFAULT)]);
    base.splice(pending);
    assert_eq!(
        lanes_of(&base),
        vec![Lanes::TRANSITION, Lanes::NO_LANE, Lanes::SYNC, Lanes::DEFAULT]
    );
    base.push(create_update(add(5), Lanes::IDLE));
    assert_eq!(lanes_of(&base).last(), Some(&Lanes::IDLE));
    assert_eq!(lanes_of(&base).first(), Some(&Lanes::TRANSITION));
}

#[test]
fn queue_without_skips_folds_everything() {
    let list = ring(vec![
        (add(1), Lanes::SYNC),
        (Action::Replace(10), Lanes::SYNC),
        (add(5), Lanes::SYNC),
    ]);
    let result = process_update_queue(0, Some(&list), Lanes::SYNC);
    assert_eq!(result.memoized_state, 15);
    assert_eq!(result.base_state, 15);
    assert!(result.base_queue.is_none());
    assert_eq!(result.skipped_lanes, Lanes::NO_LANES);
}

#[test]
fn function_actions_see_previously_computed_state() {
    let list = ring(vec![
        (Action::reduce(|prev: &i32| prev * 10), Lanes::SYNC),
        (Action::reduce(|prev: &i32| prev + 1), Lanes::SYNC),
    ]);
    let result = process_update_queue(2, Some(&list), Lanes::SYNC);
    assert_eq!(result.memoized_state, 21);
}

#[test]
fn skipped_update_freezes_base_state_and_carries_followers() {
    // sync +1, transition *2 (skipped), sync +10
    let list = ring(vec![
        (add(1), Lanes::SYNC),
        (Action::reduce(|prev: &i32| prev * 2), Lanes::TRANSITION),
        (add(10), Lanes::SYNC),
    ]);
    let first = process_update_queue(0, Some(&list), Lanes::SYNC);
    assert_eq!(first.memoized_state, 11);
    assert_eq!(first.base_state, 1, "base state frozen before the first skip");
    assert_eq!(first.skipped_lanes, Lanes::TRANSITION);
    let carried = first.base_queue.expect("skipped updates are carried");
    assert_eq!(
        lanes_of(&carried),
        vec![Lanes::TRANSITION, Lanes::NO_LANE],
        "the included update after the skip is carried at NoLane"
    );

    let second = process_update_queue(first.base_state, Some(&carried), Lanes::TRANSITION);
    assert_eq!(second.memoized_state, 12, "(1 * 2) + 10 in original order");
    assert!(second.base_queue.is_none());
}

#[test]
fn merge_and_process_retries_skipped_with_new_updates_in_order() {
    let mut base_queue = None;
    let pending = ring(vec![(add(1), Lanes::TRANSITION), (add(2), Lanes::SYNC)]);
    let first = merge_and_process(0, &mut base_queue, Some(pending), Lanes::SYNC);
    assert_eq!(first.memoized_state, 2);
    assert_eq!(
        base_queue.as_ref().map(lanes_of),
        Some(vec![Lanes::TRANSITION, Lanes::SYNC]),
        "the committed owner keeps the merged ring"
    );

    let mut carried = first.base_queue;
    let newer = ring(vec![(Action::reduce(|prev: &i32| prev * 100), Lanes::TRANSITION)]);
    let second = merge_and_process(first.base_state, &mut carried, Some(newer), Lanes::TRANSITION);
    assert_eq!(second.memoized_state, 300, "((0 + 1) + 2) * 100");
    assert!(second.base_queue.is_none());
}

#[test]
fn empty_queue_returns_base_state() {
    let result = process_update_queue(7, None, Lanes::DEFAULT);
    assert_eq!(result.memoized_state, 7);
    assert_eq!(result.base_state, 7);
    assert!(result.base_queue.is_none());
}

#[test]
fn shared_queue_enqueue_and_take() {
    let queue = UpdateQueue::<i32>::shared();
    assert!(!queue.borrow().has_pending());
    queue.borrow_mut().enqueue(create_update(add(1), Lanes::SYNC));
    queue
        .borrow_mut()
        .enqueue(create_update(Action::Replace(4), Lanes::DEFAULT));
    let pending = queue.borrow_mut().take_pending().expect("pending ring");
    assert!(!queue.borrow().has_pending());
    assert_eq!(lanes_of(&pending), vec![Lanes::SYNC, Lanes::DEFAULT]);
}
