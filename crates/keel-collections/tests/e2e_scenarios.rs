#![forbid(unsafe_code)]

//! End-to-end mutation scenarios: notifications, undo and redo as seen by
//! a subscriber.
//!
//! Run:
//!   cargo test -p keel-collections --test e2e_scenarios

use std::sync::Arc;

use keel_collections::{
    CollectionChange, FilterableObservableList, ObservableList, PropertyChange, Subscription,
    SuppressionContext,
};
use parking_lot::Mutex;

type Log<E> = Arc<Mutex<Vec<E>>>;

fn watch<T: Clone + Send + Sync + 'static>(
    list: &ObservableList<T>,
) -> (Log<CollectionChange<T>>, Log<PropertyChange>, [Subscription; 2]) {
    let changes: Log<CollectionChange<T>> = Arc::default();
    let properties: Log<PropertyChange> = Arc::default();
    let c = Arc::clone(&changes);
    let p = Arc::clone(&properties);
    let subs = [
        list.subscribe_collection_changed(move |e| c.lock().push(e.clone())),
        list.subscribe_property_changed(move |e| p.lock().push(*e)),
    ];
    (changes, properties, subs)
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn insert_into_empty_list_then_undo_redo() {
    let list = ObservableList::new();
    let (changes, properties, _subs) = watch(&list);

    list.insert(0, "x").unwrap();
    assert_eq!(list.len().unwrap(), 1);
    assert_eq!(
        *changes.lock(),
        vec![CollectionChange::Add {
            index: 0,
            items: vec!["x"]
        }]
    );
    assert_eq!(
        *properties.lock(),
        vec![PropertyChange::Count, PropertyChange::Items]
    );

    assert!(list.undo().unwrap());
    assert_eq!(list.len().unwrap(), 0);
    assert!(list.redo().unwrap());
    assert_eq!(list.len().unwrap(), 1);
    assert_eq!(list.get(0).unwrap(), Some("x"));
}

#[test]
fn replace_raises_one_replace_and_undo_restores() {
    let list = ObservableList::from_vec(vec!["a", "b", "z", "d"]);
    let (changes, properties, _subs) = watch(&list);

    assert_eq!(list.set(2, "y").unwrap(), "z");
    assert_eq!(
        *changes.lock(),
        vec![CollectionChange::Replace {
            index: 2,
            old: "z",
            new: "y"
        }]
    );
    assert_eq!(*properties.lock(), vec![PropertyChange::Items]);

    list.undo().unwrap();
    assert_eq!(list.get(2).unwrap(), Some("z"));
}

#[test]
fn remove_range_returns_items_and_undo_rebuilds() {
    let original = vec![10, 11, 12, 13, 14];
    let list = ObservableList::from_vec(original.clone());

    let removed = list.remove_range(1, 3).unwrap();
    assert_eq!(removed, vec![11, 12, 13]);
    assert_eq!(list.to_vec().unwrap(), vec![10, 14]);

    list.undo().unwrap();
    assert_eq!(list.to_vec().unwrap(), original);
    list.redo().unwrap();
    assert_eq!(list.to_vec().unwrap(), vec![10, 14]);
}

#[test]
fn filter_tracks_removal_from_base() {
    let base = ObservableList::from_vec(vec![1, 7, 3, 9]);
    let view = FilterableObservableList::new(base.clone(), |x: &i32, min: &i32| x > min);
    view.set_filter(Some(5)).unwrap();
    assert_eq!(view.to_vec().unwrap(), vec![7, 9]);

    base.remove(&7).unwrap();
    assert_eq!(view.to_vec().unwrap(), vec![9]);
}

// ============================================================================
// Supplementary behaviour
// ============================================================================

#[test]
fn move_raises_move_in_both_directions() {
    let list = ObservableList::from_vec(vec!["a", "b", "c"]);
    let (changes, properties, _subs) = watch(&list);

    list.move_item(0, 2).unwrap();
    assert_eq!(list.to_vec().unwrap(), vec!["b", "c", "a"]);
    list.undo().unwrap();
    assert_eq!(list.to_vec().unwrap(), vec!["a", "b", "c"]);

    assert_eq!(
        *changes.lock(),
        vec![
            CollectionChange::Move {
                item: "a",
                old_index: 0,
                new_index: 2
            },
            CollectionChange::Move {
                item: "a",
                old_index: 2,
                new_index: 0
            },
        ]
    );
    assert!(!properties.lock().contains(&PropertyChange::Count));
}

#[test]
fn suppressed_mutations_stay_silent_until_reset() {
    let list = ObservableList::new();
    let (changes, _properties, _subs) = watch(&list);

    list.push_with(1, SuppressionContext::Suppress).unwrap();
    list.add_range_with([2, 3], SuppressionContext::Suppress)
        .unwrap();
    assert!(changes.lock().is_empty());

    list.notify_reset().unwrap();
    assert_eq!(*changes.lock(), vec![CollectionChange::Reset]);
    assert_eq!(list.to_vec().unwrap(), vec![1, 2, 3]);
    assert_eq!(list.undo_depth().unwrap(), 2);
}

#[test]
fn new_mutation_after_undo_discards_redo() {
    let list = ObservableList::new();
    list.push("a").unwrap();
    list.push("b").unwrap();
    list.undo().unwrap();
    assert!(list.can_redo().unwrap());

    list.push("c").unwrap();
    assert!(!list.can_redo().unwrap());
    assert!(!list.redo().unwrap());
    assert_eq!(list.to_vec().unwrap(), vec!["a", "c"]);
}

#[test]
fn modify_store_clears_history_and_resets() {
    let list = ObservableList::from_vec(vec![1, 2]);
    list.push(3).unwrap();
    let (changes, _properties, _subs) = watch(&list);

    list.modify_store(|store| {
        store.clear();
    })
    .unwrap();
    assert!(list.is_empty().unwrap());
    assert!(!list.can_undo().unwrap());
    assert_eq!(*changes.lock(), vec![CollectionChange::Reset]);
}

#[test]
fn subscriber_may_mutate_the_list() {
    let list = ObservableList::new();
    let inner = list.clone();
    let _sub = list.subscribe_collection_changed(move |change: &CollectionChange<i32>| {
        if let CollectionChange::Add { items, .. } = change
            && items == &[1]
        {
            inner.push(2).unwrap();
        }
    });
    list.push(1).unwrap();
    assert_eq!(list.to_vec().unwrap(), vec![1, 2]);
}
