#![forbid(unsafe_code)]

//! Lock discipline under real threads: readers share, writers wait, and
//! timeouts follow the configured policy.
//!
//! Run:
//!   cargo test -p keel-collections --test concurrency

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

use keel_collections::{
    CollectionError, FilterableObservableList, ListConfig, MasterSlaveObservableList, ObservableList,
};
use keel_core::{LockError, LockSettings, LockTimeoutPolicy};
use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

// ============================================================================
// Event capture
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: Level,
    message: String,
}

#[derive(Clone, Default)]
struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.0,
        });
    }
}

fn with_captured_events(f: impl FnOnce()) -> Vec<CapturedEvent> {
    let capture = EventCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    tracing::subscriber::with_default(subscriber, f);
    capture.events.lock().clone()
}

fn short_timeout(policy: LockTimeoutPolicy) -> ListConfig {
    ListConfig::default().with_lock_settings(LockSettings::new(Duration::from_millis(20), policy))
}

/// Hold a read lock on `list` in another thread until the returned sender
/// is dropped.
fn hold_read(list: &ObservableList<i32>) -> (mpsc::Sender<()>, thread::JoinHandle<()>) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let reader = list.clone();
    let handle = thread::spawn(move || {
        reader
            .read(|_| {
                entered_tx.send(()).unwrap();
                let _ = release_rx.recv();
            })
            .unwrap();
    });
    entered_rx.recv().unwrap();
    (release_tx, handle)
}

// ============================================================================
// Exclusivity
// ============================================================================

#[test]
fn writer_waits_for_enumerating_reader() {
    let list = ObservableList::from_vec(vec![1, 2, 3]);
    let reader_done = Arc::new(AtomicBool::new(false));
    let (entered_tx, entered_rx) = mpsc::channel();

    let reader = {
        let list = list.clone();
        let done = Arc::clone(&reader_done);
        thread::spawn(move || {
            list.read(|store| {
                entered_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(100));
                let sum: i32 = store.iter().sum();
                done.store(true, Ordering::SeqCst);
                sum
            })
            .unwrap()
        })
    };

    entered_rx.recv().unwrap();
    list.insert(0, 0).unwrap();
    assert!(reader_done.load(Ordering::SeqCst));
    assert_eq!(reader.join().unwrap(), 6);
    assert_eq!(list.to_vec().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn concurrent_readers_do_not_block_each_other() {
    let list = ObservableList::from_vec((0..16).collect::<Vec<i32>>());
    let barrier = Arc::new(Barrier::new(2));
    let inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let list = list.clone();
            let barrier = Arc::clone(&barrier);
            let inside = Arc::clone(&inside);
            thread::spawn(move || {
                list.read(|store| {
                    inside.fetch_add(1, Ordering::SeqCst);
                    // Both readers must be inside the read lock at once.
                    barrier.wait();
                    store.len()
                })
                .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 16);
    }
    assert_eq!(inside.load(Ordering::SeqCst), 2);
}

#[test]
fn parallel_writers_lose_no_updates() {
    let list: ObservableList<usize> = ObservableList::new();
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let list = list.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    list.push(t * 100 + i).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(list.len().unwrap(), 200);
    assert_eq!(list.undo_depth().unwrap(), 200);

    let mut items = list.to_vec().unwrap();
    items.sort_unstable();
    items.dedup();
    assert_eq!(items.len(), 200);
}

#[test]
fn reentrant_read_is_rejected() {
    let list = ObservableList::from_vec(vec![1]);
    let inner = list.clone();
    let nested = list.read(|_| inner.len()).unwrap();
    assert!(matches!(
        nested,
        Err(CollectionError::Lock(LockError::Recursive { .. }))
    ));
}

// ============================================================================
// Derived views under contention
// ============================================================================

fn multiples_of(m: i32, below: i32) -> Vec<i32> {
    (0..below).filter(|x| x % m == 0).collect()
}

#[test]
fn filtered_readers_never_see_a_stale_view_while_base_grows() {
    let base: ObservableList<i32> = ObservableList::new();
    let view = FilterableObservableList::new(base.clone(), |x: &i32, m: &i32| x % m == 0);
    view.set_filter(Some(3)).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut seen = 0;
                while !done.load(Ordering::Acquire) {
                    let snapshot = view.to_vec().unwrap();
                    // The base only appends ascending values, so every
                    // snapshot is a prefix of the multiples of three.
                    assert!(snapshot.iter().copied().eq((0..).step_by(3).take(snapshot.len())));
                    assert!(snapshot.len() >= seen, "view went backwards");
                    seen = snapshot.len();
                }
            });
        }
        for i in 0..600 {
            base.push(i).unwrap();
        }
        done.store(true, Ordering::Release);
    });

    let expected: Vec<i32> = base
        .to_vec()
        .unwrap()
        .into_iter()
        .filter(|x| x % 3 == 0)
        .collect();
    assert_eq!(expected, multiples_of(3, 600));
    assert_eq!(view.to_vec().unwrap(), expected);
}

#[test]
fn set_filter_is_visible_as_soon_as_it_returns() {
    let base = ObservableList::from_vec((0..300).collect::<Vec<i32>>());
    let view = FilterableObservableList::new(base.clone(), |x: &i32, m: &i32| x % m == 0);
    view.set_filter(Some(2)).unwrap();
    let by_two = multiples_of(2, 300);
    let by_three = multiples_of(3, 300);
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let snapshot = view.to_vec().unwrap();
                    assert!(snapshot == by_two || snapshot == by_three);
                }
            });
        }
        for round in 0..200 {
            let (filter, expected) = if round % 2 == 0 {
                (3, &by_three)
            } else {
                (2, &by_two)
            };
            view.set_filter(Some(filter)).unwrap();
            assert_eq!(&view.to_vec().unwrap(), expected, "round {round}");
        }
        done.store(true, Ordering::Release);
    });
}

#[test]
fn merged_readers_track_a_growing_slave() {
    let master = ObservableList::from_vec(vec![-2, -1]);
    let slave: ObservableList<i32> = ObservableList::new();
    let merged = MasterSlaveObservableList::new(master);
    merged.add_slave(slave.clone()).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut seen = 0;
                while !done.load(Ordering::Acquire) {
                    let snapshot = merged.to_vec().unwrap();
                    assert_eq!(&snapshot[..2], &[-2, -1]);
                    let tail = &snapshot[2..];
                    assert!(tail.iter().copied().eq(0..tail.len() as i32));
                    assert!(tail.len() >= seen, "view went backwards");
                    seen = tail.len();
                }
            });
        }
        for i in 0..400 {
            slave.push(i).unwrap();
        }
        done.store(true, Ordering::Release);
    });

    let mut expected = vec![-2, -1];
    expected.extend(0..400);
    assert_eq!(merged.to_vec().unwrap(), expected);
}

// ============================================================================
// Timeout policy
// ============================================================================

#[test]
fn warn_and_wait_logs_then_completes() {
    let list = ObservableList::with_config(short_timeout(LockTimeoutPolicy::WarnAndWait));
    list.push(1).unwrap();
    let (release, reader) = hold_read(&list);

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        drop(release);
    });
    let events = with_captured_events(|| {
        list.push(2).unwrap();
    });
    releaser.join().unwrap();
    reader.join().unwrap();

    assert_eq!(list.to_vec().unwrap(), vec![1, 2]);
    assert!(
        events
            .iter()
            .any(|e| e.level == Level::WARN && e.message.contains("timed out")),
        "expected a timeout warning, got {events:?}"
    );
}

#[test]
fn fail_policy_surfaces_timeout_and_changes_nothing() {
    let list = ObservableList::with_config(short_timeout(LockTimeoutPolicy::Fail));
    list.push(1).unwrap();
    let (release, reader) = hold_read(&list);

    let err = list.push(2).unwrap_err();
    assert!(matches!(
        err,
        CollectionError::Lock(LockError::Timeout { .. })
    ));

    drop(release);
    reader.join().unwrap();
    assert_eq!(list.to_vec().unwrap(), vec![1]);
    assert_eq!(list.undo_depth().unwrap(), 1);
}
