#![forbid(unsafe_code)]

//! Change notifications and their subscriber lists.
//!
//! # Design
//!
//! Each collection owns one [`Notifier`] per event kind. Subscribers are
//! held as `Weak` callbacks; the strong half lives in the [`Subscription`]
//! guard handed back to the caller, so dropping the guard unsubscribes.
//!
//! # Invariants
//!
//! 1. Subscribers run in registration order, synchronously, on the thread
//!    that raised the event.
//! 2. The subscriber list is never locked while a callback runs, so a
//!    callback may subscribe, unsubscribe, or mutate the collection again.
//! 3. Dead weak references are pruned lazily on the next raise.
//!
//! # Failure Modes
//!
//! - **Panicking subscriber**: the panic is caught and logged; the
//!   remaining subscribers still see the event. The mutation that raised
//!   the event has already committed.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info_span, warn};

/// A structural change to a collection, batched per mutation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionChange<T> {
    /// Consumers must re-read the whole collection.
    Reset,
    Add {
        index: usize,
        items: Vec<T>,
    },
    Remove {
        index: usize,
        items: Vec<T>,
    },
    Replace {
        index: usize,
        old: T,
        new: T,
    },
    Move {
        item: T,
        old_index: usize,
        new_index: usize,
    },
}

/// A derived property that changed alongside a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyChange {
    Count,
    /// The indexer: any item or item content may differ.
    Items,
}

/// Whether a `*_with` mutator raises notifications.
///
/// Suppressed mutations raise nothing. Callers batching many suppressed
/// mutations raise one reset afterwards if consumers must resynchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuppressionContext {
    #[default]
    Raise,
    Suppress,
}

impl SuppressionContext {
    #[must_use]
    pub const fn is_suppressed(self) -> bool {
        matches!(self, Self::Suppress)
    }
}

type CallbackArc<E> = Arc<dyn Fn(&E) + Send + Sync>;
type CallbackWeak<E> = Weak<dyn Fn(&E) + Send + Sync>;

/// Subscriber list for one event kind.
pub struct Notifier<E> {
    kind: &'static str,
    subscribers: Mutex<Vec<CallbackWeak<E>>>,
}

impl<E: 'static> fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("kind", &self.kind)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<E: 'static> Notifier<E> {
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register `callback`. It stays registered while the returned guard lives.
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let strong: CallbackArc<E> = Arc::new(callback);
        self.subscribers.lock().push(Arc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Registered subscribers, including dead ones not yet pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver `events` in order to every live subscriber. Returns the
    /// number of subscribers reached.
    pub fn raise(&self, events: &[E]) -> usize {
        if events.is_empty() {
            return 0;
        }
        let callbacks: Vec<CallbackArc<E>> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|w| w.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        if callbacks.is_empty() {
            return 0;
        }

        let start = Instant::now();
        let _span = info_span!(
            "keel.notify",
            kind = self.kind,
            events = events.len(),
            subscribers = callbacks.len(),
            duration_us = tracing::field::Empty
        )
        .entered();

        for event in events {
            for callback in &callbacks {
                if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                    warn!(kind = self.kind, "subscriber panicked; event dropped for it");
                }
            }
        }

        let duration_us = start.elapsed().as_micros() as u64;
        tracing::Span::current().record("duration_us", duration_us);
        debug!(kind = self.kind, duration_us, "notification delivered");
        callbacks.len()
    }
}

/// RAII guard for a subscriber callback.
pub struct Subscription {
    _guard: Box<dyn Any + Send + Sync>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn events_reach_subscribers_in_order() {
        let notifier = Notifier::<u32>::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s1 = Arc::clone(&seen);
        let _a = notifier.subscribe(move |e| s1.lock().push(("a", *e)));
        let s2 = Arc::clone(&seen);
        let _b = notifier.subscribe(move |e| s2.lock().push(("b", *e)));

        assert_eq!(notifier.raise(&[1, 2]), 2);
        assert_eq!(*seen.lock(), vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let notifier = Notifier::<()>::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = notifier.subscribe(move |()| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        notifier.raise(&[()]);
        drop(sub);
        assert_eq!(notifier.raise(&[()]), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.subscriber_count(), 0, "pruned on raise");
    }

    #[test]
    fn empty_batch_raises_nothing() {
        let notifier = Notifier::<u8>::new("test");
        let _sub = notifier.subscribe(|_| panic!("must not run"));
        assert_eq!(notifier.raise(&[]), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_starve_others() {
        let notifier = Notifier::<u8>::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        let _bad = notifier.subscribe(|_| panic!("subscriber bug"));
        let h = Arc::clone(&hits);
        let _good = notifier.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        notifier.raise(&[0]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_may_subscribe_reentrantly() {
        let notifier = Arc::new(Notifier::<u8>::new("test"));
        let inner = Arc::clone(&notifier);
        let nested = Arc::new(Mutex::new(Vec::new()));
        let slot = Arc::clone(&nested);
        let _sub = notifier.subscribe(move |_| {
            slot.lock().push(inner.subscribe(|_| {}));
        });
        notifier.raise(&[0]);
        assert_eq!(notifier.subscriber_count(), 2);
    }

    #[test]
    fn suppression_defaults_to_raise() {
        assert!(!SuppressionContext::default().is_suppressed());
        assert!(SuppressionContext::Suppress.is_suppressed());
    }

    #[test]
    fn debug_reports_live_subscribers() {
        let notifier = Notifier::<u8>::new("debugged");
        let _sub = notifier.subscribe(|_| {});
        let rendered = format!("{notifier:?}");
        assert!(rendered.contains("\"debugged\""));
        assert!(rendered.contains("subscriber_count: 1"));
    }
}
