// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Multicast observables binding calls and conversations to plugin handlers.
//!
//! A [`Subject`] fans events out to every live observer. Observers are held
//! weakly: dropping the strong reference on the handler side is enough to
//! detach, and expired entries are swept on the next publish. Publication is
//! thread-safe and runs on the caller's thread.

use crate::types::{ChatMessage, MediaFrame};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

/// Receiver side of a [`Subject`].
///
/// `on_event` must not block for long; it runs synchronously on the media or
/// messaging thread.
pub trait Observer<T>: Send + Sync {
    fn on_event(&self, event: &mut T);
}

/// A thread-safe multicast observable.
pub struct Subject<T> {
    observers: Mutex<Vec<Weak<dyn Observer<T>>>>,
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subject<T> {
    pub const fn new() -> Self {
        Self { observers: Mutex::new(Vec::new()) }
    }

    /// Registers an observer. Attaching the same observer twice is a no-op.
    pub fn attach(&self, observer: Weak<dyn Observer<T>>) {
        let Ok(mut observers) = self.observers.lock() else { return };
        if observers.iter().any(|o| o.ptr_eq(&observer)) {
            return;
        }
        observers.push(observer);
    }

    /// Removes an observer. Unknown observers are ignored.
    pub fn detach(&self, observer: &Weak<dyn Observer<T>>) {
        let Ok(mut observers) = self.observers.lock() else { return };
        observers.retain(|o| !o.ptr_eq(observer));
    }

    /// Delivers `event` to every live observer, in attach order.
    ///
    /// Expired observers are dropped. A panicking observer is detached from
    /// this subject; delivery continues with the remaining observers.
    pub fn publish(&self, event: &mut T) {
        // Snapshot strong references so observers may attach or detach
        // (including themselves) while being notified.
        let live: Vec<Arc<dyn Observer<T>>> = {
            let Ok(mut observers) = self.observers.lock() else { return };
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };

        for observer in live {
            let result = catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
            if result.is_err() {
                warn!("Observer panicked during publish, detaching it");
                let weak = Arc::downgrade(&observer);
                self.detach(&weak);
            }
        }
    }

    /// Number of observers still alive.
    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .map(|observers| observers.iter().filter(|o| o.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

/// Frame subject of a single call stream.
pub type AvSubject = Subject<MediaFrame>;

/// Message subject of a single conversation.
pub type ChatSubject = Subject<ChatMessage>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        seen: AtomicUsize,
    }

    impl Observer<u32> for Counter {
        fn on_event(&self, event: &mut u32) {
            *event += 1;
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicker;

    impl Observer<u32> for Panicker {
        fn on_event(&self, _event: &mut u32) {
            panic!("misbehaving observer");
        }
    }

    #[test]
    fn test_publish_reaches_all_observers() {
        let subject: Subject<u32> = Subject::new();
        let a = Arc::new(Counter { seen: AtomicUsize::new(0) });
        let b = Arc::new(Counter { seen: AtomicUsize::new(0) });
        subject.attach(Arc::downgrade(&a) as Weak<dyn Observer<u32>>);
        subject.attach(Arc::downgrade(&b) as Weak<dyn Observer<u32>>);

        let mut event = 0;
        subject.publish(&mut event);

        // Both observers saw the event, and mutations accumulate in order.
        assert_eq!(event, 2);
        assert_eq!(a.seen.load(Ordering::SeqCst), 1);
        assert_eq!(b.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_attach_is_idempotent() {
        let subject: Subject<u32> = Subject::new();
        let a = Arc::new(Counter { seen: AtomicUsize::new(0) });
        subject.attach(Arc::downgrade(&a) as Weak<dyn Observer<u32>>);
        subject.attach(Arc::downgrade(&a) as Weak<dyn Observer<u32>>);
        assert_eq!(subject.observer_count(), 1);
    }

    #[test]
    fn test_expired_observers_are_swept() {
        let subject: Subject<u32> = Subject::new();
        let a = Arc::new(Counter { seen: AtomicUsize::new(0) });
        subject.attach(Arc::downgrade(&a) as Weak<dyn Observer<u32>>);
        drop(a);

        let mut event = 0;
        subject.publish(&mut event);
        assert_eq!(event, 0);
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn test_detach_removes_observer() {
        let subject: Subject<u32> = Subject::new();
        let a = Arc::new(Counter { seen: AtomicUsize::new(0) });
        let weak = Arc::downgrade(&a) as Weak<dyn Observer<u32>>;
        subject.attach(weak.clone());
        subject.detach(&weak);

        let mut event = 0;
        subject.publish(&mut event);
        assert_eq!(a.seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_observer_is_detached_and_others_continue() {
        let subject: Subject<u32> = Subject::new();
        let bad: Arc<Panicker> = Arc::new(Panicker);
        let good = Arc::new(Counter { seen: AtomicUsize::new(0) });
        subject.attach(Arc::downgrade(&bad) as Weak<dyn Observer<u32>>);
        subject.attach(Arc::downgrade(&good) as Weak<dyn Observer<u32>>);

        let mut event = 0;
        subject.publish(&mut event);
        assert_eq!(good.seen.load(Ordering::SeqCst), 1);
        assert_eq!(subject.observer_count(), 1);

        // The panicking observer no longer receives events.
        subject.publish(&mut event);
        assert_eq!(good.seen.load(Ordering::SeqCst), 2);
    }
}
