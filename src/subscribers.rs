//! Retained-callback subscriber list shared by the camera and IMU engines.

use std::sync::Mutex;

type Callback<T> = Box<dyn FnMut(&T) -> bool + Send>;

/// Ordered list of callbacks. A callback returning `false` is removed after
/// the call; removal of the current element is safe mid-iteration.
///
/// Dispatch runs on the producing worker thread with the list lock held, so
/// callbacks must not register on the same list re-entrantly.
pub struct SubscriberList<T> {
    callbacks: Mutex<Vec<Callback<T>>>,
}

impl<T> SubscriberList<T> {
    pub fn new() -> Self {
        SubscriberList {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, callback: impl FnMut(&T) -> bool + Send + 'static) {
        self.callbacks.lock().unwrap().push(Box::new(callback));
    }

    /// Invoke every callback in registration order, dropping those that
    /// return `false`.
    pub fn dispatch(&self, item: &T) {
        self.callbacks.lock().unwrap().retain_mut(|cb| cb(item));
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for SubscriberList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn callbacks_run_in_registration_order() {
        let list = SubscriberList::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            list.register(move |_: &u32| {
                order.lock().unwrap().push(tag);
                true
            });
        }
        list.dispatch(&0);
        assert_eq!(*order.lock().unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn returning_false_removes_only_that_callback() {
        let list = SubscriberList::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        list.register(move |_: &u32| {
            c.fetch_add(1, Ordering::Relaxed);
            true
        });
        let c = Arc::clone(&count);
        list.register(move |_: &u32| {
            c.fetch_add(1, Ordering::Relaxed);
            false
        });

        list.dispatch(&0);
        assert_eq!(list.len(), 1);
        list.dispatch(&0);
        // First callback ran twice, one-shot callback once.
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn one_shot_subscriber_runs_exactly_once_and_empties_list() {
        let list = SubscriberList::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        list.register(move |_: &u32| {
            c.fetch_add(1, Ordering::Relaxed);
            false
        });

        list.dispatch(&0);
        list.dispatch(&0);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(list.is_empty());
    }
}
