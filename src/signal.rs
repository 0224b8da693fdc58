//! A small synchronous one-to-many callback list, standing in for the
//! signal/slot pattern the design notes describe: `connect`, `disconnect`,
//! `emit`. Subscribers run in insertion order on the caller's stack; a
//! panicking subscriber is caught so it cannot take down the scheduler.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Opaque handle returned by [`Signal::connect`], usable with
/// [`Signal::disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscriber<T> {
    id: SubscriptionId,
    callback: Box<dyn Fn(&T) + Send + Sync>,
}

/// A synchronous callback list for events of type `T`.
pub struct Signal<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Signal {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback, invoked synchronously on every [`emit`].
    pub fn connect<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().unwrap().push(Subscriber {
            id,
            callback: Box::new(callback),
        });
        id
    }

    pub fn disconnect(&self, id: SubscriptionId) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    /// Invokes every connected callback, in connection order. A callback
    /// that panics is caught and logged; it does not prevent later
    /// callbacks from running and does not propagate.
    pub fn emit(&self, value: &T) {
        let guard = self.subscribers.lock().unwrap();
        for subscriber in guard.iter() {
            let callback = &subscriber.callback;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(value))) {
                log::error!("signal subscriber panicked: {:?}", panic_message(&panic));
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn emits_to_all_subscribers_in_order() {
        let signal: Signal<u32> = Signal::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        signal.connect(move |v| o1.lock().unwrap().push(("a", *v)));
        let o2 = order.clone();
        signal.connect(move |v| o2.lock().unwrap().push(("b", *v)));

        signal.emit(&42);

        assert_eq!(*order.lock().unwrap(), vec![("a", 42), ("b", 42)]);
    }

    #[test]
    fn disconnect_removes_subscriber() {
        let signal: Signal<u32> = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = signal.connect(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        signal.emit(&1);
        signal.disconnect(id);
        signal.emit(&1);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let signal: Signal<u32> = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));
        signal.connect(|_| panic!("boom"));
        let c = count.clone();
        signal.connect(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        signal.emit(&1);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
