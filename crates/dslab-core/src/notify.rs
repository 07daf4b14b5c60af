//! Typed notification streams.
//!
//! A component exposing some observable state owns a [`Publisher`] and publishes `(time, value)`
//! records to it. Observers obtain a [`Subscription`] and drain the records at their own pace,
//! so no callbacks into observer code are made while the publisher is in the middle of processing an event.
//!
//! # Examples
//!
//! ```rust
//! use dslab_core::notify::Publisher;
//!
//! let mut publisher = Publisher::new();
//! let all = publisher.subscribe();
//! let even = publisher.subscribe_filtered(|value: &u32| value % 2 == 0);
//! publisher.publish(0.5, 1);
//! publisher.publish(1.0, 2);
//! assert_eq!(all.drain(), vec![(0.5, 1), (1.0, 2)]);
//! assert_eq!(even.drain(), vec![(1.0, 2)]);
//! assert!(all.is_empty());
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

type Queue<T> = Rc<RefCell<VecDeque<(f64, T)>>>;

struct Subscriber<T> {
    filter: Option<Box<dyn Fn(&T) -> bool>>,
    queue: Queue<T>,
}

/// Source side of a notification stream.
pub struct Publisher<T> {
    subscribers: Vec<Subscriber<T>>,
}

impl<T: Clone> Publisher<T> {
    /// Creates a publisher without subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Subscribes to all published records.
    pub fn subscribe(&mut self) -> Subscription<T> {
        self.add_subscriber(None)
    }

    /// Subscribes to records whose value satisfies the predicate.
    pub fn subscribe_filtered<F>(&mut self, filter: F) -> Subscription<T>
    where
        F: Fn(&T) -> bool + 'static,
    {
        self.add_subscriber(Some(Box::new(filter)))
    }

    fn add_subscriber(&mut self, filter: Option<Box<dyn Fn(&T) -> bool>>) -> Subscription<T> {
        let queue = Rc::new(RefCell::new(VecDeque::new()));
        self.subscribers.push(Subscriber {
            filter,
            queue: queue.clone(),
        });
        Subscription { queue }
    }

    /// Appends the record to every live subscription accepting it.
    pub fn publish(&mut self, time: f64, value: T) {
        // Subscriptions dropped by observers are pruned here.
        self.subscribers.retain(|s| Rc::strong_count(&s.queue) > 1);
        for subscriber in &self.subscribers {
            if subscriber.filter.as_ref().map_or(true, |f| f(&value)) {
                subscriber.queue.borrow_mut().push_back((time, value.clone()));
            }
        }
    }

    /// Returns true if there is at least one live subscription.
    pub fn has_subscribers(&self) -> bool {
        self.subscribers.iter().any(|s| Rc::strong_count(&s.queue) > 1)
    }
}

impl<T: Clone> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a notification stream.
pub struct Subscription<T> {
    queue: Queue<T>,
}

impl<T> Subscription<T> {
    /// Removes and returns all pending records in the order they were published.
    pub fn drain(&self) -> Vec<(f64, T)> {
        self.queue.borrow_mut().drain(..).collect()
    }

    /// Returns the number of pending records.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Returns true if there are no pending records.
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}
