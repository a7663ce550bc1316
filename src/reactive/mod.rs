//! Thread-safe observables.
//!
//! An [`Observable`] holds a value behind an `Arc<RwLock>` and notifies
//! subscribed listeners on every write; a [`Notifier`] is the value-less
//! variant. Listeners run outside the lock (the listener list is snapshotted
//! first), so a listener may freely read the observable or subscribe others.

use std::sync::{Arc, RwLock, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Shared<T> {
    value: T,
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
}

/// A shared mutable value with change notifications. Cloning shares the
/// underlying value.
pub struct Observable<T> {
    inner: Arc<RwLock<Shared<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Shared {
                value,
                listeners: Vec::new(),
                next_id: 0,
            })),
        }
    }

    pub fn get(&self) -> T {
        self.inner
            .read()
            .expect("observable lock poisoned")
            .value
            .clone()
    }

    /// Register a listener called on every change. The listener keeps firing
    /// until the returned [`Subscription`] is cancelled; dropping the handle
    /// without cancelling leaves the listener attached.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let Ok(mut inner) = self.inner.write() else {
                log::error!("observable lock poisoned, dropping subscription");
                return Subscription { cancel: None };
            };
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push((id, Arc::new(listener)));
            id
        };
        let weak: Weak<RwLock<Shared<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if let Ok(mut inner) = inner.write() {
                        inner.listeners.retain(|(lid, _)| *lid != id);
                    }
                }
            })),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .read()
            .expect("observable lock poisoned")
            .listeners
            .len()
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Observable<T> {
    /// Replace the value. Listeners are notified with the new value only
    /// when it actually differs from the old one.
    pub fn set(&self, value: T) {
        let (current, listeners) = {
            let Ok(mut inner) = self.inner.write() else {
                log::error!("observable lock poisoned, dropping write");
                return;
            };
            if inner.value == value {
                return;
            }
            inner.value = value;
            (inner.value.clone(), inner.listeners.clone())
        };
        for (_, listener) in listeners {
            listener(&current);
        }
    }

    /// Mutate the value in place; notify only when the mutation changed it.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let (current, listeners) = {
            let Ok(mut inner) = self.inner.write() else {
                log::error!("observable lock poisoned, dropping update");
                return;
            };
            let before = inner.value.clone();
            f(&mut inner.value);
            if inner.value == before {
                return;
            }
            (inner.value.clone(), inner.listeners.clone())
        };
        for (_, listener) in listeners {
            listener(&current);
        }
    }
}

/// Cancellation handle for a registered listener.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Remove the listener. Idempotent; a no-op if the observable is gone.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// A value-less [`Observable`]: listeners only care that something happened.
#[derive(Clone)]
pub struct Notifier {
    inner: Observable<u64>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            inner: Observable::new(0),
        }
    }

    pub fn notify(&self) {
        self.inner.update(|n| *n = n.wrapping_add(1));
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.subscribe(move |_| listener())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
