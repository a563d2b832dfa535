//! Snapshot-and-subscribe state cell shared by the state containers.

use std::sync::{Arc, Mutex, PoisonError, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: T,
    listeners: Vec<(u64, Listener<T>)>,
    next_listener_id: u64,
}

/// A value plus the callbacks watching it. Clones share the same cell.
pub struct Observable<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default + Clone> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value,
                listeners: Vec::new(),
                next_listener_id: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> T {
        self.lock().value.clone()
    }

    /// Registers `listener` and immediately calls it with the current value.
    pub fn subscribe<F>(&self, listener: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let listener: Listener<T> = Arc::new(listener);
        let (id, current) = {
            let mut inner = self.lock();
            let id = inner.next_listener_id;
            inner.next_listener_id += 1;
            inner.listeners.push((id, Arc::clone(&listener)));
            (id, inner.value.clone())
        };
        listener(&current);
        Subscription {
            cell: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    /// Applies `mutate` and notifies listeners. Listeners run after the lock is
    /// released, so they may read or update the cell themselves.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> R {
        let (result, current, listeners) = {
            let mut inner = self.lock();
            let result = mutate(&mut inner.value);
            let listeners: Vec<Listener<T>> = inner
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            (result, inner.value.clone(), listeners)
        };
        for listener in listeners {
            listener(&current);
        }
        result
    }

    pub fn set(&self, value: T) {
        self.update(|current| *current = value);
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }
}

/// Detaches its listener when dropped or explicitly unsubscribed.
pub struct Subscription<T> {
    cell: Weak<Mutex<Inner<T>>>,
    id: Option<u64>,
}

impl<T> Subscription<T> {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if let Some(cell) = self.cell.upgrade() {
            let mut inner = cell.lock().unwrap_or_else(PoisonError::into_inner);
            inner.listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.detach();
    }
}
