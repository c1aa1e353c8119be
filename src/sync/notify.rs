use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;

type Listener<T> = Box<dyn FnMut(T) + Send>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

impl<T: Clone> Listeners<T> {
    fn notify(&mut self, snapshot: &T) {
        for (_, listener) in self.entries.iter_mut() {
            listener(snapshot.clone());
        }
    }
}

/// Status channel shared by the queue and the sync manager.
///
/// Receivers from [`StatusFeed::subscribe`] only ever see the latest value.
/// Listeners registered with [`StatusFeed::listen`] are called on the
/// publishing thread with every snapshot, in publish order; a listener must
/// not publish to or listen on the feed that calls it.
pub struct StatusFeed<T> {
    sender: watch::Sender<T>,
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T> StatusFeed<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender,
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn current(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Replace the snapshot and notify subscribers
    pub fn publish(&self, value: T) {
        let mut listeners = lock(&self.listeners);
        self.sender.send_replace(value.clone());
        listeners.notify(&value);
    }

    /// Modify the snapshot in place and notify subscribers
    pub fn update<F: FnOnce(&mut T)>(&self, apply: F) {
        let mut listeners = lock(&self.listeners);
        self.sender.send_modify(apply);
        let snapshot = self.current();
        listeners.notify(&snapshot);
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Call `listener` with the current snapshot now and with every snapshot
    /// published afterwards.
    pub fn listen<F>(&self, mut listener: F) -> Subscription
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut listeners = lock(&self.listeners);
        listener(self.current());

        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Box::new(listener)));

        let registry: Weak<Mutex<Listeners<T>>> = Arc::downgrade(&self.listeners);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    lock(&registry).entries.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }
}

fn lock<T>(listeners: &Mutex<Listeners<T>>) -> MutexGuard<'_, Listeners<T>> {
    // A panicking listener leaves the list itself intact
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Active listener registration; unsubscribes when dropped
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
