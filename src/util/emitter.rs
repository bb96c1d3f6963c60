use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

/// Observer registry used for client and subscription lifecycle events.
///
/// Listeners are invoked in registration order, outside of any internal lock,
/// so a listener may register or remove listeners itself.
pub struct EventEmitter<E> {
    next_id: AtomicU64,
    listeners: Arc<Mutex<Vec<(u64, Listener<E>)>>>,
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn on<F>(&self, listener: F) -> ListenerRegistration
    where
        F: Fn(&E) + Send + Sync + 'static,
        E: 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, Arc::new(listener)));
        let weak: Weak<Mutex<Vec<(u64, Listener<E>)>>> = Arc::downgrade(&self.listeners);
        ListenerRegistration {
            remove: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    listeners.lock().unwrap().retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle returned by [`EventEmitter::on`]. Dropping it keeps the listener attached.
pub struct ListenerRegistration {
    remove: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl ListenerRegistration {
    pub fn remove(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration").finish_non_exhaustive()
    }
}
