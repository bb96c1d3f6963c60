use std::sync::Mutex;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

/// A one-shot value that is settled from outside the task awaiting it.
///
/// Any number of waiters may call [`Deferred::wait`]; all of them observe the
/// same value. Settling twice is a no-op and reports `false`.
pub struct Deferred<T: Clone> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
    receiver: Shared<oneshot::Receiver<T>>,
}

impl<T: Clone> Deferred<T> {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: receiver.shared(),
        }
    }

    pub fn settle(&self, value: T) -> bool {
        match self.sender.lock().unwrap().take() {
            Some(sender) => sender.send(value).is_ok(),
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.sender.lock().unwrap().is_none()
    }

    /// Resolves to `None` if the deferred is dropped before being settled.
    pub fn wait(&self) -> impl std::future::Future<Output = Option<T>> + Send + 'static
    where
        T: Send + Sync + 'static,
    {
        let receiver = self.receiver.clone();
        async move { receiver.await.ok() }
    }
}

impl<T: Clone> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}
