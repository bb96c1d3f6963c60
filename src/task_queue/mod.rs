//! FIFO execution of asynchronous work against a shared resource.
//!
//! Each [`TaskQueue`] runs its entries strictly one after another: entry `n + 1`
//! is started only once entry `n` has settled, whatever its outcome. Separate
//! queues are independent and run concurrently.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock, Mutex};
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::error::{internal_error, ParseResult};
use crate::logger::Logger;
use crate::platform::runtime::spawn_detached;

static TASK_QUEUE_LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@parse/task_queue"));

#[derive(Clone, Debug, Default)]
pub struct TaskQueue {
    inner: Arc<Mutex<QueueState>>,
}

#[derive(Debug, Default)]
struct QueueState {
    outstanding: usize,
    tail: Option<oneshot::Receiver<()>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries that have not settled yet, the running one included.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().outstanding
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `factory` to the queue.
    ///
    /// When the queue is idle the factory is invoked before this call returns;
    /// otherwise it is invoked once every earlier entry has settled. The work
    /// runs in the background whether or not the returned handle is awaited.
    pub fn enqueue<F, Fut, T>(&self, factory: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ParseResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel();

        let previous = {
            let mut state = self.inner.lock().unwrap();
            let previous = state.tail.replace(done_rx);
            let idle = state.outstanding == 0;
            state.outstanding += 1;
            if idle {
                None
            } else {
                previous
            }
        };

        let guard = SettleGuard {
            queue: self.inner.clone(),
            done: Some(done_tx),
        };

        match previous {
            None => {
                let work = factory();
                spawn_detached(async move {
                    let result = work.await;
                    drop(guard);
                    let _ = result_tx.send(result);
                });
            }
            Some(previous) => {
                spawn_detached(async move {
                    if previous.await.is_err() {
                        TASK_QUEUE_LOGGER.debug("previous queue entry was dropped before settling");
                    }
                    let result = factory().await;
                    drop(guard);
                    let _ = result_tx.send(result);
                });
            }
        }

        TaskHandle {
            receiver: result_rx,
        }
    }
}

/// Releases the next queue entry when the current one settles, even if its task is torn down.
struct SettleGuard {
    queue: Arc<Mutex<QueueState>>,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.queue.lock() {
            state.outstanding = state.outstanding.saturating_sub(1);
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// Resolves with the outcome of a queued task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<ParseResult<T>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = ParseResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(internal_error(
                "queued task was dropped before it settled",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
