use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::error::{connection_failed, ParseResult};
use crate::live_query::{SocketEvent, SocketEventSender, WebSocketConnection, WebSocketFactory};

/// Socket driven by the test: frames the client sends are recorded, server
/// frames are injected with [`MockSocket::server_send`].
pub struct MockSocket {
    pub url: String,
    events: SocketEventSender,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockSocket {
    pub fn accept(&self) {
        let _ = self.events.try_send(SocketEvent::Open);
    }

    pub fn server_send(&self, frame: JsonValue) {
        let _ = self.events.try_send(SocketEvent::Message(frame.to_string()));
    }

    pub fn server_send_raw(&self, text: &str) {
        let _ = self.events.try_send(SocketEvent::Message(text.to_string()));
    }

    pub fn drop_connection(&self) {
        let _ = self.events.try_send(SocketEvent::Close);
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.events.try_send(SocketEvent::Error(reason.to_string()));
    }

    pub fn sent_frames(&self) -> Vec<JsonValue> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// Frames with the given `op`, in send order.
    pub fn sent_ops(&self, op: &str) -> Vec<JsonValue> {
        self.sent_frames()
            .into_iter()
            .filter(|frame| frame["op"] == op)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl WebSocketConnection for MockSocket {
    fn send(&self, message: String) -> ParseResult<()> {
        if self.is_closed() {
            return Err(connection_failed("socket closed"));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockSocketFactory {
    sockets: Mutex<Vec<Arc<MockSocket>>>,
}

impl MockSocketFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connections(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn socket(&self, index: usize) -> Arc<MockSocket> {
        self.sockets.lock().unwrap()[index].clone()
    }

    pub fn latest(&self) -> Arc<MockSocket> {
        self.sockets.lock().unwrap().last().cloned().unwrap()
    }
}

impl WebSocketFactory for MockSocketFactory {
    fn open(
        &self,
        url: &str,
        events: SocketEventSender,
    ) -> ParseResult<Arc<dyn WebSocketConnection>> {
        let socket = Arc::new(MockSocket {
            url: url.to_string(),
            events,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.sockets.lock().unwrap().push(socket.clone());
        Ok(socket)
    }
}

/// Polls `condition` until it holds, yielding to spawned tasks in between.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
