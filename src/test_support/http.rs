use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use httpmock::MockServer;

use crate::rest::{HttpTransport, TransportError, TransportRequest, TransportResponse};

/// Start a fresh `httpmock::MockServer`, or `None` when the sandbox forbids binding a port.
pub fn try_start_mock_server() -> Option<MockServer> {
    panic::catch_unwind(AssertUnwindSafe(MockServer::start)).ok()
}

/// What a [`ScriptedTransport`] does with the next request it receives.
#[derive(Clone, Debug)]
pub enum Reply {
    Respond(TransportResponse),
    Fail(TransportError),
    /// Never completes; used to exercise abort and timeout paths.
    Hang,
}

impl Reply {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Reply::Respond(TransportResponse::new(status, body))
    }
}

/// A request as observed by the transport.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub has_progress: bool,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// In-memory [`HttpTransport`] replaying a fixed script of replies.
///
/// Once the script runs out, the last reply is repeated.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    last: Arc<Mutex<Option<Reply>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().collect())),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_reply(&self) -> Reply {
        let mut last = self.last.lock().unwrap();
        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last
                .clone()
                .unwrap_or_else(|| Reply::status(200, "{}")),
        }
    }
}

#[async_trait::async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: request.method.to_string(),
            url: request.url.to_string(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            has_progress: request.progress.is_some(),
        });

        match self.next_reply() {
            Reply::Respond(response) => Ok(response),
            Reply::Fail(err) => Err(err),
            Reply::Hang => futures::future::pending().await,
        }
    }
}
