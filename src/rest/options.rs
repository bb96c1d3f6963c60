use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressDirection {
    Upload,
    Download,
}

impl ProgressDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressDirection::Upload => "upload",
            ProgressDirection::Download => "download",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressEvent {
    pub direction: ProgressDirection,
    pub loaded: u64,
    pub total: Option<u64>,
    /// `loaded / total` in `0.0..=1.0`, or `None` when the total size is unknown.
    pub fraction: Option<f64>,
}

impl ProgressEvent {
    pub fn new(direction: ProgressDirection, loaded: u64, total: Option<u64>) -> Self {
        let fraction = match total {
            Some(total) if total > 0 => Some((loaded as f64 / total as f64).min(1.0)),
            _ => None,
        };
        Self {
            direction,
            loaded,
            total,
            fraction,
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync + 'static>;

/// Per-call flags accepted by [`RestController`](super::RestController).
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub use_master_key: bool,
    pub use_maintenance_key: bool,
    pub session_token: Option<String>,
    pub installation_id: Option<String>,
    /// Adds `_status` and `_headers` to the resolved payload.
    pub return_status: bool,
    pub progress: Option<ProgressCallback>,
    pub context: Option<JsonValue>,
    pub abort: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_master_key(mut self) -> Self {
        self.use_master_key = true;
        self
    }

    pub fn with_maintenance_key(mut self) -> Self {
        self.use_maintenance_key = true;
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_installation_id(mut self, id: impl Into<String>) -> Self {
        self.installation_id = Some(id.into());
        self
    }

    pub fn with_return_status(mut self) -> Self {
        self.return_status = true;
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("use_master_key", &self.use_master_key)
            .field("use_maintenance_key", &self.use_maintenance_key)
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("installation_id", &self.installation_id)
            .field("return_status", &self.return_status)
            .field("progress", &self.progress.is_some())
            .field("context", &self.context)
            .field("abort", &self.abort.is_some())
            .finish()
    }
}
