use std::collections::HashMap;
use std::fmt;

use reqwest::{Method, Url};

use super::options::ProgressCallback;

/// One wire attempt handed to an [`HttpTransport`].
#[derive(Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Present only when the caller asked for progress; transports must not
    /// install progress machinery otherwise.
    pub progress: Option<ProgressCallback>,
}

impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lower-cased; values that were not valid text are omitted.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Failures raised before an HTTP status was received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, DNS failure, reset... treated like HTTP status 0.
    Network(String),
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Network(reason) => write!(f, "network failure: {reason}"),
            TransportError::Timeout => f.write_str("request timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Platform request primitive used by the REST controller.
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::ReqwestTransport;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use super::*;
    use crate::error::{internal_error, ParseResult};
    use crate::rest::options::{ProgressDirection, ProgressEvent};
    use bytes::Bytes;
    use futures_util::StreamExt;
    use reqwest::header::{HeaderMap, CONTENT_LENGTH};
    use reqwest::{Body, Client, Response};

    const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

    /// [`HttpTransport`] backed by an async `reqwest` client.
    #[derive(Clone, Debug)]
    pub struct ReqwestTransport {
        client: Client,
    }

    impl ReqwestTransport {
        pub fn new() -> ParseResult<Self> {
            let client = Client::builder()
                .user_agent(format!("parse-rs-sdk/{}", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|err| internal_error(format!("Failed to build HTTP client: {err}")))?;
            Ok(Self { client })
        }

        pub fn with_client(client: Client) -> Self {
            Self { client }
        }
    }

    #[async_trait::async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            let TransportRequest {
                method,
                url,
                headers,
                body,
                progress,
            } = request;

            let mut builder = self.client.request(method, url);
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            builder = match &progress {
                Some(progress) => {
                    let length = body.len();
                    builder
                        .header(CONTENT_LENGTH, length)
                        .body(upload_body(body, progress.clone()))
                }
                None => builder.body(body),
            };

            let response = builder.send().await.map_err(map_reqwest_error)?;
            let status = response.status().as_u16();
            let headers = collect_headers(response.headers());
            let body = match &progress {
                Some(progress) => read_with_progress(response, progress).await?,
                None => response.text().await.map_err(map_reqwest_error)?,
            };

            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        }
    }

    fn upload_body(body: String, progress: ProgressCallback) -> Body {
        let bytes = Bytes::from(body);
        let total = bytes.len() as u64;
        let chunks: Vec<Bytes> = (0..bytes.len())
            .step_by(UPLOAD_CHUNK_SIZE)
            .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK_SIZE).min(bytes.len())))
            .collect();

        let mut loaded = 0u64;
        let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
            loaded += chunk.len() as u64;
            progress(ProgressEvent::new(
                ProgressDirection::Upload,
                loaded,
                Some(total),
            ));
            Ok::<Bytes, std::io::Error>(chunk)
        }));
        Body::wrap_stream(stream)
    }

    async fn read_with_progress(
        response: Response,
        progress: &ProgressCallback,
    ) -> Result<String, TransportError> {
        let total = response.content_length();
        let mut loaded = 0u64;
        let mut buffer = Vec::with_capacity(total.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            loaded += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);
            progress(ProgressEvent::new(ProgressDirection::Download, loaded, total));
        }
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    fn collect_headers(map: &HeaderMap) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        for (name, value) in map.iter() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_owned());
            }
        }
        headers
    }

    fn map_reqwest_error(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}
