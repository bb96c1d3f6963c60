use std::sync::{Arc, LazyLock};

use futures::future::{select, Either};
use once_cell::sync::OnceCell;
use reqwest::{Method, Url};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::config::ParseConfig;
use crate::error::{
    connection_failed, internal_error, invalid_json, not_initialized, timeout, usage_error,
    ParseError, ParseErrorCode, ParseResult,
};
use crate::logger::Logger;
use crate::platform::runtime::{sleep, with_timeout};
use crate::util::{generate_request_id, RetryPolicy, RetryState};

use super::options::RequestOptions;
use super::transport::{HttpTransport, TransportError, TransportRequest, TransportResponse};

static REST_LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@parse/rest"));

pub const REQUEST_ID_HEADER: &str = "X-Parse-Request-Id";
const JOB_STATUS_HEADER: &str = "x-parse-job-status-id";
const PUSH_STATUS_HEADER: &str = "x-parse-push-status-id";
const EXPOSE_HEADERS_HEADER: &str = "access-control-expose-headers";

/// Value sent as `_ClientVersion`.
pub const CLIENT_VERSION: &str = concat!("rust", env!("CARGO_PKG_VERSION"));

/// One entry of a `/batch` request.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOperation {
    pub method: Method,
    /// Path relative to the server mount point, e.g. `classes/GameScore/abc`.
    pub path: String,
    pub body: JsonValue,
}

impl BatchOperation {
    pub fn new(method: Method, path: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }
}

/// Turns API calls into authenticated, retried HTTP requests against Parse Server.
///
/// [`execute`](Self::execute) is the reliable request engine: it owns retry with
/// exponential backoff, the idempotency key and response normalisation.
/// [`request`](Self::request) wraps a call body in the envelope the server expects
/// (keys, installation id, session token) and tunnels every verb through POST.
#[derive(Clone)]
pub struct RestController {
    inner: Arc<RestInner>,
}

struct RestInner {
    config: Arc<ParseConfig>,
    transport: Arc<dyn HttpTransport>,
    installation_id: OnceCell<String>,
}

enum Attempt {
    Completed(Result<TransportResponse, TransportError>),
    Aborted,
}

impl RestController {
    pub fn new(config: Arc<ParseConfig>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            inner: Arc::new(RestInner {
                config,
                transport,
                installation_id: OnceCell::new(),
            }),
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn with_default_transport(config: Arc<ParseConfig>) -> ParseResult<Self> {
        let transport = super::transport::ReqwestTransport::new()?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &ParseConfig {
        &self.inner.config
    }

    /// Installation id sent with every request: the configured one, or one generated
    /// on first use and kept for the lifetime of this controller.
    pub fn installation_id(&self) -> &str {
        self.inner.installation_id.get_or_init(|| {
            self.inner
                .config
                .installation_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(generate_request_id)
        })
    }

    /// Sends `body` to `path_or_url` as-is, retrying transient failures.
    ///
    /// `path_or_url` is either an absolute `http(s)` URL or a path appended to the
    /// configured server URL. Blank bodies are sent as `{}`.
    pub async fn execute(
        &self,
        method: Method,
        path_or_url: &str,
        body: impl Into<String>,
        options: &RequestOptions,
    ) -> ParseResult<JsonValue> {
        self.dispatch(method.clone(), &method, path_or_url, body.into(), options)
            .await
    }

    /// Issues a Parse API call: builds the request envelope around `data` and
    /// posts it to `path` through [`execute`](Self::execute)'s retry loop.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        data: JsonValue,
        options: &RequestOptions,
    ) -> ParseResult<JsonValue> {
        let payload = self.build_envelope(&method, data, options)?;
        let body = serde_json::to_string(&JsonValue::Object(payload))
            .map_err(|err| internal_error(format!("Failed to encode request body: {err}")))?;
        self.dispatch(Method::POST, &method, path, body, options)
            .await
    }

    /// Runs `operations` through the `batch` endpoint, `request_batch_size` at a time.
    ///
    /// The outer result fails when a chunk could not be delivered; individual
    /// operations report their own outcome in the returned vector, in input order.
    pub async fn batch(
        &self,
        operations: Vec<BatchOperation>,
        options: &RequestOptions,
    ) -> ParseResult<Vec<ParseResult<JsonValue>>> {
        let mount = self.config().server_mount_path();
        let chunk_size = self.config().request_batch_size.max(1);
        let mut results = Vec::with_capacity(operations.len());

        for chunk in operations.chunks(chunk_size) {
            let requests: Vec<JsonValue> = chunk
                .iter()
                .map(|operation| {
                    json!({
                        "method": operation.method.as_str(),
                        "path": format!("{mount}/{}", operation.path.trim_start_matches('/')),
                        "body": operation.body,
                    })
                })
                .collect();

            let response = self
                .request(Method::POST, "batch", json!({ "requests": requests }), options)
                .await?;
            let items = response
                .as_array()
                .ok_or_else(|| invalid_json("Batch response is not a JSON array"))?;
            if items.len() != chunk.len() {
                return Err(invalid_json(format!(
                    "Batch response has {} entries for {} operations",
                    items.len(),
                    chunk.len()
                )));
            }
            results.extend(items.iter().map(batch_item_result));
        }

        Ok(results)
    }

    fn build_envelope(
        &self,
        method: &Method,
        data: JsonValue,
        options: &RequestOptions,
    ) -> ParseResult<JsonMap<String, JsonValue>> {
        let config = self.config();
        config.validate()?;

        let mut payload = match data {
            JsonValue::Object(map) => map,
            JsonValue::Null => JsonMap::new(),
            other => {
                return Err(usage_error(format!(
                    "Request data must be a JSON object, got {other}"
                )))
            }
        };

        if let Some(context) = &options.context {
            payload.insert("_context".into(), context.clone());
        }
        if *method != Method::POST {
            payload.insert("_method".into(), JsonValue::String(method.as_str().into()));
        }
        payload.insert(
            "_ApplicationId".into(),
            JsonValue::String(config.application_id.clone()),
        );
        if let Some(key) = &config.javascript_key {
            payload.insert("_JavaScriptKey".into(), JsonValue::String(key.clone()));
        }
        payload.insert(
            "_ClientVersion".into(),
            JsonValue::String(CLIENT_VERSION.into()),
        );

        if options.use_master_key {
            let key = config
                .master_key
                .as_ref()
                .ok_or_else(|| usage_error("Cannot use the Master Key, it has not been provided."))?;
            payload.remove("_JavaScriptKey");
            payload.insert("_MasterKey".into(), JsonValue::String(key.clone()));
        }
        if options.use_maintenance_key {
            let key = config.maintenance_key.as_ref().ok_or_else(|| {
                usage_error("Cannot use the Maintenance Key, it has not been provided.")
            })?;
            payload.remove("_JavaScriptKey");
            payload.insert("_MaintenanceKey".into(), JsonValue::String(key.clone()));
        }

        if config.force_revocable_session {
            payload.insert("_RevocableSession".into(), JsonValue::String("1".into()));
        }

        let installation_id = options
            .installation_id
            .clone()
            .unwrap_or_else(|| self.installation_id().to_string());
        payload.insert(
            "_InstallationId".into(),
            JsonValue::String(installation_id),
        );

        if let Some(token) = &options.session_token {
            payload.insert("_SessionToken".into(), JsonValue::String(token.clone()));
        }

        Ok(payload)
    }

    async fn dispatch(
        &self,
        wire_method: Method,
        logical_method: &Method,
        path_or_url: &str,
        body: String,
        options: &RequestOptions,
    ) -> ParseResult<JsonValue> {
        let url = self.resolve_url(path_or_url)?;
        let body = if body.trim().is_empty() {
            "{}".to_string()
        } else {
            body
        };

        // Resolved once so every retry of this call carries the same key.
        let request_id = (self.config().idempotency && is_unsafe_method(logical_method))
            .then(generate_request_id);
        let headers = self.build_headers(request_id.as_deref());

        let mut retry = RetryState::new(RetryPolicy::new(
            self.config().retry_base_delay,
            self.config().request_attempt_limit,
        ));

        loop {
            retry.begin_attempt();
            let request = TransportRequest {
                method: wire_method.clone(),
                url: url.clone(),
                headers: headers.clone(),
                body: body.clone(),
                progress: options.progress.clone(),
            };

            let outcome = match self.send_once(request, options).await {
                Attempt::Aborted => {
                    REST_LOGGER.debug(format!("{wire_method} {url} aborted"));
                    return Ok(JsonValue::Object(JsonMap::new()));
                }
                Attempt::Completed(outcome) => outcome,
            };

            let failure = match outcome {
                Ok(response) => match response.status {
                    200..=299 => return finish_success(response, options.return_status),
                    0 | 500..=u16::MAX => format!("server responded with status {}", response.status),
                    100..=199 => {
                        return Err(ParseError::new(
                            ParseErrorCode::OtherCause,
                            format!("Unexpected informational response status {}", response.status),
                        ))
                    }
                    _ => return Err(error_from_response(&response)),
                },
                Err(TransportError::Timeout) => {
                    return Err(timeout(format!("{wire_method} {url} timed out")));
                }
                Err(TransportError::Network(reason)) => reason,
            };

            retry.record_failure(failure);
            if !retry.can_retry() {
                let reason = retry.last_error().unwrap_or_default().to_string();
                REST_LOGGER.warn(format!(
                    "giving up on {wire_method} {url} after {} attempts: {reason}",
                    retry.attempts()
                ));
                return Err(connection_failed(format!(
                    "Unable to connect to the Parse API after {} attempts: {reason}",
                    retry.attempts()
                )));
            }

            let delay = retry.next_delay();
            REST_LOGGER.debug(format!(
                "attempt {} of {wire_method} {url} failed, retrying in {delay:?}",
                retry.attempts()
            ));
            sleep(delay).await;

            if options.abort.as_ref().is_some_and(|token| token.is_cancelled()) {
                return Ok(JsonValue::Object(JsonMap::new()));
            }
        }
    }

    async fn send_once(&self, request: TransportRequest, options: &RequestOptions) -> Attempt {
        let transport = self.inner.transport.clone();
        let limit = self.config().request_timeout;
        let send = async move {
            match limit {
                Some(limit) => with_timeout(transport.send(request), limit)
                    .await
                    .unwrap_or(Err(TransportError::Timeout)),
                None => transport.send(request).await,
            }
        };

        match &options.abort {
            Some(token) => {
                if token.is_cancelled() {
                    return Attempt::Aborted;
                }
                let send = std::pin::pin!(send);
                let cancelled = std::pin::pin!(token.cancelled());
                match select(send, cancelled).await {
                    Either::Left((outcome, _)) => Attempt::Completed(outcome),
                    Either::Right(((), _)) => Attempt::Aborted,
                }
            }
            None => Attempt::Completed(send.await),
        }
    }

    fn resolve_url(&self, path_or_url: &str) -> ParseResult<Url> {
        let raw = if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            let server = self.config().server_url.trim();
            if server.is_empty() {
                return Err(not_initialized(
                    "You need to set a server URL before talking to Parse Server",
                ));
            }
            format!(
                "{}/{}",
                server.trim_end_matches('/'),
                path_or_url.trim_start_matches('/')
            )
        };
        Url::parse(&raw).map_err(|err| usage_error(format!("Invalid request URL '{raw}': {err}")))
    }

    fn build_headers(&self, request_id: Option<&str>) -> Vec<(String, String)> {
        let config = self.config();
        let mut headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
        if let Some(authorization) = config.authorization_header() {
            headers.push(("Authorization".to_string(), authorization));
        }
        for (name, value) in &config.request_headers {
            headers.push((name.clone(), value.clone()));
        }
        if let Some(id) = request_id {
            headers.push((REQUEST_ID_HEADER.to_string(), id.to_string()));
        }
        headers
    }
}

impl std::fmt::Debug for RestController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestController")
            .field("server_url", &self.config().server_url)
            .field("application_id", &self.config().application_id)
            .finish()
    }
}

/// Verbs that create or overwrite state and therefore carry an idempotency key.
fn is_unsafe_method(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT
}

fn finish_success(response: TransportResponse, return_status: bool) -> ParseResult<JsonValue> {
    let mut payload: JsonValue = serde_json::from_str(&response.body).map_err(|err| {
        invalid_json(format!(
            "Invalid JSON in a successful response (status {}): {err}",
            response.status
        ))
    })?;

    if return_status {
        if let JsonValue::Object(map) = &mut payload {
            map.insert("_status".into(), JsonValue::from(response.status));
            map.insert("_headers".into(), JsonValue::Object(exposed_headers(&response)));
        }
    }
    Ok(payload)
}

fn exposed_headers(response: &TransportResponse) -> JsonMap<String, JsonValue> {
    let mut names = vec![JOB_STATUS_HEADER.to_string(), PUSH_STATUS_HEADER.to_string()];
    if let Some(exposed) = response.header(EXPOSE_HEADERS_HEADER) {
        names.extend(
            exposed
                .split(',')
                .map(|name| name.trim().to_ascii_lowercase())
                .filter(|name| !name.is_empty()),
        );
    }

    let mut headers = JsonMap::new();
    for name in names {
        if let Some(value) = response.header(&name) {
            headers.insert(name, JsonValue::String(value.to_string()));
        }
    }
    headers
}

fn error_from_response(response: &TransportResponse) -> ParseError {
    if response.body.trim().is_empty() {
        return connection_failed(format!(
            "Request failed with status {} and an empty body",
            response.status
        ));
    }

    match serde_json::from_str::<JsonValue>(&response.body) {
        Ok(value) => ParseError::from_envelope(&value).unwrap_or_else(|| {
            ParseError::new(
                ParseErrorCode::OtherCause,
                format!("Request failed with status {}: {}", response.status, response.body),
            )
        }),
        Err(_) => invalid_json(format!(
            "Received an error with invalid JSON from Parse: {}",
            response.body
        )),
    }
}

fn batch_item_result(item: &JsonValue) -> ParseResult<JsonValue> {
    if let Some(success) = item.get("success") {
        return Ok(success.clone());
    }
    match item.get("error") {
        Some(error) => Err(ParseError::from_envelope(error).unwrap_or_else(|| {
            ParseError::new(ParseErrorCode::OtherCause, error.to_string())
        })),
        None => Err(invalid_json(format!("Malformed batch response entry: {item}"))),
    }
}
