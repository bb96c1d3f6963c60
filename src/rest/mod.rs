//! REST access to Parse Server.
//!
//! [`RestController`] is the entry point. It serialises calls into the Parse
//! request envelope, hands them to an [`HttpTransport`] and retries transient
//! failures with exponential backoff.

mod controller;
mod options;
mod transport;

pub use controller::{BatchOperation, RestController, CLIENT_VERSION, REQUEST_ID_HEADER};
pub use options::{ProgressCallback, ProgressDirection, ProgressEvent, RequestOptions};
#[cfg(not(target_arch = "wasm32"))]
pub use transport::ReqwestTransport;
pub use transport::{HttpTransport, TransportError, TransportRequest, TransportResponse};

pub use reqwest::Method;
