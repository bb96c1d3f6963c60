//! Test utilities shared across crate-level unit tests.

pub mod http;
pub mod socket;

pub use http::{try_start_mock_server, RecordedRequest, Reply, ScriptedTransport};
pub use socket::{eventually, MockSocket, MockSocketFactory};
