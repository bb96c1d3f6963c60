//! Rust client for [Parse Server](https://parseplatform.org).
//!
//! The crate covers the two networked engines of a Parse client:
//!
//! * [`rest::RestController`] turns API calls into authenticated requests,
//!   retrying transient failures with exponential backoff and attaching an
//!   idempotency key to writes when [`config::ParseConfig::idempotency`] is on.
//! * [`live_query::LiveQueryClient`] keeps one websocket to the LiveQuery
//!   server, multiplexes subscriptions over it and replays them after a
//!   reconnect.
//!
//! [`task_queue::TaskQueue`] serialises asynchronous work against a shared
//! resource, and [`logger`] provides the named loggers used throughout.
//!
//! ```no_run
//! use std::sync::Arc;
//! use parse_rs_sdk::config::ParseConfig;
//! use parse_rs_sdk::rest::{Method, RequestOptions, RestController};
//! use serde_json::json;
//!
//! # async fn run() -> parse_rs_sdk::error::ParseResult<()> {
//! let config = Arc::new(
//!     ParseConfig::new("app-id", "https://api.example.com/parse").with_idempotency(true),
//! );
//! let rest = RestController::with_default_transport(config)?;
//! let created = rest
//!     .request(Method::POST, "classes/GameScore", json!({ "score": 1337 }), &RequestOptions::new())
//!     .await?;
//! println!("created {}", created["objectId"]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod live_query;
pub mod logger;
pub mod platform;
pub mod rest;
pub mod task_queue;
pub mod util;

#[cfg(all(test, not(target_arch = "wasm32")))]
pub mod test_support;
