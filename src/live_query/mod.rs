//! Real-time subscriptions over the Parse LiveQuery websocket protocol.
//!
//! A [`LiveQueryClient`] owns one socket and multiplexes every [`Subscription`]
//! over it. Object events are rehydrated through an [`ObjectDecoder`] and
//! delivered to listeners registered with [`Subscription::on`].
//!
//! ```no_run
//! use parse_rs_sdk::config::ParseConfig;
//! use parse_rs_sdk::live_query::{LiveQuery, LiveQueryClient, SubscriptionEvent};
//!
//! # async fn run() -> parse_rs_sdk::error::ParseResult<()> {
//! let config = ParseConfig::new("app-id", "https://api.example.com/parse");
//! let client = LiveQueryClient::from_config(&config)?;
//! let subscription = client.subscribe(LiveQuery::new("GameScore").where_equal_to("level", 3), None);
//! subscription.on(|event| {
//!     if let SubscriptionEvent::Create(object) = event {
//!         println!("new score {:?}", object.get("score"));
//!     }
//! });
//! subscription.subscribed().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod object;
mod protocol;
mod query;
mod socket;
mod subscription;

pub use client::{ClientEvent, ClientState, LiveQueryClient, LiveQueryClientOptions};
pub use object::{CachedObjectDecoder, ObjectDecoder, ObjectPayload, ParseObject};
pub use protocol::{ClientMessage, EventFrame, EventKind, QueryFrame, ServerMessage};
pub use query::LiveQuery;
#[cfg(not(target_arch = "wasm32"))]
pub use socket::TungsteniteSocketFactory;
pub use socket::{SocketEvent, SocketEventSender, WebSocketConnection, WebSocketFactory};
pub use subscription::{Subscription, SubscriptionEvent};
