use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{internal_error, ParseError, ParseResult};
use crate::util::{Deferred, EventEmitter, ListenerRegistration};

use super::client::ClientShared;
use super::object::ParseObject;
use super::query::LiveQuery;

#[derive(Clone, Debug, PartialEq)]
pub enum SubscriptionEvent {
    /// The server acknowledged the subscription.
    Open,
    Create(ParseObject),
    Update {
        object: ParseObject,
        original: Option<ParseObject>,
    },
    Enter {
        object: ParseObject,
        original: Option<ParseObject>,
    },
    Leave {
        object: ParseObject,
        original: Option<ParseObject>,
    },
    Delete(ParseObject),
    Error(ParseError),
    Close,
}

/// One live query registered with a [`LiveQueryClient`](super::LiveQueryClient).
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    id: u64,
    query: LiveQuery,
    session_token: Option<String>,
    subscribed: AtomicBool,
    unsubscribe_requested: AtomicBool,
    subscribed_ack: Deferred<ParseResult<()>>,
    unsubscribed_ack: Deferred<ParseResult<()>>,
    emitter: EventEmitter<SubscriptionEvent>,
    client: Weak<ClientShared>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        query: LiveQuery,
        session_token: Option<String>,
        client: Weak<ClientShared>,
    ) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                id,
                query,
                session_token,
                subscribed: AtomicBool::new(false),
                unsubscribe_requested: AtomicBool::new(false),
                subscribed_ack: Deferred::new(),
                unsubscribed_ack: Deferred::new(),
                emitter: EventEmitter::new(),
                client,
            }),
        }
    }

    /// Request id correlating this subscription with server frames.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn query(&self) -> &LiveQuery {
        &self.inner.query
    }

    pub fn session_token(&self) -> Option<&str> {
        self.inner.session_token.as_deref()
    }

    /// Whether the server currently acknowledges this subscription.
    pub fn is_subscribed(&self) -> bool {
        self.inner.subscribed.load(Ordering::SeqCst)
    }

    pub fn on<F>(&self, listener: F) -> ListenerRegistration
    where
        F: Fn(&SubscriptionEvent) + Send + Sync + 'static,
    {
        self.inner.emitter.on(listener)
    }

    /// Resolves once the server acknowledged the first `subscribe` frame, or
    /// with the error it answered with.
    pub async fn subscribed(&self) -> ParseResult<()> {
        self.inner
            .subscribed_ack
            .wait()
            .await
            .unwrap_or_else(|| Err(internal_error("subscription dropped before acknowledgement")))
    }

    /// Resolves once the server acknowledged the unsubscription.
    pub async fn unsubscribed(&self) -> ParseResult<()> {
        self.inner
            .unsubscribed_ack
            .wait()
            .await
            .unwrap_or_else(|| Err(internal_error("subscription dropped before acknowledgement")))
    }

    /// Asks the server to stop this subscription. It stays tracked until the
    /// server acknowledges.
    pub fn unsubscribe(&self) {
        if let Some(client) = self.inner.client.upgrade() {
            client.unsubscribe(self);
        }
    }

    pub(crate) fn emit(&self, event: SubscriptionEvent) {
        self.inner.emitter.emit(&event);
    }

    pub(crate) fn mark_subscribed(&self) {
        self.inner.subscribed.store(true, Ordering::SeqCst);
        self.inner.subscribed_ack.settle(Ok(()));
    }

    pub(crate) fn mark_unsubscribed(&self) {
        self.inner.subscribed.store(false, Ordering::SeqCst);
        self.inner.unsubscribed_ack.settle(Ok(()));
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.subscribed.store(false, Ordering::SeqCst);
    }

    pub(crate) fn request_unsubscribe(&self) {
        self.inner.unsubscribe_requested.store(true, Ordering::SeqCst);
    }

    /// Routes a server error to whichever acknowledgement is outstanding.
    pub(crate) fn reject(&self, error: ParseError) {
        if !self.inner.subscribed_ack.is_settled() {
            self.inner.subscribed_ack.settle(Err(error));
        } else if self.inner.unsubscribe_requested.load(Ordering::SeqCst) {
            self.inner.unsubscribed_ack.settle(Err(error));
        }
    }

    pub(crate) fn same_as(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("class_name", &self.inner.query.class_name())
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
