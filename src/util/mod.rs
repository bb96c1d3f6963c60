pub mod backoff;
pub mod deferred;
pub mod emitter;
pub mod request_id;

pub use backoff::{reconnect_interval, RetryPolicy, RetryState};
pub use deferred::Deferred;
pub use emitter::{EventEmitter, ListenerRegistration};
pub use request_id::generate_request_id;
