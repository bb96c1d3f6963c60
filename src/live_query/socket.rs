use std::sync::Arc;

use crate::error::ParseResult;

/// Lifecycle notifications produced by a socket, delivered in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(String),
    Close,
    Error(String),
}

pub type SocketEventSender = async_channel::Sender<SocketEvent>;

/// An open (or opening) duplex connection.
pub trait WebSocketConnection: Send + Sync {
    fn send(&self, message: String) -> ParseResult<()>;
    fn close(&self);
}

/// Opens connections to the LiveQuery server.
///
/// `open` returns immediately; the connection reports [`SocketEvent::Open`]
/// through `events` once the handshake finished.
pub trait WebSocketFactory: Send + Sync {
    fn open(&self, url: &str, events: SocketEventSender)
        -> ParseResult<Arc<dyn WebSocketConnection>>;
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::TungsteniteSocketFactory;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use super::*;
    use std::sync::LazyLock;

    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    use crate::error::connection_failed;
    use crate::logger::Logger;
    use crate::platform::runtime::spawn_detached;

    static SOCKET_LOGGER: LazyLock<Logger> =
        LazyLock::new(|| Logger::new("@parse/live_query/socket"));

    enum Outgoing {
        Text(String),
        Close,
    }

    /// Native websocket factory backed by `tokio-tungstenite`.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct TungsteniteSocketFactory;

    impl TungsteniteSocketFactory {
        pub fn new() -> Self {
            Self
        }
    }

    struct TungsteniteConnection {
        commands: async_channel::Sender<Outgoing>,
    }

    impl WebSocketConnection for TungsteniteConnection {
        fn send(&self, message: String) -> ParseResult<()> {
            self.commands
                .try_send(Outgoing::Text(message))
                .map_err(|_| connection_failed("LiveQuery socket is closed"))
        }

        fn close(&self) {
            let _ = self.commands.try_send(Outgoing::Close);
            self.commands.close();
        }
    }

    impl WebSocketFactory for TungsteniteSocketFactory {
        fn open(
            &self,
            url: &str,
            events: SocketEventSender,
        ) -> ParseResult<Arc<dyn WebSocketConnection>> {
            let (commands_tx, commands_rx) = async_channel::unbounded();
            let url = url.to_string();

            spawn_detached(async move {
                let stream = match connect_async(url.as_str()).await {
                    Ok((stream, _response)) => stream,
                    Err(err) => {
                        SOCKET_LOGGER.debug(format!("failed to connect to {url}: {err}"));
                        let _ = events.send(SocketEvent::Error(err.to_string())).await;
                        return;
                    }
                };
                let (mut sink, mut reader) = stream.split();
                let _ = events.send(SocketEvent::Open).await;

                spawn_detached(async move {
                    while let Ok(command) = commands_rx.recv().await {
                        match command {
                            Outgoing::Text(text) => {
                                if let Err(err) = sink.send(Message::Text(text)).await {
                                    SOCKET_LOGGER.warn(format!("failed to send frame: {err}"));
                                    break;
                                }
                            }
                            Outgoing::Close => break,
                        }
                    }
                    let _ = sink.close().await;
                });

                while let Some(message) = reader.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            if events.send(SocketEvent::Message(text)).await.is_err() {
                                return;
                            }
                        }
                        Ok(Message::Binary(payload)) => match String::from_utf8(payload) {
                            Ok(text) => {
                                if events.send(SocketEvent::Message(text)).await.is_err() {
                                    return;
                                }
                            }
                            Err(_) => SOCKET_LOGGER.warn("dropping non-UTF8 binary frame"),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            let _ = events.send(SocketEvent::Error(err.to_string())).await;
                            return;
                        }
                    }
                }
                let _ = events.send(SocketEvent::Close).await;
            });

            Ok(Arc::new(TungsteniteConnection {
                commands: commands_tx,
            }))
        }
    }
}
