use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};
use url::Url;

use crate::error::GatewayError;

/// An open transport, seen from the connection manager.
///
/// Text frames are written to `outgoing` and read from `incoming`. The
/// transport is closed when `incoming` yields `None`; dropping the `Link`
/// closes it from our side.
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Opens transports. The WebSocket implementation is [`WsConnector`]; tests
/// swap in an in-memory one.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: Url) -> impl Future<Output = Result<Link, GatewayError>> + Send;
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, url: Url) -> Result<Link, GatewayError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<String>();

        // Pump between the socket and the link. Ends when either side goes away;
        // dropping `incoming_tx` is what tells the manager the socket closed.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = outgoing_rx.recv() => {
                        let Some(text) = outgoing else {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        };
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            debug!(error = %e, "WebSocket write failed");
                            break;
                        }
                    }
                    incoming = source.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if incoming_tx.send(text.as_str().to_owned()).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                debug!(?frame, "WebSocket closed by server");
                                break;
                            }
                            Some(Ok(Message::Binary(data))) => {
                                trace!(len = data.len(), "Ignoring binary frame");
                            }
                            // Pings are answered by tungstenite itself
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                debug!(error = %e, "WebSocket read failed");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(Link {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod memory {
    //! In-process transport: every dial shows up on a [`MemoryServer`].

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use url::Url;

    use super::{Connector, Link};
    use crate::error::GatewayError;

    struct Shared {
        accept_tx: mpsc::UnboundedSender<MemoryPeer>,
        refusing: AtomicBool,
        attempts: Mutex<Vec<(Instant, Url)>>,
    }

    #[derive(Clone)]
    pub struct MemoryConnector {
        shared: Arc<Shared>,
    }

    pub struct MemoryServer {
        shared: Arc<Shared>,
        accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    }

    /// Server end of one accepted connection.
    pub struct MemoryPeer {
        pub url: Url,
        to_client: mpsc::UnboundedSender<String>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    impl MemoryConnector {
        pub fn new() -> (Self, MemoryServer) {
            let (accept_tx, accept_rx) = mpsc::unbounded_channel();
            let shared = Arc::new(Shared {
                accept_tx,
                refusing: AtomicBool::new(false),
                attempts: Mutex::new(Vec::new()),
            });
            (
                Self {
                    shared: shared.clone(),
                },
                MemoryServer { shared, accept_rx },
            )
        }
    }

    impl Connector for MemoryConnector {
        async fn connect(&self, url: Url) -> Result<Link, GatewayError> {
            self.shared
                .attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((Instant::now(), url.clone()));

            if self.shared.refusing.load(Ordering::SeqCst) {
                return Err(GatewayError::Refused(url.to_string()));
            }

            let (to_client, incoming) = mpsc::unbounded_channel();
            let (outgoing, from_client) = mpsc::unbounded_channel();
            let peer = MemoryPeer {
                url: url.clone(),
                to_client,
                from_client,
            };
            self.shared
                .accept_tx
                .send(peer)
                .map_err(|_| GatewayError::Refused(url.to_string()))?;

            Ok(Link { outgoing, incoming })
        }
    }

    impl MemoryServer {
        /// Wait for the next successful dial.
        pub async fn accept(&mut self) -> Option<MemoryPeer> {
            self.accept_rx.recv().await
        }

        /// Make every following dial fail.
        pub fn set_refusing(&self, refusing: bool) {
            self.shared.refusing.store(refusing, Ordering::SeqCst);
        }

        /// When each dial happened, accepted or not.
        pub fn attempts(&self) -> Vec<Instant> {
            self.shared
                .attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(at, _)| *at)
                .collect()
        }

        pub fn attempt_count(&self) -> usize {
            self.shared
                .attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }
    }

    impl MemoryPeer {
        /// Push a raw text frame to the client.
        pub fn push(&self, text: impl Into<String>) -> bool {
            self.to_client.send(text.into()).is_ok()
        }

        /// Next text frame written by the client; `None` once it hung up.
        pub async fn recv(&mut self) -> Option<String> {
            self.from_client.recv().await
        }

        /// The token the client dialled with.
        pub fn token(&self) -> Option<String> {
            self.url
                .query_pairs()
                .find(|(key, _)| key == "token")
                .map(|(_, value)| value.into_owned())
        }
    }
}
