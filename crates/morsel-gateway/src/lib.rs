//! Client side of the Morsel real-time gateway.
//!
//! One [`ConnectionManager`] per authenticated session owns the socket:
//! - connect / reconnect with bounded exponential backoff
//! - outbound queue while the socket is down, drained FIFO on open
//! - typed fan-out of inbound events to registered handlers

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod machine;
pub mod queue;
pub mod token;
pub mod transport;

pub use config::GatewayConfig;
pub use connection::ConnectionManager;
pub use dispatcher::{Dispatcher, FrameHandler, HandlerId};
pub use error::{GatewayError, HandlerError};
pub use machine::{BackoffPolicy, ConnectionState, Machine, Transition};
pub use queue::OutboundQueue;
pub use token::{StaticToken, TokenProvider};
pub use transport::{Connector, Link, WsConnector};

#[cfg(any(test, feature = "test-util"))]
pub use transport::memory::{MemoryConnector, MemoryPeer, MemoryServer};
