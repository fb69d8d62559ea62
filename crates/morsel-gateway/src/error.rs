use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid gateway url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection refused by {0}")]
    Refused(String),

    #[error("connection closed")]
    Closed,
}

/// Error returned by a frame handler. Logged by the dispatcher, never
/// propagated to other handlers.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
