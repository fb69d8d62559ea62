use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid api url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// No usable credentials, or the refresh token was rejected.
    #[error("unauthorized")]
    Unauthorized,
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Unauthorized => Some(401),
            _ => None,
        }
    }
}
