use url::Url;

use crate::error::GatewayError;
use crate::machine::BackoffPolicy;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/api/ws";

/// Oldest frames are dropped once this many are waiting for a connection.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Real-time endpoint, without the credential.
    pub url: String,
    pub backoff: BackoffPolicy,
    pub queue_capacity: usize,
    /// Capacity of the broadcast channel behind `ConnectionManager::subscribe`.
    pub event_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            backoff: BackoffPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_buffer: 1024,
        }
    }
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Endpoint for one handshake. The token travels as the `token` query
    /// parameter and is never repeated per frame.
    pub fn endpoint(&self, token: &str) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.url)?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_carries_token() {
        let config = GatewayConfig::new("ws://example.test/api/ws?v=2");
        let url = config.endpoint("a b&c").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("v".to_string(), "2".to_string()),
                ("token".to_string(), "a b&c".to_string()),
            ]
        );
    }

    #[test]
    fn test_endpoint_rejects_bad_url() {
        let config = GatewayConfig::new("not a url");
        assert!(matches!(config.endpoint("t"), Err(GatewayError::InvalidUrl(_))));
    }
}
