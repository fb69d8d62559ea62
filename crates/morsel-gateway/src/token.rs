/// Source of the access token used for the socket handshake.
///
/// Asked again on every dial so a refreshed token is picked up by the next
/// reconnect.
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn access_token(&self) -> Option<String> {
        self()
    }
}

/// A token that never changes, for tools and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}
