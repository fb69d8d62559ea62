use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};

use morsel_gateway::TokenProvider;
use morsel_types::api::{Claims, TokenResponse};

/// Tokens are refreshed when they have less than this left.
pub const REFRESH_MARGIN: Duration = Duration::seconds(60);

#[derive(Debug, Clone, Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// Credentials shared by the REST client and the real-time connection.
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: RwLock<Tokens>,
}

impl TokenStore {
    pub fn new(
        access: Option<String>,
        refresh: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        // Fall back to the token's own `exp` claim
        let expires_at = expires_at.or_else(|| access.as_deref().and_then(token_expiry));
        Self {
            tokens: RwLock::new(Tokens {
                access,
                refresh,
                expires_at,
            }),
        }
    }

    pub fn access(&self) -> Option<String> {
        self.read().access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh.clone()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.read().expires_at
    }

    /// True when the access token is missing, has no known expiry, or expires
    /// within [`REFRESH_MARGIN`].
    pub fn is_expiring_soon(&self, now: DateTime<Utc>) -> bool {
        let tokens = self.read();
        match (&tokens.access, tokens.expires_at) {
            (Some(_), Some(expires_at)) => expires_at - now < REFRESH_MARGIN,
            _ => true,
        }
    }

    pub fn store(&self, response: TokenResponse) {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.access = Some(response.access_token);
        tokens.refresh = Some(response.refresh_token);
        tokens.expires_at = Some(response.expires_at);
    }

    /// Forget everything. Used when the refresh token is rejected.
    pub fn clear(&self) {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = Tokens::default();
    }

    /// Subject of the current access token, i.e. the local user id.
    pub fn user_id(&self) -> Option<String> {
        self.read().access.as_deref().and_then(read_claims).map(|claims| claims.sub)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tokens> {
        self.tokens.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenProvider for TokenStore {
    fn access_token(&self) -> Option<String> {
        self.access()
    }
}

/// Read the claims without checking the signature. Only the server can do that.
fn read_claims(token: &str) -> Option<Claims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims)
}

fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let claims = read_claims(token)?;
    Utc.timestamp_opt(i64::try_from(claims.exp).ok()?, 0).single()
}
