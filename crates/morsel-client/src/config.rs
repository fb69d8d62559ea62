use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use morsel_api::{ApiConfig, DEFAULT_API_URL};
use morsel_gateway::config::DEFAULT_WS_URL;
use morsel_gateway::{BackoffPolicy, GatewayConfig};

/// Runtime settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub gateway: GatewayConfig,
    pub api: ApiConfig,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Falls back to the `sub` claim of the access token
    pub user_id: Option<String>,
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let Some(access_token) = var("MORSEL_ACCESS_TOKEN") else {
            bail!("MORSEL_ACCESS_TOKEN is not set");
        };

        let defaults = BackoffPolicy::default();
        let backoff = BackoffPolicy {
            initial_delay: parsed::<u64>("MORSEL_RECONNECT_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_attempts: parsed("MORSEL_RECONNECT_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
        };

        let mut gateway =
            GatewayConfig::new(var("MORSEL_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.into()));
        gateway.backoff = backoff;
        if let Some(capacity) = parsed("MORSEL_QUEUE_CAPACITY")? {
            gateway.queue_capacity = capacity;
        }

        Ok(Self {
            gateway,
            api: ApiConfig {
                base_url: var("MORSEL_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            },
            access_token,
            refresh_token: var("MORSEL_REFRESH_TOKEN"),
            user_id: var("MORSEL_USER_ID"),
        })
    }
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parsed<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|value| value.trim().parse::<T>().with_context(|| format!("invalid {key}")))
        .transpose()
}
