use thiserror::Error;

use morsel_api::ApiError;
use morsel_gateway::GatewayError;

/// Failures of user-initiated actions. Passive sync never returns these; it
/// logs and carries on.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("no conversation is open")]
    NoOpenConversation,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Api(#[from] ApiError),
}
