//! Client-side state for the Morsel real-time feed, chat and requests.
//!
//! Each reconciler is a plain value that merges one kind of event into
//! UI-facing state. [`Session`] wires them to a
//! [`ConnectionManager`](morsel_gateway::ConnectionManager) and runs the side
//! effects they ask for.

pub mod activity;
pub mod conversation;
pub mod error;
pub mod feed;
pub mod outbound;
pub mod session;

pub use activity::{ActivityReconciler, DeepLink, Toast, ToastVariant};
pub use conversation::{ConversationReconciler, Effect, TYPING_TIMEOUT};
pub use error::SyncError;
pub use feed::FeedReconciler;
pub use outbound::Encoder;
pub use session::{Session, SessionConfig, SessionState};
