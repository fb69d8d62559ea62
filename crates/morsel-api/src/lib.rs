//! REST collaborator of the real-time core: resource calls plus the
//! credentials they share with the socket.

pub mod client;
pub mod error;
pub mod tokens;

pub use client::{ApiConfig, DEFAULT_API_URL, HttpApi, RestApi};
pub use error::ApiError;
pub use tokens::TokenStore;
