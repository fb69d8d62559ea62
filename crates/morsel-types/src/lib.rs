pub mod api;
pub mod events;
pub mod models;

pub use events::{
    Envelope, FrameKind, GatewayCommand, GatewayEvent, ProtocolError, WireFrame, decode,
};
