//! Realtime push client
//!
//! Custom implementation using tokio-tungstenite. A single WebSocket carries
//! every topic; listeners are fanned out locally by the frame's `type`.

mod client;
pub mod registry;

pub use client::{ConnectionState, RealtimeClient, Subscription};
pub use registry::{Listener, ListenerId};
