//! Q-Verse Client
//!
//! Two independent clients for the Q-Verse backend:
//! - `api`: request/response client that unwraps the `{success, data, error}`
//!   envelope and retries transient failures with exponential backoff
//! - `realtime`: single WebSocket connection with topic-based pub/sub fan-out
//!   and automatic reconnection
//!
//! Both are constructed explicitly from a [`ClientConfig`]; there is no
//! process-wide instance.
//!
//! # Wire Protocol
//! - HTTP response body: `{"success": bool, "data": T, "error": string}`
//! - WS outbound control: `{"action": "subscribe" | "unsubscribe", "event": topic}`
//! - WS inbound: `{"type": topic, "data": any}`

pub mod api;
pub mod config;
pub mod error;
pub mod realtime;
pub mod retry;
pub mod types;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use types::*;

/// Default REST API base URL (backend mounts its routes at the root of this path)
pub const DEFAULT_API_BASE: &str = "http://localhost:8080/api";

/// Default realtime WebSocket endpoint
pub const DEFAULT_WS_ENDPOINT: &str = "ws://localhost:8080/ws";
