//! REST API client
//!
//! Custom implementation on reqwest. Every response is an envelope
//! `{success, data, error}`; transient failures are retried with exponential
//! backoff and only the final error reaches the caller.

mod client;
mod endpoints;

pub use client::{ApiClient, HttpMethod, RequestOptions};
