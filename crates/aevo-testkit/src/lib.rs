//! Test doubles shared by the workspace crates.
//!
//! - [`MockHttpServer`]: an axum server on an ephemeral port that answers
//!   every request through a route closure and records what it received.

pub mod http;

pub use http::{MockHttpServer, RecordedRequest};
