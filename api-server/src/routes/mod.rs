//! HTTP route handlers grouped by resource.
//!
//! Handlers are annotated with `#[openapi]` so `rocket_okapi` can derive the
//! OpenAPI document; the raw CSV upload is mounted separately because its
//! body is streamed straight to disk.

pub mod health;
pub mod imports;
pub mod jobs;
pub mod members;

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Simple message wrapper for acknowledgement responses.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MessageResponse {
    /// Response text.
    pub message: String,
}
