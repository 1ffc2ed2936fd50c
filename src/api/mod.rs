//! HTTP API for inspecting and renewing the managed certificate.
//!
//! # API Endpoints
//!
//! ## `/healthcheck` (GET)
//!
//!   Returns HTTP 200 (OK) and the JSON body `{"ok":"healthy"}` when the service is operational.
//!
//! ## `/ssl/status` (GET)
//!
//!   Describes the certificate currently held by the renewal scheduler:
//!
//!   ```json
//!   {
//!     "has_certificate": true,
//!     "domain": "example.com",
//!     "wildcard_domain": "*.example.com",
//!     "not_before": "2026-03-01T11:00:00Z",
//!     "not_after": "2026-05-30T11:00:00Z",
//!     "days_remaining": 74,
//!     "fresh": true,
//!     "scheduler_state": "idle"
//!   }
//!   ```
//!
//!   Only `has_certificate` and `scheduler_state` are present when no certificate is held yet.
//!
//! ## `/ssl/renew` (POST)
//!
//!   Forces a renewal regardless of the remaining lifetime. Waits for an attempt already in
//!   flight, then runs its own. Returns HTTP 200 (OK) with the new validity window, or HTTP 502
//!   (Bad Gateway) if the attempt failed. This route is not subject to the request timeout.
//!
//! ## `/sse` (GET)
//!
//!   A `text/event-stream` of `certificate-renewed` events carrying
//!   `{"timestamp", "notBefore", "notAfter"}`, with periodic keep-alive comments.

mod api_error;
mod model;
mod routes;
pub mod server;

pub use routes::router;
pub use server::{new, AppState};
