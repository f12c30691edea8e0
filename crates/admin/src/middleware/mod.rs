//! HTTP middleware and extractors for the backend.
//!
//! # Layer order (outermost first)
//!
//! 1. Sentry layers (hub per request, transaction per route)
//! 2. `TraceLayer` (request span with status and latency)
//! 3. Path normalization (trailing slashes)
//!
//! Authentication is per route through [`auth::RequireAdminClaim`].

pub mod auth;

pub use auth::{ClaimRejection, RequireAdminClaim};
