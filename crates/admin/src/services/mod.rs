//! Business logic services for admin.
//!
//! # Services
//!
//! - `claims` - Administrative privilege checks against freshly refreshed tokens

pub mod claims;

pub use claims::ClaimVerifier;
