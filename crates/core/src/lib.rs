//! Starboard Core - Shared types library.
//!
//! This crate provides the types shared by every Starboard component:
//! - `admin` - Moderation console core and the privileged backend
//! - `cli` - Command-line tools for migrations, plan inspection and moderation
//!
//! # Architecture
//!
//! The core crate contains only types and pure logic - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and lets product code
//! ask entitlement questions anywhere without pulling in a runtime.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for user ids, emails, prices, statuses and user records
//! - [`entitlements`] - The plan table and the resolver every capability check goes through

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod entitlements;
pub mod types;

pub use entitlements::{
    EffectiveEntitlement, EntitlementError, EntitlementOverrides, EntitlementTable, FeatureValue,
    Limit, PlanDefinition, PlanId,
};
pub use types::*;
