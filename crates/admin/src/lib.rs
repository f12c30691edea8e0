//! Starboard admin library.
//!
//! Admin authorization, account moderation and the privileged backend.
//!
//! # Security
//!
//! This crate contains HIGH PRIVILEGE access:
//! - Every tenant account's `disabled` flag
//! - The ID token signing secret shared with the identity provider
//!
//! The operator-facing pieces (session controller, optimistic toggles) never
//! write account state directly; every change goes through the backend, which
//! re-verifies the caller's admin claim.
//!
//! # Modules
//!
//! - [`identity`] - Principals, ID tokens, the identity provider boundary
//! - [`services`] - Claim verification
//! - [`store`] - Live roster subscriptions
//! - [`session`] - Operator session controller and optimistic toggles
//! - [`backend`] - Privileged backend contract and HTTP client
//! - [`db`] - `PostgreSQL` user records and change feed
//! - [`routes`] - Backend HTTP handlers

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
pub mod store;
