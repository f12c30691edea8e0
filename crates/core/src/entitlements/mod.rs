//! Plan entitlements: what each tenant may do.
//!
//! Limits and feature flags live in one immutable table keyed by plan so every
//! call site asks the same question ("is X allowed for plan P") with the same
//! evaluation rule, instead of scattering tier conditionals through product
//! code.
//!
//! ```
//! use starboard_core::entitlements::{keys, EntitlementTable, PlanId};
//!
//! let growth = EntitlementTable::shipped().resolve(PlanId::Growth).unwrap();
//! assert!(growth.is_enabled(keys::features::REVIEW_MONITORING).unwrap());
//! assert!(growth.check_limit(keys::limits::LOCATIONS, 1).unwrap());
//! ```
//!
//! # Modules
//!
//! - [`plan`] - Plan ids, limits and four-state feature values
//! - [`table`] - The validated plan table (shipped or fixture-built)
//! - [`resolver`] - Effective entitlements with optional per-tenant overrides

pub mod plan;
pub mod resolver;
pub mod table;

use thiserror::Error;

pub use plan::{FeatureValue, Limit, PlanDefinition, PlanId};
pub use resolver::{EffectiveEntitlement, EntitlementOverrides};
pub use table::EntitlementTable;

/// Errors raised by the entitlement table and resolver.
///
/// Unknown keys are schema mismatches between calling code and the table and
/// indicate a defect, not a user error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntitlementError {
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    #[error("unknown limit key: {0}")]
    UnknownLimitKey(String),

    #[error("unknown feature key: {0}")]
    UnknownFeatureKey(String),

    #[error("unknown integration key: {0}")]
    UnknownIntegrationKey(String),

    /// Two plans disagree on the key set of a category.
    #[error("plan '{plan}' {category} keys differ from plan '{reference}' ({detail})")]
    SchemaMismatch {
        plan: PlanId,
        reference: PlanId,
        category: &'static str,
        detail: String,
    },

    /// The table definition could not be parsed or is empty.
    #[error("invalid entitlement definition: {0}")]
    Definition(String),
}

/// Well-known keys of the shipped schema.
///
/// Product code should use these constants rather than string literals so a
/// renamed key fails to compile instead of failing at resolve time.
pub mod keys {
    /// Numeric limit keys.
    pub mod limits {
        pub const LOCATIONS: &str = "locations";
        pub const REVIEW_REQUESTS_PER_MONTH: &str = "review_requests_per_month";
        pub const TEAM_MEMBERS: &str = "team_members";
        pub const AI_REPLIES_PER_MONTH: &str = "ai_replies_per_month";
        pub const REVIEW_WIDGETS: &str = "review_widgets";
    }

    /// Top-level feature keys.
    pub mod features {
        pub const REVIEW_MONITORING: &str = "review_monitoring";
        pub const AI_REPLY_SUGGESTIONS: &str = "ai_reply_suggestions";
        pub const EMAIL_REVIEW_REQUESTS: &str = "email_review_requests";
        pub const SMS_REVIEW_REQUESTS: &str = "sms_review_requests";
        pub const SENTIMENT_ANALYSIS: &str = "sentiment_analysis";
        pub const COMPETITOR_TRACKING: &str = "competitor_tracking";
        pub const WHITE_LABEL_REPORTS: &str = "white_label_reports";
        pub const API_ACCESS: &str = "api_access";
    }

    /// Point-of-sale integration keys.
    pub mod integrations {
        pub const SQUARE: &str = "square";
        pub const CLOVER: &str = "clover";
        pub const TOAST: &str = "toast";
        pub const LIGHTSPEED: &str = "lightspeed";
        pub const SHOPIFY_POS: &str = "shopify_pos";
    }
}
