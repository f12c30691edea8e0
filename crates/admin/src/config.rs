//! Configuration for the privileged backend and the moderation console.
//!
//! Both are read from environment variables (after loading `.env` if one is
//! present). Loading goes through [`AdminConfig::from_lookup`] and
//! [`ConsoleConfig::from_lookup`], which take any key lookup, so tests never
//! touch the process environment.
//!
//! # Environment Variables
//!
//! ## Backend
//! - `ADMIN_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `IDENTITY_TOKEN_SECRET` - HS256 secret shared with the identity provider
//!   (min 32 chars, not a placeholder, high entropy)
//! - `IDENTITY_ISSUER` - Expected `iss` claim (optional)
//! - `ADMIN_HOST` / `ADMIN_PORT` - Bind address (default: 127.0.0.1:3001)
//! - `SENTRY_DSN` - Enables error tracking when set
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` / `SENTRY_TRACES_SAMPLE_RATE` - 0.0 to 1.0 (default: 1.0)
//!
//! ## Moderation console (`sb-cli moderate`)
//! - `ADMIN_DATABASE_URL`, `IDENTITY_TOKEN_SECRET`, `IDENTITY_ISSUER` - as above
//! - `IDENTITY_BASE_URL` - Secure-token endpoint of the identity provider
//! - `IDENTITY_API_KEY` - Public API key sent with token refreshes
//! - `IDENTITY_REFRESH_TOKEN` - The operator's refresh token
//! - `ADMIN_BACKEND_URL` - Base URL of the privileged backend

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const DEFAULT_PORT: u16 = 3001;

const MIN_TOKEN_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Substrings that mark a secret as copied from a template (case-insensitive).
const PLACEHOLDER_MARKERS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Why configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {key}")]
    Missing { key: &'static str },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("refusing insecure {key}: {reason}")]
    InsecureSecret { key: &'static str, reason: String },
}

// =============================================================================
// Configuration types
// =============================================================================

/// Privileged backend configuration.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub database_url: SecretString,
    pub host: IpAddr,
    pub port: u16,
    pub tokens: TokenConfig,
    /// Error tracking; `None` when `SENTRY_DSN` is unset.
    pub sentry: Option<SentryConfig>,
}

/// How ID tokens are verified.
#[derive(Clone)]
pub struct TokenConfig {
    /// HS256 shared secret.
    pub secret: SecretString,
    /// Expected issuer, if the provider sets one.
    pub issuer: Option<String>,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// Sentry client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SentryConfig {
    pub dsn: String,
    pub environment: Option<String>,
    pub sample_rate: f32,
    pub traces_sample_rate: f32,
}

/// Operator console settings.
#[derive(Clone)]
pub struct ConsoleConfig {
    /// Source of the live roster.
    pub database_url: SecretString,
    pub identity_base_url: Url,
    pub identity_api_key: SecretString,
    /// Long-lived credential the console signs in with.
    pub refresh_token: SecretString,
    pub tokens: TokenConfig,
    pub backend_url: Url,
}

impl fmt::Debug for ConsoleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleConfig")
            .field("identity_base_url", &self.identity_base_url.as_str())
            .field("tokens", &self.tokens)
            .field("backend_url", &self.backend_url.as_str())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Loading
// =============================================================================

impl AdminConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a missing or malformed variable, or a token
    /// secret that fails the strength checks.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`AdminConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);
        Ok(Self {
            database_url: vars.database_url()?,
            host: vars.parsed_or("ADMIN_HOST", DEFAULT_HOST)?,
            port: vars.parsed_or("ADMIN_PORT", DEFAULT_PORT)?,
            tokens: TokenConfig::load(&vars)?,
            sentry: SentryConfig::load(&vars)?,
        })
    }

    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl TokenConfig {
    /// The secret, for building signing keys.
    #[must_use]
    pub fn secret_bytes(&self) -> &[u8] {
        self.secret.expose_secret().as_bytes()
    }

    fn load(vars: &Vars<'_>) -> Result<Self, ConfigError> {
        let secret = vars.required("IDENTITY_TOKEN_SECRET")?;
        check_secret_strength("IDENTITY_TOKEN_SECRET", &secret)?;
        Ok(Self {
            secret: SecretString::from(secret),
            issuer: vars.optional("IDENTITY_ISSUER"),
        })
    }
}

impl SentryConfig {
    fn load(vars: &Vars<'_>) -> Result<Option<Self>, ConfigError> {
        let Some(dsn) = vars.optional("SENTRY_DSN") else {
            return Ok(None);
        };
        Ok(Some(Self {
            dsn,
            environment: vars.optional("SENTRY_ENVIRONMENT"),
            sample_rate: vars.rate("SENTRY_SAMPLE_RATE")?,
            traces_sample_rate: vars.rate("SENTRY_TRACES_SAMPLE_RATE")?,
        }))
    }
}

impl ConsoleConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a missing variable, a URL that does not
    /// parse, or a token secret that fails the strength checks.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`ConsoleConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);
        Ok(Self {
            database_url: vars.database_url()?,
            identity_base_url: vars.url("IDENTITY_BASE_URL")?,
            identity_api_key: SecretString::from(vars.required("IDENTITY_API_KEY")?),
            refresh_token: SecretString::from(vars.required("IDENTITY_REFRESH_TOKEN")?),
            tokens: TokenConfig::load(&vars)?,
            backend_url: vars.url("ADMIN_BACKEND_URL")?,
        })
    }
}

/// Typed access to a key lookup.
struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    /// A set, non-empty value.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing { key })
    }

    fn parsed_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.optional(key).map_or(Ok(default), |raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            })
        })
    }

    fn url(&self, key: &'static str) -> Result<Url, ConfigError> {
        Url::parse(&self.required(key)?).map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        })
    }

    /// A sample rate in `0.0..=1.0`, defaulting to 1.0.
    fn rate(&self, key: &'static str) -> Result<f32, ConfigError> {
        let rate: f32 = self.parsed_or(key, 1.0)?;
        if (0.0..=1.0).contains(&rate) {
            Ok(rate)
        } else {
            Err(ConfigError::Invalid {
                key,
                reason: format!("{rate} is outside 0.0..=1.0"),
            })
        }
    }

    /// `ADMIN_DATABASE_URL`, falling back to `DATABASE_URL`.
    fn database_url(&self) -> Result<SecretString, ConfigError> {
        self.optional("ADMIN_DATABASE_URL")
            .or_else(|| self.optional("DATABASE_URL"))
            .map(SecretString::from)
            .ok_or(ConfigError::Missing {
                key: "ADMIN_DATABASE_URL",
            })
    }
}

// =============================================================================
// Secret strength
// =============================================================================

/// Reject short, template-looking, or low-entropy secrets.
fn check_secret_strength(key: &'static str, secret: &str) -> Result<(), ConfigError> {
    let insecure = |reason: String| ConfigError::InsecureSecret { key, reason };

    let length = secret.chars().count();
    if length < MIN_TOKEN_SECRET_LENGTH {
        return Err(insecure(format!(
            "must be at least {MIN_TOKEN_SECRET_LENGTH} characters (got {length})"
        )));
    }

    let lower = secret.to_lowercase();
    if let Some(marker) = PLACEHOLDER_MARKERS.iter().find(|m| lower.contains(*m)) {
        return Err(insecure(format!(
            "looks like a placeholder (contains '{marker}')"
        )));
    }

    let entropy = bits_per_char(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(insecure(format!(
            "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}); use a randomly generated secret"
        )));
    }

    Ok(())
}

/// Shannon entropy of `s` in bits per character.
#[allow(clippy::cast_precision_loss)]
fn bits_per_char(s: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in s.chars() {
        *counts.entry(c).or_default() += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let total = total as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const STRONG: &str = "aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6!";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_backend_defaults() {
        let config = AdminConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/starboard"),
            ("IDENTITY_TOKEN_SECRET", STRONG),
        ]))
        .unwrap();

        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3001");
        assert_eq!(config.tokens.issuer, None);
        assert_eq!(config.sentry, None);
    }

    #[test]
    fn test_admin_database_url_wins() {
        let config = AdminConfig::from_lookup(lookup(&[
            ("ADMIN_DATABASE_URL", "postgres://admin/db"),
            ("DATABASE_URL", "postgres://shared/db"),
            ("IDENTITY_TOKEN_SECRET", STRONG),
        ]))
        .unwrap();
        assert_eq!(config.database_url.expose_secret(), "postgres://admin/db");
    }

    #[test]
    fn test_missing_secret() {
        let err = AdminConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://x/db")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                key: "IDENTITY_TOKEN_SECRET"
            }
        ));
    }

    #[test]
    fn test_bad_port() {
        let err = AdminConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x/db"),
            ("IDENTITY_TOKEN_SECRET", STRONG),
            ("ADMIN_PORT", "http"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ADMIN_PORT", .. }));
    }

    #[test]
    fn test_sentry_enabled_by_dsn() {
        let config = AdminConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x/db"),
            ("IDENTITY_TOKEN_SECRET", STRONG),
            ("SENTRY_DSN", "https://key@sentry.example/1"),
            ("SENTRY_TRACES_SAMPLE_RATE", "0.25"),
        ]))
        .unwrap();

        let sentry = config.sentry.unwrap();
        assert!((sentry.sample_rate - 1.0).abs() < f32::EPSILON);
        assert!((sentry.traces_sample_rate - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_sample_rate_out_of_range() {
        let err = AdminConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x/db"),
            ("IDENTITY_TOKEN_SECRET", STRONG),
            ("SENTRY_DSN", "https://key@sentry.example/1"),
            ("SENTRY_SAMPLE_RATE", "1.5"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "SENTRY_SAMPLE_RATE",
                ..
            }
        ));
    }

    #[test]
    fn test_console_requires_refresh_token() {
        let mut pairs = vec![
            ("DATABASE_URL", "postgres://x/db"),
            ("IDENTITY_TOKEN_SECRET", STRONG),
            ("IDENTITY_BASE_URL", "https://identity.starboard.test"),
            ("IDENTITY_API_KEY", "pk_live_4f8a2c"),
            ("ADMIN_BACKEND_URL", "http://127.0.0.1:3001"),
        ];
        assert!(matches!(
            ConsoleConfig::from_lookup(lookup(&pairs)).unwrap_err(),
            ConfigError::Missing {
                key: "IDENTITY_REFRESH_TOKEN"
            }
        ));

        pairs.push(("IDENTITY_REFRESH_TOKEN", "rt-operator"));
        let config = ConsoleConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.backend_url.as_str(), "http://127.0.0.1:3001/");
        assert!(!format!("{config:?}").contains("rt-operator"));
    }

    #[test]
    fn test_entropy() {
        assert!(bits_per_char("").abs() < f64::EPSILON);
        assert!((bits_per_char("ab") - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_secret_strength() {
        assert!(check_secret_strength("K", STRONG).is_ok());
        assert!(check_secret_strength("K", "short").is_err());
        assert!(check_secret_strength("K", &"a".repeat(40)).is_err());
        assert!(matches!(
            check_secret_strength("K", "your-signing-key-goes-here-0123456789"),
            Err(ConfigError::InsecureSecret { reason, .. }) if reason.contains("your-")
        ));
    }

    #[test]
    fn test_token_config_debug_redacts_secret() {
        let config = TokenConfig {
            secret: SecretString::from(STRONG),
            issuer: Some("starboard-identity".to_string()),
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("aB3$"));
    }
}
