//! Error types for the VK client core.
//!
//! # Design
//! Every failure kind carries the data a caller needs to pick between retry
//! and abort. `Validation` fires before anything touches the network,
//! `Network` is the transport's fault passed through as-is, and
//! `CaptchaRequired` is a suspension rather than a failure: the caller solves
//! the challenge and invokes authorization again. `Api` keeps the provider's
//! numeric code so rate-limit and captcha policy can live above the core.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::auth::CaptchaChallenge;

/// Shorthand used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error returned by `VkApi`, `CallDispatcher` and
/// `AuthorizationEngine`.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The login sequence halted on a captcha. Re-invoke with a solution.
    #[error("captcha required (sid {}, image {})", .0.sid, .0.image_url)]
    CaptchaRequired(CaptchaChallenge),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// Non-2xx response whose body carried no error envelope.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// A parameter set failed its constraints. Raised before any request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("required parameter `{key}` is missing or empty")]
    MissingRequired { key: String },

    #[error("parameter `{key}` must be non-negative, got {value}")]
    Negative { key: String, value: String },
}

/// Connection, DNS, TLS or timeout failure reported by a `Transport`.
#[derive(Debug, Error)]
#[error("request to {url} failed: {source}")]
pub struct NetworkError {
    pub url: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl NetworkError {
    pub fn new(
        url: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
        }
    }
}

/// A response node did not have the shape the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("expected {expected}, found {found}")]
    Mismatch { expected: &'static str, found: String },

    #[error("element {index}: {source}")]
    Element {
        index: usize,
        #[source]
        source: Box<ConversionError>,
    },

    #[error("malformed JSON: {0}")]
    Json(String),
}

/// The login sequence ended without a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("no submittable form found at {url}")]
    FormNotFound { url: String },

    #[error("invalid URL `{url}`")]
    InvalidUrl { url: String },

    #[error("authorization denied: {error} ({})", .description.as_deref().unwrap_or("no description"))]
    Denied {
        error: String,
        description: Option<String>,
    },

    #[error("landing page {url} carries no access token")]
    MissingToken { url: String },

    #[error("malformed token redirect: {0}")]
    MalformedRedirect(String),

    #[error("the provider asked for a two-factor code but no code provider was supplied")]
    TwoFactorUnavailable,
}

/// The provider rejected a method call.
///
/// `extra` holds every member of the error object other than `error_code`
/// and `error_msg`, e.g. `captcha_sid`, `captcha_img`, `request_params`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("API error {code}: {message}")]
pub struct ApiError {
    pub code: i64,
    pub message: String,
    pub extra: Map<String, Value>,
}

impl ApiError {
    pub const UNKNOWN: i64 = 1;
    pub const UNKNOWN_METHOD: i64 = 3;
    pub const AUTHORIZATION_FAILED: i64 = 5;
    pub const TOO_MANY_REQUESTS: i64 = 6;
    pub const CAPTCHA_NEEDED: i64 = 14;
    pub const ACCESS_DENIED: i64 = 15;

    pub fn is_captcha_needed(&self) -> bool {
        self.code == Self::CAPTCHA_NEEDED
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == Self::TOO_MANY_REQUESTS
    }

    /// The challenge attached to a captcha-needed error, if any.
    pub fn captcha(&self) -> Option<CaptchaChallenge> {
        if !self.is_captcha_needed() {
            return None;
        }
        let sid = match self.extra.get("captcha_sid")? {
            Value::Number(n) => n.as_i64()?,
            Value::String(s) => s.parse().ok()?,
            _ => return None,
        };
        let image_url = self.extra.get("captcha_img")?.as_str()?.to_string();
        Some(CaptchaChallenge { sid, image_url })
    }
}
