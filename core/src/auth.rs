//! Implicit-grant login driven as a scripted browser.
//!
//! # Design
//! The provider hands out tokens only in the fragment of a redirect that
//! follows a chain of HTML form posts. `AuthorizationEngine` models that
//! chain as an explicit state machine: `step` performs exactly one
//! transition from the current `AuthState` using the last HTTP result, and
//! `authorize` loops `step` until it reaches `Authorized`, `Failed`, or the
//! `AwaitingCaptcha` suspend point.
//!
//! Captcha is a suspension, not a failure. The engine returns
//! `Error::CaptchaRequired` and never resubmits on its own; the caller solves
//! the image and calls `authorize` again with `Credentials::with_captcha`.
//!
//! The engine owns nothing but borrowed configuration, so one sequence is in
//! flight per call and steps run strictly one after another.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::{form_urlencoded, Url};

use crate::config::ClientConfig;
use crate::error::{AuthorizationError, Error};
use crate::form::Form;
use crate::http::{HttpResponse, Proxy};
use crate::params::{ParamValue, ParameterSet, WireToken};
use crate::transport::Transport;

/// Login form field carrying the account login.
pub const EMAIL_FIELD: &str = "email";
/// Login form field carrying the password.
pub const PASSWORD_FIELD: &str = "pass";
pub const CAPTCHA_SID_FIELD: &str = "captcha_sid";
pub const CAPTCHA_KEY_FIELD: &str = "captcha_key";
/// Two-factor form field carrying the one-time code.
pub const CODE_FIELD: &str = "code";

/// Access rights requested from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Notify,
    Friends,
    Photos,
    Audio,
    Video,
    Docs,
    Notes,
    Pages,
    Status,
    Wall,
    Groups,
    Messages,
    Notifications,
    Stats,
    Ads,
    Offline,
    Email,
    Market,
}

impl WireToken for Scope {
    fn wire_token(&self) -> &'static str {
        match self {
            Scope::Notify => "notify",
            Scope::Friends => "friends",
            Scope::Photos => "photos",
            Scope::Audio => "audio",
            Scope::Video => "video",
            Scope::Docs => "docs",
            Scope::Notes => "notes",
            Scope::Pages => "pages",
            Scope::Status => "status",
            Scope::Wall => "wall",
            Scope::Groups => "groups",
            Scope::Messages => "messages",
            Scope::Notifications => "notifications",
            Scope::Stats => "stats",
            Scope::Ads => "ads",
            Scope::Offline => "offline",
            Scope::Email => "email",
            Scope::Market => "market",
        }
    }
}

/// How the provider renders its login pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Display {
    Page,
    Popup,
    Mobile,
    #[default]
    Wap,
}

impl WireToken for Display {
    fn wire_token(&self) -> &'static str {
        match self {
            Display::Page => "page",
            Display::Popup => "popup",
            Display::Mobile => "mobile",
            Display::Wap => "wap",
        }
    }
}

/// A captcha the caller has to solve before the sequence can continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    pub sid: i64,
    pub image_url: String,
}

/// The caller's answer to a `CaptchaChallenge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaSolution {
    pub sid: i64,
    pub key: String,
}

/// Produces a one-time code when the provider asks for one.
pub type TwoFactorProvider = Arc<dyn Fn() -> String + Send + Sync>;

/// Everything `authorize` needs from the caller.
#[derive(Clone)]
pub struct Credentials {
    pub app_id: u64,
    pub email: String,
    pub password: String,
    pub scopes: Vec<Scope>,
    pub proxy: Option<Proxy>,
    pub captcha: Option<CaptchaSolution>,
    pub two_factor: Option<TwoFactorProvider>,
}

impl Credentials {
    pub fn new(app_id: u64, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            app_id,
            email: email.into(),
            password: password.into(),
            scopes: Vec::new(),
            proxy: None,
            captcha: None,
            two_factor: None,
        }
    }

    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_captcha(mut self, sid: i64, key: impl Into<String>) -> Self {
        self.captcha = Some(CaptchaSolution { sid, key: key.into() });
        self
    }

    pub fn with_two_factor<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.two_factor = Some(Arc::new(provider));
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("proxy", &self.proxy)
            .field("captcha", &self.captcha)
            .field("two_factor", &self.two_factor.is_some())
            .finish()
    }
}

/// An authenticated context. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    access_token: String,
    user_id: i64,
    expires_at: Option<DateTime<Utc>>,
    proxy: Option<Proxy>,
}

impl Session {
    /// Wrap a token obtained outside the login sequence, e.g. a stored one.
    pub fn from_token(access_token: impl Into<String>, user_id: i64) -> Self {
        Self {
            access_token: access_token.into(),
            user_id,
            expires_at: None,
            proxy: None,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// `None` for tokens that never expire.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// The proxy every call made with this session goes through.
    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// What a landing URL after a form post tells the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Landing {
    Captcha { sid: i64 },
    Granted { access_token: String, user_id: i64, expires_in: i64 },
    Denied { error: String, description: Option<String> },
    /// An ordinary page; the sequence continues with its form.
    Page,
}

impl Landing {
    /// Classify a landing URL by its query and fragment parameters.
    pub fn from_url(url: &str) -> Result<Self, AuthorizationError> {
        let parsed = Url::parse(url).map_err(|_| AuthorizationError::InvalidUrl { url: url.to_string() })?;
        let mut pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        if let Some(fragment) = parsed.fragment() {
            pairs.extend(form_urlencoded::parse(fragment.as_bytes()).into_owned());
        }
        let find = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

        if let Some(sid) = find("captcha_sid") {
            let sid = sid
                .parse()
                .map_err(|_| AuthorizationError::MalformedRedirect(format!("captcha_sid `{sid}`")))?;
            return Ok(Landing::Captcha { sid });
        }

        if let Some(token) = find("access_token") {
            let user_id = find("user_id")
                .ok_or_else(|| AuthorizationError::MalformedRedirect("user_id missing".to_string()))?;
            let user_id = user_id
                .parse()
                .map_err(|_| AuthorizationError::MalformedRedirect(format!("user_id `{user_id}`")))?;
            let expires_in = match find("expires_in") {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| AuthorizationError::MalformedRedirect(format!("expires_in `{raw}`")))?,
                None => 0,
            };
            return Ok(Landing::Granted {
                access_token: token.to_string(),
                user_id,
                expires_in,
            });
        }

        if let Some(error) = find("error") {
            return Ok(Landing::Denied {
                error: error.to_string(),
                description: find("error_description").map(str::to_string),
            });
        }

        Ok(Landing::Page)
    }
}

/// Position in the login sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Start,
    AwaitingCredentials { form: Form },
    AwaitingCaptcha { challenge: CaptchaChallenge },
    AwaitingTwoFactorCode { form: Form },
    AwaitingConsent { page: HttpResponse },
    Authorized(Session),
    Failed(AuthorizationError),
}

impl AuthState {
    /// `Authorized`, `Failed` and `AwaitingCaptcha` need outside input or
    /// nothing at all; `step` leaves them unchanged.
    pub fn is_halted(&self) -> bool {
        matches!(
            self,
            AuthState::Authorized(_) | AuthState::Failed(_) | AuthState::AwaitingCaptcha { .. }
        )
    }

    fn name(&self) -> &'static str {
        match self {
            AuthState::Start => "start",
            AuthState::AwaitingCredentials { .. } => "awaiting_credentials",
            AuthState::AwaitingCaptcha { .. } => "awaiting_captcha",
            AuthState::AwaitingTwoFactorCode { .. } => "awaiting_two_factor_code",
            AuthState::AwaitingConsent { .. } => "awaiting_consent",
            AuthState::Authorized(_) => "authorized",
            AuthState::Failed(_) => "failed",
        }
    }
}

/// Build the implicit-grant authorize URL.
pub fn authorize_url(config: &ClientConfig, app_id: u64, scopes: &[Scope]) -> String {
    let mut params = ParameterSet::new();
    params
        .set("client_id", app_id)
        .set("scope", ParamValue::tokens(scopes))
        .set("redirect_uri", config.redirect_uri.as_str())
        .set("display", ParamValue::token(&config.display))
        .set("response_type", "token");
    format!("{}?{}", config.authorize_endpoint(), params.encode())
}

/// Drives the login sequence over a `Transport`.
pub struct AuthorizationEngine<'a> {
    transport: &'a dyn Transport,
    config: &'a ClientConfig,
}

impl<'a> AuthorizationEngine<'a> {
    pub fn new(transport: &'a dyn Transport, config: &'a ClientConfig) -> Self {
        Self { transport, config }
    }

    /// Run the sequence to a session. Stops with `Error::CaptchaRequired`
    /// when the provider wants a captcha.
    pub fn authorize(&self, credentials: &Credentials) -> Result<Session, Error> {
        let mut state = AuthState::Start;
        loop {
            state = self.step(state, credentials)?;
            match state {
                AuthState::Authorized(session) => return Ok(session),
                AuthState::Failed(error) => return Err(Error::Authorization(error)),
                AuthState::AwaitingCaptcha { challenge } => return Err(Error::CaptchaRequired(challenge)),
                _ => {}
            }
        }
    }

    /// Perform one transition.
    pub fn step(&self, state: AuthState, credentials: &Credentials) -> Result<AuthState, Error> {
        let proxy = credentials.proxy.as_ref();
        let from = state.name();

        let next = match state {
            AuthState::Start => {
                let url = authorize_url(self.config, credentials.app_id, &credentials.scopes);
                debug!(app_id = credentials.app_id, "requesting authorize page");
                let page = self.transport.get(&url, proxy)?;
                match Form::from_response(&page) {
                    Ok(form) => AuthState::AwaitingCredentials { form },
                    Err(error) => AuthState::Failed(error),
                }
            }
            AuthState::AwaitingCredentials { form } => {
                let mut filled = form
                    .fill(EMAIL_FIELD, credentials.email.as_str())
                    .fill(PASSWORD_FIELD, credentials.password.as_str());
                if let Some(captcha) = &credentials.captcha {
                    filled = filled
                        .fill(CAPTCHA_SID_FIELD, captcha.sid.to_string())
                        .fill(CAPTCHA_KEY_FIELD, captcha.key.as_str());
                }
                let result = filled.submit(self.transport, proxy)?;
                self.after_login(result, credentials)
            }
            AuthState::AwaitingTwoFactorCode { form } => match &credentials.two_factor {
                Some(provider) => {
                    let result = form.fill(CODE_FIELD, provider()).submit(self.transport, proxy)?;
                    self.after_code(result, credentials)
                }
                None => AuthState::Failed(AuthorizationError::TwoFactorUnavailable),
            },
            AuthState::AwaitingConsent { page } => match Form::from_response(&page) {
                Ok(form) => {
                    let result = form.submit(self.transport, proxy)?;
                    self.finish(&result.final_url, credentials)
                }
                Err(error) => AuthState::Failed(error),
            },
            halted => halted,
        };

        debug!(from, to = next.name(), "authorization step");
        Ok(next)
    }

    fn after_login(&self, result: HttpResponse, credentials: &Credentials) -> AuthState {
        match Landing::from_url(&result.final_url) {
            Ok(Landing::Captcha { sid }) => self.captcha(sid),
            Ok(Landing::Page) => match Form::from_response(&result) {
                Ok(form) if form.field(CODE_FIELD).is_some() => AuthState::AwaitingTwoFactorCode { form },
                _ => AuthState::AwaitingConsent { page: result },
            },
            Ok(landing) => self.settle(landing, result, credentials),
            Err(error) => AuthState::Failed(error),
        }
    }

    fn after_code(&self, result: HttpResponse, credentials: &Credentials) -> AuthState {
        match Landing::from_url(&result.final_url) {
            Ok(Landing::Captcha { sid }) => self.captcha(sid),
            Ok(landing) => self.settle(landing, result, credentials),
            Err(error) => AuthState::Failed(error),
        }
    }

    /// A landing that already carries a token skips the consent page.
    fn settle(&self, landing: Landing, page: HttpResponse, credentials: &Credentials) -> AuthState {
        match landing {
            Landing::Page => AuthState::AwaitingConsent { page },
            Landing::Captcha { sid } => self.captcha(sid),
            other => self.grant(other, &page.final_url, credentials),
        }
    }

    fn finish(&self, final_url: &str, credentials: &Credentials) -> AuthState {
        match Landing::from_url(final_url) {
            Ok(Landing::Captcha { sid }) => self.captcha(sid),
            Ok(landing) => self.grant(landing, final_url, credentials),
            Err(error) => AuthState::Failed(error),
        }
    }

    fn grant(&self, landing: Landing, final_url: &str, credentials: &Credentials) -> AuthState {
        match landing {
            Landing::Granted {
                access_token,
                user_id,
                expires_in,
            } => {
                let expires_at = if expires_in > 0 {
                    let at = Duration::try_seconds(expires_in)
                        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));
                    match at {
                        Some(at) => Some(at),
                        None => {
                            return AuthState::Failed(AuthorizationError::MalformedRedirect(format!(
                                "expires_in `{expires_in}` out of range"
                            )))
                        }
                    }
                } else {
                    None
                };
                info!(user_id, "authorized");
                AuthState::Authorized(Session {
                    access_token,
                    user_id,
                    expires_at,
                    proxy: credentials.proxy.clone(),
                })
            }
            Landing::Denied { error, description } => {
                warn!(%error, "authorization denied");
                AuthState::Failed(AuthorizationError::Denied { error, description })
            }
            Landing::Captcha { sid } => self.captcha(sid),
            Landing::Page => AuthState::Failed(AuthorizationError::MissingToken {
                url: strip_fragment(final_url).to_string(),
            }),
        }
    }

    fn captcha(&self, sid: i64) -> AuthState {
        warn!(sid, "captcha required");
        AuthState::AwaitingCaptcha {
            challenge: CaptchaChallenge {
                sid,
                image_url: format!("{}?sid={sid}", self.config.captcha_image_url),
            },
        }
    }
}

/// Fragments carry tokens; keep them out of error messages.
fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_shape() {
        let config = ClientConfig::default();
        let url = authorize_url(&config, 4_123_456, &[Scope::Friends, Scope::Docs]);
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("oauth.vk.com"));
        assert_eq!(parsed.path(), "/authorize");
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("client_id".to_string(), "4123456".to_string()),
                ("scope".to_string(), "friends,docs".to_string()),
                ("redirect_uri".to_string(), "https://oauth.vk.com/blank.html".to_string()),
                ("display".to_string(), "wap".to_string()),
                ("response_type".to_string(), "token".to_string()),
            ]
        );
    }

    #[test]
    fn authorize_url_without_scopes_omits_scope() {
        let url = authorize_url(&ClientConfig::default(), 1, &[]);
        assert!(!url.contains("scope="));
    }

    #[test]
    fn landing_granted_from_fragment() {
        let landing =
            Landing::from_url("https://oauth.vk.com/blank.html#access_token=T&user_id=42&expires_in=0").unwrap();
        assert_eq!(
            landing,
            Landing::Granted {
                access_token: "T".to_string(),
                user_id: 42,
                expires_in: 0
            }
        );
    }

    #[test]
    fn landing_captcha_from_query() {
        let landing = Landing::from_url("https://oauth.vk.com/authorize?client_id=1&captcha_sid=557").unwrap();
        assert_eq!(landing, Landing::Captcha { sid: 557 });
    }

    #[test]
    fn landing_denied_from_fragment() {
        let landing = Landing::from_url(
            "https://oauth.vk.com/blank.html#error=access_denied&error_description=User+denied+your+request",
        )
        .unwrap();
        assert_eq!(
            landing,
            Landing::Denied {
                error: "access_denied".to_string(),
                description: Some("User denied your request".to_string())
            }
        );
    }

    #[test]
    fn landing_plain_page() {
        assert_eq!(Landing::from_url("https://oauth.vk.com/authorize?x=1").unwrap(), Landing::Page);
    }

    #[test]
    fn landing_token_without_user_is_malformed() {
        assert!(matches!(
            Landing::from_url("https://oauth.vk.com/blank.html#access_token=T"),
            Err(AuthorizationError::MalformedRedirect(_))
        ));
    }

    #[test]
    fn session_expiry() {
        let session = Session::from_token("T", 1);
        assert!(!session.is_expired());
        assert!(session.expires_at().is_none());

        let expired = Session {
            expires_at: Some(Utc::now() - Duration::seconds(5)),
            ..session
        };
        assert!(expired.is_expired());
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials::new(1, "a@b.c", "hunter2").with_two_factor(|| "000000".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("two_factor: true"));
    }

    #[test]
    fn display_deserializes_lowercase() {
        let display: Display = serde_json::from_str("\"mobile\"").unwrap();
        assert_eq!(display, Display::Mobile);
        assert_eq!(display.wire_token(), "mobile");
    }
}
