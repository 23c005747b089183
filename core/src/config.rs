//! Endpoint and transport settings.
//!
//! Defaults target the public provider. `for_host` points every endpoint at
//! a single base URL, which is how tests talk to the mock server.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::Display;

pub const DEFAULT_API_VERSION: &str = "5.40";
pub const DEFAULT_MAX_BODY_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base of the OAuth pages; `/authorize` is appended.
    pub oauth_base: String,
    /// Base of the method endpoint; `/<method>` is appended.
    pub api_base: String,
    /// Redirect target the provider appends the token fragment to.
    pub redirect_uri: String,
    pub api_version: String,
    pub display: Display,
    /// Captcha images are served at `<captcha_image_url>?sid=<sid>`.
    pub captcha_image_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_redirects: u32,
    /// Largest response body a transport reads; documents run to 200 MB.
    pub max_body_bytes: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            oauth_base: "https://oauth.vk.com".to_string(),
            api_base: "https://api.vk.com/method".to_string(),
            redirect_uri: "https://oauth.vk.com/blank.html".to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            display: Display::Wap,
            captcha_image_url: "https://api.vk.com/captcha.php".to_string(),
            user_agent: concat!("vk-core/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
            max_redirects: 10,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ClientConfig {
    /// Every endpoint served from `base_url` (OAuth pages at the root,
    /// methods under `/method`).
    pub fn for_host(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            oauth_base: base.to_string(),
            api_base: format!("{base}/method"),
            redirect_uri: format!("{base}/blank.html"),
            captcha_image_url: format!("{base}/captcha.php"),
            ..Self::default()
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/authorize", self.oauth_base.trim_end_matches('/'))
    }

    pub fn method_endpoint(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_host_strips_trailing_slash() {
        let config = ClientConfig::for_host("http://127.0.0.1:3000/");
        assert_eq!(config.authorize_endpoint(), "http://127.0.0.1:3000/authorize");
        assert_eq!(config.method_endpoint("users.get"), "http://127.0.0.1:3000/method/users.get");
        assert_eq!(config.redirect_uri, "http://127.0.0.1:3000/blank.html");
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_version":"5.131","display":"page","timeout_secs":5}"#).unwrap();
        assert_eq!(config.api_version, "5.131");
        assert_eq!(config.display, Display::Page);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.oauth_base, "https://oauth.vk.com");
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }
}
