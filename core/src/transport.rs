//! The network seam: a `Transport` executes `HttpRequest`s.
//!
//! # Design
//! `Transport` has one required method, so a test double only needs to map
//! a request to a canned response. The GET/POST/byte helpers are provided
//! on top of it. Implementations do no retries and never interpret payloads.
//!
//! `UreqTransport` follows redirects by hand instead of letting the agent do
//! it: the provider delivers tokens in the fragment of a redirect target, and
//! fragments do not survive a round-trip through `http::Uri`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};
use url::Url;

use crate::config::ClientConfig;
use crate::error::NetworkError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Proxy};

/// Executes HTTP requests, optionally through a proxy.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest, proxy: Option<&Proxy>) -> Result<HttpResponse, NetworkError>;

    fn get(&self, url: &str, proxy: Option<&Proxy>) -> Result<HttpResponse, NetworkError> {
        self.execute(&HttpRequest::get(url), proxy)
    }

    /// POST an url-encoded body.
    fn post(&self, url: &str, body: &str, proxy: Option<&Proxy>) -> Result<HttpResponse, NetworkError> {
        self.execute(&HttpRequest::form(url, body), proxy)
    }

    /// Download a resource as raw bytes.
    fn get_bytes(&self, url: &str, proxy: Option<&Proxy>) -> Result<Vec<u8>, NetworkError> {
        Ok(self.get(url, proxy)?.body)
    }

    /// POST raw bytes to an upload URL and return the response body.
    fn put_bytes(&self, url: &str, bytes: &[u8], proxy: Option<&Proxy>) -> Result<String, NetworkError> {
        let response = self.execute(&HttpRequest::bytes(url, bytes.to_vec()), proxy)?;
        Ok(response.text().into_owned())
    }
}

/// Blocking transport backed by `ureq`.
///
/// One agent (and so one cookie jar) is kept per proxy setting; the login
/// pages rely on cookies set earlier in the sequence.
pub struct UreqTransport {
    timeout: Duration,
    user_agent: String,
    max_redirects: u32,
    max_body_bytes: u64,
    agents: Mutex<HashMap<Option<Proxy>, ureq::Agent>>,
}

impl UreqTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            timeout: config.timeout(),
            user_agent: config.user_agent.clone(),
            max_redirects: config.max_redirects,
            max_body_bytes: config.max_body_bytes,
            agents: Mutex::new(HashMap::new()),
        }
    }

    fn agent(&self, proxy: Option<&Proxy>) -> Result<ureq::Agent, NetworkError> {
        let mut agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        let key = proxy.cloned();
        if let Some(agent) = agents.get(&key) {
            return Ok(agent.clone());
        }

        let proxy_config = match proxy {
            Some(p) => Some(ureq::Proxy::new(&p.uri()).map_err(|e| NetworkError::new(p.uri(), e))?),
            None => None,
        };
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            .timeout_global(Some(self.timeout))
            .proxy(proxy_config)
            .build()
            .new_agent();
        agents.insert(key, agent.clone());
        Ok(agent)
    }

    fn send_once(
        &self,
        agent: &ureq::Agent,
        method: HttpMethod,
        url: &str,
        headers: &[(String, String)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, NetworkError> {
        let target = strip_fragment(url);
        trace!(?method, url = target, "sending request");

        let result = match (method, body) {
            (HttpMethod::Get, _) => {
                let mut request = agent.get(target).header("user-agent", self.user_agent.as_str());
                for (key, value) in headers {
                    request = request.header(key.as_str(), value.as_str());
                }
                request.call()
            }
            (HttpMethod::Post, body) => {
                let mut request = agent.post(target).header("user-agent", self.user_agent.as_str());
                for (key, value) in headers {
                    request = request.header(key.as_str(), value.as_str());
                }
                match body {
                    Some(body) => request.send(body),
                    None => request.send_empty(),
                }
            }
        };

        let mut response = result.map_err(|e| NetworkError::new(target, e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .with_config()
            .limit(self.max_body_bytes)
            .read_to_vec()
            .map_err(|e| NetworkError::new(target, e))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
            final_url: url.to_string(),
        })
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest, proxy: Option<&Proxy>) -> Result<HttpResponse, NetworkError> {
        let agent = self.agent(proxy)?;
        let mut method = request.method;
        let mut url = request.url.clone();
        let mut headers = request.headers.clone();
        let mut body = request.body.clone();

        for _ in 0..=self.max_redirects {
            let response = self.send_once(&agent, method, &url, &headers, body.as_deref())?;
            let location = match response.header("location") {
                Some(location) if response.is_redirect() => location.to_string(),
                _ => return Ok(response),
            };

            let next = resolve(&url, &location)?;
            debug!(status = response.status, to = strip_fragment(&next), "following redirect");
            if !matches!(response.status, 307 | 308) {
                method = HttpMethod::Get;
                headers.clear();
                body = None;
            }
            url = next;
        }

        Err(NetworkError::new(
            request.url.clone(),
            format!("gave up after {} redirects", self.max_redirects),
        ))
    }
}

/// Resolve a `Location` header against the URL that produced it.
fn resolve(base: &str, location: &str) -> Result<String, NetworkError> {
    Url::parse(base)
        .and_then(|base| base.join(location))
        .map(String::from)
        .map_err(|e| NetworkError::new(location, e))
}

fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fragment_removes_token_part() {
        assert_eq!(
            strip_fragment("https://oauth.vk.com/blank.html#access_token=T"),
            "https://oauth.vk.com/blank.html"
        );
        assert_eq!(strip_fragment("https://vk.com/"), "https://vk.com/");
    }

    #[test]
    fn resolve_relative_location_keeps_fragment() {
        let next = resolve("https://oauth.vk.com/grant?x=1", "/blank.html#access_token=T&user_id=1").unwrap();
        assert_eq!(next, "https://oauth.vk.com/blank.html#access_token=T&user_id=1");
    }

    #[test]
    fn resolve_absolute_location() {
        let next = resolve("http://127.0.0.1:1/login", "https://oauth.vk.com/authorize?captcha_sid=5").unwrap();
        assert_eq!(next, "https://oauth.vk.com/authorize?captcha_sid=5");
    }

    #[test]
    fn resolve_rejects_unparseable_base() {
        assert!(resolve("not a url", "/x").is_err());
    }
}
