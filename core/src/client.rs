//! Method dispatch and the `VkApi` entry point.
//!
//! # Design
//! `CallDispatcher` is stateless apart from the method endpoint. Like the
//! rest of the core it splits every call into `build_call`, which produces
//! an `HttpRequest`, and `parse_call`, which consumes an `HttpResponse`;
//! `call` only glues the two around a `Transport`. An error envelope is
//! always surfaced as `ApiError`, never swallowed, and nothing here retries.
//!
//! `VkApi` bundles configuration, a shared transport and the dispatcher
//! behind the two interfaces the rest of a client builds on: `authorize`
//! and `call`.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::auth::{AuthorizationEngine, Credentials, Session};
use crate::config::ClientConfig;
use crate::docs::DocsCategory;
use crate::error::{ApiError, ConversionError, Error, ValidationError};
use crate::http::{HttpRequest, HttpResponse, Proxy};
use crate::params::ParameterSet;
use crate::response::Response;
use crate::transport::{Transport, UreqTransport};

/// Builds method calls and interprets their envelopes.
#[derive(Debug, Clone)]
pub struct CallDispatcher {
    api_base: String,
}

impl CallDispatcher {
    pub fn new(api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Append `access_token` and `v`, validate, and encode the request.
    pub fn build_call(
        &self,
        method: &str,
        params: &ParameterSet,
        session: &Session,
        api_version: &str,
    ) -> Result<HttpRequest, ValidationError> {
        let mut params = params.clone();
        params
            .set("access_token", session.access_token())
            .set("v", api_version);
        let body = params.serialize()?;
        Ok(HttpRequest::form(format!("{}/{method}", self.api_base), body))
    }

    /// Turn a raw body into the `response` node or a typed error.
    pub fn parse_call(&self, response: &HttpResponse) -> Result<Response, Error> {
        let raw: Arc<str> = Arc::from(response.text().as_ref());
        let envelope: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(_) if !response.is_success() => return Err(status_error(response)),
            Err(e) => return Err(ConversionError::Json(e.to_string()).into()),
        };

        let Value::Object(mut members) = envelope else {
            return Err(ConversionError::Mismatch {
                expected: "response envelope",
                found: "non-object body".to_string(),
            }
            .into());
        };

        if let Some(error) = members.remove("error") {
            let error = api_error(error, members);
            warn!(code = error.code, message = %error.message, "API error");
            return Err(error.into());
        }
        if !response.is_success() {
            return Err(status_error(response));
        }

        match members.remove("response") {
            Some(root) => Ok(Response::from_parts(raw, root)),
            None => Err(ConversionError::Mismatch {
                expected: "response envelope",
                found: "object without `response`".to_string(),
            }
            .into()),
        }
    }

    pub fn call(
        &self,
        transport: &dyn Transport,
        method: &str,
        params: &ParameterSet,
        session: &Session,
        api_version: &str,
    ) -> Result<Response, Error> {
        let request = self.build_call(method, params, session, api_version)?;
        debug!(method, "dispatching call");
        let response = transport.execute(&request, session.proxy())?;
        self.parse_call(&response)
    }
}

fn status_error(response: &HttpResponse) -> Error {
    Error::Status {
        status: response.status,
        body: response.text().into_owned(),
    }
}

/// Map the `error` member of an envelope to `ApiError`.
///
/// Method errors are objects with `error_code` and `error_msg`. OAuth and
/// upload endpoints answer with a bare string plus `error_description`
/// beside it; those get code 0.
fn api_error(error: Value, siblings: Map<String, Value>) -> ApiError {
    match error {
        Value::Object(mut fields) => {
            let code = fields
                .remove("error_code")
                .and_then(|code| match code {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                })
                .unwrap_or(0);
            let message = match fields.remove("error_msg") {
                Some(Value::String(message)) => message,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            ApiError {
                code,
                message,
                extra: fields,
            }
        }
        Value::String(message) => ApiError {
            code: 0,
            message,
            extra: siblings,
        },
        other => ApiError {
            code: 0,
            message: other.to_string(),
            extra: siblings,
        },
    }
}

/// The client entry point: authorization, method calls, uploads.
#[derive(Clone)]
pub struct VkApi {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    dispatcher: CallDispatcher,
}

impl VkApi {
    /// A client over the blocking `ureq` transport.
    pub fn new(config: ClientConfig) -> Self {
        let transport = Arc::new(UreqTransport::new(&config));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let dispatcher = CallDispatcher::new(&config.api_base);
        Self {
            config,
            transport,
            dispatcher,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn dispatcher(&self) -> &CallDispatcher {
        &self.dispatcher
    }

    /// Run the login sequence. See `AuthorizationEngine::authorize`.
    pub fn authorize(&self, credentials: &Credentials) -> Result<Session, Error> {
        AuthorizationEngine::new(self.transport.as_ref(), &self.config).authorize(credentials)
    }

    /// Call `method` with the configured API version.
    pub fn call(&self, method: &str, params: &ParameterSet, session: &Session) -> Result<Response, Error> {
        self.dispatcher
            .call(self.transport.as_ref(), method, params, session, &self.config.api_version)
    }

    /// POST a file to an upload URL obtained from a `*.getUploadServer`
    /// method and return the `file` node of the answer.
    pub fn upload(&self, upload_url: &str, bytes: &[u8], session: &Session) -> Result<Response, Error> {
        let body = self.transport.put_bytes(upload_url, bytes, session.proxy())?;
        debug!(size = bytes.len(), "uploaded file");
        let raw: Arc<str> = Arc::from(body.as_str());
        let parsed: Value = serde_json::from_str(&body).map_err(|e| ConversionError::Json(e.to_string()))?;
        let Value::Object(mut members) = parsed else {
            return Err(ConversionError::Mismatch {
                expected: "upload result object",
                found: "non-object body".to_string(),
            }
            .into());
        };

        if let Some(error) = members.remove("error") {
            return Err(api_error(error, members).into());
        }
        match members.remove("file") {
            Some(file) => Ok(Response::from_parts(raw, file)),
            None => Err(ConversionError::Mismatch {
                expected: "upload result with `file`",
                found: "object without `file`".to_string(),
            }
            .into()),
        }
    }

    pub fn download(&self, url: &str, proxy: Option<&Proxy>) -> Result<Vec<u8>, Error> {
        Ok(self.transport.get_bytes(url, proxy)?)
    }

    /// Document methods bound to `session`.
    pub fn docs<'a>(&'a self, session: &'a Session) -> DocsCategory<'a> {
        DocsCategory::new(self, session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use url::form_urlencoded;

    fn dispatcher() -> CallDispatcher {
        CallDispatcher::new("https://api.vk.com/method/")
    }

    fn ok(body: &str) -> HttpResponse {
        HttpResponse::ok("https://api.vk.com/method/x", body)
    }

    #[test]
    fn build_call_appends_token_and_version() {
        let params = ParameterSet::new().with("user_ids", vec![1, 2]);
        let req = dispatcher()
            .build_call("users.get", &params, &Session::from_token("T0K", 7), "5.40")
            .unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "https://api.vk.com/method/users.get");
        let pairs: Vec<(String, String)> = form_urlencoded::parse(req.body.as_deref().unwrap())
            .into_owned()
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("user_ids".to_string(), "1,2".to_string()),
                ("access_token".to_string(), "T0K".to_string()),
                ("v".to_string(), "5.40".to_string()),
            ]
        );
    }

    #[test]
    fn build_call_rejects_invalid_params() {
        let mut params = ParameterSet::new();
        params.set_required("title", "");
        let err = dispatcher()
            .build_call("docs.save", &params, &Session::from_token("T", 1), "5.40")
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingRequired { .. }));
    }

    #[test]
    fn parse_call_returns_response_node_with_raw_body() {
        let body = r#"{"response":{"count":1,"items":[{"id":5}]}}"#;
        let response = dispatcher().parse_call(&ok(body)).unwrap();
        assert_eq!(response.get("count").as_i64().unwrap(), 1);
        assert_eq!(response.path("items.0.id").as_i64().unwrap(), 5);
        assert_eq!(response.raw_json(), body);
    }

    #[test]
    fn parse_call_maps_error_envelope() {
        let body = r#"{"error":{"error_code":14,"error_msg":"Captcha needed","captcha_sid":"1","captcha_img":"img"}}"#;
        let err = dispatcher().parse_call(&ok(body)).unwrap_err();
        match err {
            Error::Api(api) => {
                assert_eq!(api.code, 14);
                assert_eq!(api.message, "Captcha needed");
                assert_eq!(api.captcha().unwrap().sid, 1);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn parse_call_maps_string_error() {
        let body = r#"{"error":"invalid_token","error_description":"token expired"}"#;
        let Error::Api(api) = dispatcher().parse_call(&ok(body)).unwrap_err() else {
            panic!("expected ApiError");
        };
        assert_eq!(api.code, 0);
        assert_eq!(api.message, "invalid_token");
        assert_eq!(api.extra["error_description"], "token expired");
    }

    #[test]
    fn parse_call_non_json_success_is_conversion_error() {
        let err = dispatcher().parse_call(&ok("<html>")).unwrap_err();
        assert!(matches!(err, Error::Conversion(ConversionError::Json(_))));
    }

    #[test]
    fn parse_call_non_json_failure_is_status_error() {
        let response = HttpResponse {
            status: 502,
            headers: Vec::new(),
            body: b"bad gateway".to_vec(),
            final_url: "https://api.vk.com/method/x".to_string(),
        };
        let err = dispatcher().parse_call(&response).unwrap_err();
        assert!(matches!(err, Error::Status { status: 502, .. }));
    }

    #[test]
    fn parse_call_without_response_member_fails() {
        let err = dispatcher().parse_call(&ok(r#"{"something":1}"#)).unwrap_err();
        assert!(matches!(err, Error::Conversion(ConversionError::Mismatch { .. })));
    }
}
