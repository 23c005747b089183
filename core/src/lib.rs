//! Synchronous client core for the VK social network API.
//!
//! # Overview
//! Obtains an access token by driving the provider's HTML login pages
//! (implicit grant), then calls API methods with typed parameters and reads
//! the JSON answers through a lenient tree view.
//!
//! # Design
//! - Request construction and response interpretation are pure: the
//!   dispatcher and the authorization engine build `HttpRequest` values and
//!   consume `HttpResponse` values. All IO goes through the `Transport`
//!   trait, so tests script the provider without a network.
//! - `AuthorizationEngine` is an explicit state machine. A captcha halts it
//!   with `Error::CaptchaRequired`; the caller resubmits with a solution.
//! - A `Session` is immutable once issued and cheap to share across threads.
//! - Parameter constraints are checked before any IO happens.

pub mod auth;
pub mod client;
pub mod config;
pub mod docs;
pub mod error;
pub mod form;
pub mod http;
pub mod params;
pub mod response;
pub mod transport;
pub mod types;

pub use auth::{
    authorize_url, AuthState, AuthorizationEngine, CaptchaChallenge, CaptchaSolution, Credentials, Display,
    Landing, Scope, Session,
};
pub use client::{CallDispatcher, VkApi};
pub use config::ClientConfig;
pub use docs::DocsCategory;
pub use error::{ApiError, AuthorizationError, ConversionError, Error, NetworkError, Result, ValidationError};
pub use form::{Form, FormField};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Proxy};
pub use params::{ParamValue, ParameterSet, WireToken};
pub use response::{Node, NodeKind, Response};
pub use transport::{Transport, UreqTransport};
pub use types::{Document, ItemsPage, UploadServerInfo};
