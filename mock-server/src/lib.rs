//! In-memory emulation of the provider: the HTML login pages of the
//! implicit grant, the method endpoint and a document upload host.
//!
//! # Design
//! Every piece of state sits in one `ProviderState` behind an async
//! `RwLock`. Page flows use plain HTML forms and redirects, so a client
//! drives them exactly as it would the real pages. Tokens and uploaded file
//! names are random UUIDs.

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{info, warn};
use uuid::Uuid;

pub const APP_ID: u64 = 4_123_456;

/// An account that logs in with email and password only.
pub const USER_EMAIL: &str = "user@example.com";
pub const USER_PASSWORD: &str = "secret";
pub const USER_ID: i64 = 42;

/// An account whose login always demands a captcha.
pub const CAPTCHA_EMAIL: &str = "robot@example.com";
pub const CAPTCHA_PASSWORD: &str = "beep";
pub const CAPTCHA_USER_ID: i64 = 43;
pub const CAPTCHA_SID: i64 = 557;
pub const CAPTCHA_KEY: &str = "x7k2";

/// An account protected by a one-time code.
pub const TWO_FACTOR_EMAIL: &str = "careful@example.com";
pub const TWO_FACTOR_PASSWORD: &str = "hunter2";
pub const TWO_FACTOR_USER_ID: i64 = 44;
pub const TWO_FACTOR_CODE: &str = "123456";

pub const TOKEN_LIFETIME_SECS: i64 = 86_400;

/// The provider accepts documents up to 200 MB.
pub const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

pub const ERROR_UNKNOWN_METHOD: i64 = 3;
pub const ERROR_AUTHORIZATION_FAILED: i64 = 5;
pub const ERROR_PARAM: i64 = 100;
pub const ERROR_INVALID_DOC: i64 = 1150;

#[derive(Clone, Debug)]
pub struct Account {
    pub email: &'static str,
    pub password: &'static str,
    pub user_id: i64,
    pub captcha: bool,
    pub two_factor: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Doc {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub size: u64,
    pub ext: String,
    pub url: String,
    pub date: i64,
}

pub struct ProviderState {
    pub accounts: Vec<Account>,
    /// access token -> user id
    pub tokens: HashMap<String, i64>,
    /// login hash -> user id, between password check and consent
    pub pending: HashMap<String, i64>,
    pub docs: Vec<Doc>,
    /// uploaded file name -> contents
    pub files: HashMap<String, Vec<u8>>,
    next_doc_id: i64,
}

impl Default for ProviderState {
    fn default() -> Self {
        Self {
            accounts: vec![
                Account {
                    email: USER_EMAIL,
                    password: USER_PASSWORD,
                    user_id: USER_ID,
                    captcha: false,
                    two_factor: false,
                },
                Account {
                    email: CAPTCHA_EMAIL,
                    password: CAPTCHA_PASSWORD,
                    user_id: CAPTCHA_USER_ID,
                    captcha: true,
                    two_factor: false,
                },
                Account {
                    email: TWO_FACTOR_EMAIL,
                    password: TWO_FACTOR_PASSWORD,
                    user_id: TWO_FACTOR_USER_ID,
                    captcha: false,
                    two_factor: true,
                },
            ],
            tokens: HashMap::new(),
            pending: HashMap::new(),
            docs: Vec::new(),
            files: HashMap::new(),
            next_doc_id: 1,
        }
    }
}

pub type Db = Arc<RwLock<ProviderState>>;

type Params = HashMap<String, String>;

pub fn app() -> Router {
    app_with_state(Arc::new(RwLock::new(ProviderState::default())))
}

pub fn app_with_state(db: Db) -> Router {
    Router::new()
        .route("/authorize", get(authorize_page))
        .route("/login", post(login))
        .route("/two-factor", post(two_factor))
        .route("/grant", post(grant))
        .route("/blank.html", get(blank))
        .route("/method/{name}", post(method))
        .route("/upload", post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)))
        .route("/files/{name}", get(download))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Serve over a caller-seeded state.
pub async fn run_with_state(listener: TcpListener, db: Db) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(db)).await
}

// ---------------------------------------------------------------------------
// Login pages
// ---------------------------------------------------------------------------

fn login_form(captcha_sid: Option<&str>) -> String {
    let captcha = match captcha_sid {
        Some(sid) => format!(
            r#"<img src="/captcha.php?sid={sid}"><input type="hidden" name="captcha_sid" value="{sid}"><input type="text" name="captcha_key">"#
        ),
        None => String::new(),
    };
    format!(
        r#"<html><body>
<form method="post" action="/login">
<input type="hidden" name="_origin" value="mock">
<input type="hidden" name="ip_h" value="5f1b">
<input type="text" name="email">
<input type="password" name="pass">
{captcha}
<input type="submit" value="Log in">
</form>
</body></html>"#
    )
}

fn code_form(hash: &str) -> String {
    format!(
        r#"<html><body>
<p>Enter the code from the authenticator app.</p>
<form method="post" action="/two-factor?hash={hash}">
<input type="text" name="code">
<input type="submit" value="Confirm">
</form>
</body></html>"#
    )
}

fn consent_form(hash: &str) -> String {
    format!(
        r#"<html><body>
<p>The application requests access to your account.</p>
<form method="post" action="/grant?hash={hash}">
<input type="submit" value="Allow">
</form>
</body></html>"#
    )
}

fn denied(error: &str, description: &str) -> Response {
    let description: String = description.replace(' ', "+");
    Redirect::to(&format!("/blank.html#error={error}&error_description={description}")).into_response()
}

async fn authorize_page(Query(query): Query<Params>) -> Html<String> {
    Html(login_form(query.get("captcha_sid").map(String::as_str)))
}

async fn login(State(db): State<Db>, Form(form): Form<Params>) -> Response {
    let email = form.get("email").map(String::as_str).unwrap_or_default();
    let password = form.get("pass").map(String::as_str).unwrap_or_default();

    let mut state = db.write().await;
    let Some(account) = state
        .accounts
        .iter()
        .find(|account| account.email == email && account.password == password)
        .cloned()
    else {
        warn!(email, "rejected credentials");
        return denied("invalid_grant", "Invalid login or password");
    };

    if account.captcha {
        let solved = form.get("captcha_sid") == Some(&CAPTCHA_SID.to_string())
            && form.get("captcha_key").map(String::as_str) == Some(CAPTCHA_KEY);
        if !solved {
            info!(email, "captcha demanded");
            return Redirect::to(&format!("/authorize?captcha_sid={CAPTCHA_SID}")).into_response();
        }
    }

    let hash = Uuid::new_v4().simple().to_string();
    state.pending.insert(hash.clone(), account.user_id);
    if account.two_factor {
        Html(code_form(&hash)).into_response()
    } else {
        Html(consent_form(&hash)).into_response()
    }
}

async fn two_factor(State(db): State<Db>, Query(query): Query<Params>, Form(form): Form<Params>) -> Response {
    let hash = query.get("hash").cloned().unwrap_or_default();
    if !db.read().await.pending.contains_key(&hash) {
        return denied("invalid_request", "Unknown login attempt");
    }
    if form.get("code").map(String::as_str) != Some(TWO_FACTOR_CODE) {
        return denied("invalid_code", "Wrong confirmation code");
    }
    Html(consent_form(&hash)).into_response()
}

async fn grant(State(db): State<Db>, Query(query): Query<Params>) -> Response {
    let hash = query.get("hash").cloned().unwrap_or_default();
    let mut state = db.write().await;
    let Some(user_id) = state.pending.remove(&hash) else {
        return denied("invalid_request", "Unknown login attempt");
    };
    let token = Uuid::new_v4().simple().to_string();
    state.tokens.insert(token.clone(), user_id);
    info!(user_id, "token issued");
    Redirect::to(&format!(
        "/blank.html#access_token={token}&expires_in={TOKEN_LIFETIME_SECS}&user_id={user_id}"
    ))
    .into_response()
}

async fn blank() -> Html<&'static str> {
    Html("<html><body></body></html>")
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

fn api_error(code: i64, message: &str, method: &str) -> Json<Value> {
    Json(json!({
        "error": {
            "error_code": code,
            "error_msg": message,
            "request_params": [{"key": "method", "value": method}],
        }
    }))
}

fn missing(param: &str, method: &str) -> Json<Value> {
    api_error(
        ERROR_PARAM,
        &format!("One of the parameters specified was missing or invalid: {param} is undefined"),
        method,
    )
}

fn int_param(params: &Params, key: &str) -> Option<i64> {
    params.get(key).and_then(|value| value.parse().ok())
}

fn host(headers: &HeaderMap) -> &str {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost")
}

async fn method(
    State(db): State<Db>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Form(params): Form<Params>,
) -> Json<Value> {
    let mut state = db.write().await;
    let token = params.get("access_token").map(String::as_str).unwrap_or_default();
    let Some(&user_id) = state.tokens.get(token) else {
        return api_error(
            ERROR_AUTHORIZATION_FAILED,
            "User authorization failed: invalid access_token.",
            &name,
        );
    };

    let response = match name.as_str() {
        "users.get" => json!([{"id": user_id, "first_name": "Test", "last_name": "User"}]),
        "docs.get" => {
            let owner_id = int_param(&params, "owner_id").unwrap_or(user_id);
            let offset = int_param(&params, "offset").unwrap_or(0).max(0) as usize;
            let count = int_param(&params, "count").unwrap_or(100).max(0) as usize;
            let owned: Vec<&Doc> = state.docs.iter().filter(|doc| doc.owner_id == owner_id).rev().collect();
            let items: Vec<&Doc> = owned.iter().skip(offset).take(count).copied().collect();
            json!({"count": owned.len(), "items": items})
        }
        "docs.getById" => {
            let Some(ids) = params.get("docs") else {
                return missing("docs", &name);
            };
            let wanted: Vec<(i64, i64)> = ids
                .split(',')
                .filter_map(|pair| pair.split_once('_'))
                .filter_map(|(owner, id)| Some((owner.parse().ok()?, id.parse().ok()?)))
                .collect();
            let found: Vec<&Doc> = wanted
                .iter()
                .filter_map(|(owner, id)| state.docs.iter().find(|doc| doc.owner_id == *owner && doc.id == *id))
                .collect();
            json!(found)
        }
        "docs.getUploadServer" | "docs.getWallUploadServer" => {
            json!({"upload_url": format!("http://{}/upload", host(&headers))})
        }
        "docs.save" => {
            let (Some(file), Some(title)) = (params.get("file"), params.get("title")) else {
                return missing("file", &name);
            };
            let Some(size) = state.files.get(file).map(|bytes| bytes.len() as u64) else {
                return api_error(ERROR_PARAM, "One of the parameters specified was missing or invalid: file", &name);
            };
            let id = state.next_doc_id;
            state.next_doc_id += 1;
            let doc = Doc {
                id,
                owner_id: user_id,
                title: title.clone(),
                size,
                ext: title.rsplit_once('.').map(|(_, ext)| ext.to_string()).unwrap_or_default(),
                url: format!("http://{}/files/{file}", host(&headers)),
                date: 1_445_000_000 + id,
            };
            state.docs.push(doc.clone());
            info!(id, user_id, "document saved");
            json!([doc])
        }
        "docs.delete" => {
            let (Some(owner_id), Some(doc_id)) = (int_param(&params, "owner_id"), int_param(&params, "doc_id")) else {
                return missing("doc_id", &name);
            };
            let before = state.docs.len();
            state
                .docs
                .retain(|doc| !(doc.owner_id == owner_id && doc.id == doc_id && doc.owner_id == user_id));
            if state.docs.len() == before {
                return api_error(ERROR_INVALID_DOC, "Invalid document id", &name);
            }
            json!(1)
        }
        "docs.add" => {
            let (Some(owner_id), Some(doc_id)) = (int_param(&params, "owner_id"), int_param(&params, "doc_id")) else {
                return missing("doc_id", &name);
            };
            let Some(source) = state
                .docs
                .iter()
                .find(|doc| doc.owner_id == owner_id && doc.id == doc_id)
                .cloned()
            else {
                return api_error(ERROR_INVALID_DOC, "Invalid document id", &name);
            };
            let id = state.next_doc_id;
            state.next_doc_id += 1;
            state.docs.push(Doc {
                id,
                owner_id: user_id,
                ..source
            });
            json!(id)
        }
        _ => return api_error(ERROR_UNKNOWN_METHOD, "Unknown method passed", &name),
    };

    Json(json!({ "response": response }))
}

// ---------------------------------------------------------------------------
// Upload host
// ---------------------------------------------------------------------------

async fn upload(State(db): State<Db>, body: Bytes) -> Json<Value> {
    if body.is_empty() {
        return Json(json!({"error": "no_file", "error_description": "The request carries no file"}));
    }
    let name = Uuid::new_v4().simple().to_string();
    db.write().await.files.insert(name.clone(), body.to_vec());
    Json(json!({ "file": name }))
}

async fn download(State(db): State<Db>, Path(name): Path<String>) -> Result<Vec<u8>, StatusCode> {
    db.read().await.files.get(&name).cloned().ok_or(StatusCode::NOT_FOUND)
}
