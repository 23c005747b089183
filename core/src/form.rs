//! HTML form scraping for the login pages.
//!
//! # Design
//! A `Form` is an immutable snapshot: `fill` returns a new form, so the
//! state before filling stays available for diagnostics. The action URL is
//! resolved against the page it came from at parse time, so submitting
//! needs nothing but a transport.

use scraper::{ElementRef, Html, Selector};
use url::{form_urlencoded, Url};

use crate::error::{AuthorizationError, NetworkError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Proxy};
use crate::transport::Transport;

/// A named field inside a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: String,
    /// The `type` attribute for inputs, the tag name otherwise.
    pub kind: String,
}

/// A submittable form scraped from a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    action: String,
    method: HttpMethod,
    fields: Vec<FormField>,
}

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

impl Form {
    /// Parse the login-relevant form of `html`, served at `page_url`.
    ///
    /// A form holding a password input wins; otherwise the first form on the
    /// page is used.
    pub fn parse(html: &str, page_url: &str) -> Result<Self, AuthorizationError> {
        let document = Html::parse_document(html);
        let form_sel = selector("form");
        let password_sel = selector("input[type=\"password\"]");

        let forms: Vec<ElementRef<'_>> = document.select(&form_sel).collect();
        let form = forms
            .iter()
            .find(|form| form.select(&password_sel).next().is_some())
            .or_else(|| forms.first())
            .ok_or_else(|| AuthorizationError::FormNotFound {
                url: page_url.to_string(),
            })?;

        let action = resolve_action(page_url, form.value().attr("action").unwrap_or(""))?;
        let method = match form.value().attr("method") {
            Some(method) if method.eq_ignore_ascii_case("get") => HttpMethod::Get,
            _ => HttpMethod::Post,
        };

        Ok(Self {
            action,
            method,
            fields: collect_fields(form),
        })
    }

    /// Parse the form on the page a response landed on.
    pub fn from_response(response: &HttpResponse) -> Result<Self, AuthorizationError> {
        Self::parse(&response.text(), &response.final_url)
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_str())
    }

    /// A copy of this form with `name` set to `value`. A field the page did
    /// not render is appended as hidden.
    pub fn fill(&self, name: &str, value: impl Into<String>) -> Form {
        let mut form = self.clone();
        let value = value.into();
        match form.fields.iter_mut().find(|field| field.name == name) {
            Some(field) => field.value = value,
            None => form.fields.push(FormField {
                name: name.to_string(),
                value,
                kind: "hidden".to_string(),
            }),
        }
        form
    }

    /// Fields url-encoded in page order.
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.fields.iter().map(|field| (&field.name, &field.value)))
            .finish()
    }

    pub fn to_request(&self) -> HttpRequest {
        match self.method {
            HttpMethod::Post => HttpRequest::form(&self.action, self.encode()),
            HttpMethod::Get => {
                let separator = if self.action.contains('?') { '&' } else { '?' };
                HttpRequest::get(format!("{}{separator}{}", self.action, self.encode()))
            }
        }
    }

    pub fn submit(&self, transport: &dyn Transport, proxy: Option<&Proxy>) -> Result<HttpResponse, NetworkError> {
        transport.execute(&self.to_request(), proxy)
    }
}

fn resolve_action(page_url: &str, action: &str) -> Result<String, AuthorizationError> {
    let resolved = match Url::parse(page_url) {
        Ok(base) => base.join(action),
        Err(_) => Url::parse(action),
    };
    resolved
        .map(String::from)
        .map_err(|_| AuthorizationError::InvalidUrl {
            url: action.to_string(),
        })
}

fn collect_fields(form: &ElementRef<'_>) -> Vec<FormField> {
    let field_sel = selector("input, textarea, select");
    let option_sel = selector("option");
    let mut fields = Vec::new();

    for element in form.select(&field_sel) {
        let attrs = element.value();
        let Some(name) = attrs.attr("name").filter(|name| !name.is_empty()) else {
            continue;
        };

        let (kind, value) = match attrs.name() {
            "textarea" => ("textarea".to_string(), element.text().collect::<String>()),
            "select" => {
                let options: Vec<ElementRef<'_>> = element.select(&option_sel).collect();
                let chosen = options
                    .iter()
                    .find(|option| option.value().attr("selected").is_some())
                    .or_else(|| options.first());
                let value = chosen
                    .map(|option| {
                        option
                            .value()
                            .attr("value")
                            .map(str::to_string)
                            .unwrap_or_else(|| option.text().collect())
                    })
                    .unwrap_or_default();
                ("select".to_string(), value)
            }
            _ => {
                let kind = attrs.attr("type").unwrap_or("text").to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "button" | "image" | "reset" | "file" => continue,
                    "checkbox" | "radio" if attrs.attr("checked").is_none() => continue,
                    _ => {}
                }
                let value = attrs.attr("value").unwrap_or("").to_string();
                (kind, value)
            }
        };

        fields.push(FormField {
            name: name.to_string(),
            value,
            kind,
        });
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_PAGE: &str = r#"
        <html><body>
          <form method="get" action="/search"><input name="q"></form>
          <form method="post" action="https://login.vk.com/?act=login&soft=1">
            <input type="hidden" name="_origin" value="https://oauth.vk.com">
            <input type="hidden" name="ip_h" value="abc123">
            <input type="text" name="email">
            <input type="password" name="pass">
            <input type="checkbox" name="remember" value="1">
            <input type="submit" value="Log in">
          </form>
        </body></html>
    "#;

    #[test]
    fn parse_picks_password_form_and_collects_fields() {
        let form = Form::parse(LOGIN_PAGE, "https://oauth.vk.com/authorize?client_id=1").unwrap();
        assert_eq!(form.action(), "https://login.vk.com/?act=login&soft=1");
        assert_eq!(form.method(), HttpMethod::Post);
        let names: Vec<&str> = form.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["_origin", "ip_h", "email", "pass"]);
        assert_eq!(form.field("ip_h"), Some("abc123"));
        assert_eq!(form.fields()[3].kind, "password");
    }

    #[test]
    fn relative_action_resolves_against_page() {
        let html = r#"<form method="post" action="/grant?hash=9"><input type="hidden" name="uid" value="42"></form>"#;
        let form = Form::parse(html, "https://oauth.vk.com/authorize?x=1").unwrap();
        assert_eq!(form.action(), "https://oauth.vk.com/grant?hash=9");
    }

    #[test]
    fn missing_action_posts_back_to_page() {
        let html = r#"<form method="post"><input name="code"></form>"#;
        let form = Form::parse(html, "https://m.vk.com/login?act=authcheck").unwrap();
        assert_eq!(form.action(), "https://m.vk.com/login?act=authcheck");
    }

    #[test]
    fn page_without_form_fails() {
        let err = Form::parse("<html><p>hi</p></html>", "https://oauth.vk.com/x").unwrap_err();
        assert_eq!(
            err,
            AuthorizationError::FormNotFound {
                url: "https://oauth.vk.com/x".to_string()
            }
        );
    }

    #[test]
    fn textarea_select_and_checked_inputs() {
        let html = r#"
            <form action="/f">
              <textarea name="note">hello</textarea>
              <select name="lang"><option value="en">English</option><option value="ru" selected>Russian</option></select>
              <input type="checkbox" name="agree" value="yes" checked>
            </form>"#;
        let form = Form::parse(html, "https://vk.com/").unwrap();
        assert_eq!(form.field("note"), Some("hello"));
        assert_eq!(form.field("lang"), Some("ru"));
        assert_eq!(form.field("agree"), Some("yes"));
    }

    #[test]
    fn fill_returns_new_form_and_leaves_original() {
        let form = Form::parse(LOGIN_PAGE, "https://oauth.vk.com/authorize").unwrap();
        let filled = form.fill("email", "user@example.com");
        assert_eq!(form.field("email"), Some(""));
        assert_eq!(filled.field("email"), Some("user@example.com"));
    }

    #[test]
    fn fill_is_idempotent_and_differs_in_one_field() {
        let form = Form::parse(LOGIN_PAGE, "https://oauth.vk.com/authorize").unwrap();
        let once = form.fill("pass", "secret");
        let twice = once.fill("pass", "secret");
        assert_eq!(once, twice);

        let other = form.fill("pass", "different");
        let differing: Vec<&str> = once
            .fields()
            .iter()
            .zip(other.fields())
            .filter(|(a, b)| a != b)
            .map(|(a, _)| a.name.as_str())
            .collect();
        assert_eq!(differing, vec!["pass"]);
        assert_eq!(once.action(), other.action());
    }

    #[test]
    fn fill_appends_unknown_field_as_hidden() {
        let form = Form::parse(LOGIN_PAGE, "https://oauth.vk.com/authorize").unwrap();
        let filled = form.fill("captcha_sid", "557");
        let field = filled.fields().last().unwrap();
        assert_eq!(field.name, "captcha_sid");
        assert_eq!(field.kind, "hidden");
        assert_eq!(form.fields().len() + 1, filled.fields().len());
    }

    #[test]
    fn post_request_encodes_fields() {
        let form = Form::parse(LOGIN_PAGE, "https://oauth.vk.com/authorize")
            .unwrap()
            .fill("email", "a@b.c")
            .fill("pass", "p w");
        let req = form.to_request();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "https://login.vk.com/?act=login&soft=1");
        assert_eq!(
            req.body_text(),
            "_origin=https%3A%2F%2Foauth.vk.com&ip_h=abc123&email=a%40b.c&pass=p+w"
        );
    }

    #[test]
    fn get_form_appends_query() {
        let html = r#"<form method="GET" action="/search?x=1"><input name="q" value="cats"></form>"#;
        let req = Form::parse(html, "https://vk.com/").unwrap().to_request();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "https://vk.com/search?x=1&q=cats");
    }
}
