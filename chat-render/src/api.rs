//! JSON API helper with anti-forgery token handling
//!
//! Every request carries the `X-CSRF-Token` header. The token is fetched
//! once and cached; a 403 clears the cache and the request is retried
//! exactly once with a fresh token. Being redirected to the login page
//! surfaces as [`ApiError::AuthExpired`] so the caller can navigate there.

use std::cell::RefCell;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use shared_types::CsrfTokenResponse;

use crate::config::RenderConfig;

pub const CSRF_HEADER: &str = "X-CSRF-Token";

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Session expired, redirected to {location}")]
    AuthExpired { location: String },

    #[error("Failed to parse CSRF token response: {0}")]
    CsrfParse(String),

    #[error("{0}")]
    CsrfRejected(String),

    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: &str, body: String) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub redirected: bool,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Same-origin HTTP with cookies.
#[async_trait(?Send)]
pub trait HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError>;

    /// Store a cookie for the page (`name=value; attributes`).
    fn set_cookie(&self, cookie: &str);
}

pub struct ApiClient<T: HttpTransport> {
    transport: T,
    csrf_path: String,
    login_path: String,
    token: RefCell<Option<String>>,
}

impl<T: HttpTransport> ApiClient<T> {
    pub fn new(transport: T, config: &RenderConfig) -> Self {
        Self {
            transport,
            csrf_path: config.csrf_path.clone(),
            login_path: config.login_path.clone(),
            token: RefCell::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cached_token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    fn check_login_redirect(&self, response: &HttpResponse) -> Result<(), ApiError> {
        if response.redirected && response.url.ends_with(&self.login_path) {
            tracing::warn!(location = %response.url, "Redirected to login");
            return Err(ApiError::AuthExpired {
                location: response.url.clone(),
            });
        }
        Ok(())
    }

    /// The cached token, fetching it first if needed.
    pub async fn csrf_token(&self) -> Result<String, ApiError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let response = self.transport.send(HttpRequest::get(&self.csrf_path)).await?;
        self.check_login_redirect(&response)?;

        let parsed: CsrfTokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| ApiError::CsrfParse(e.to_string()))?;
        if !parsed.ok {
            let message = parsed
                .error
                .unwrap_or_else(|| "Failed to get CSRF token".to_string());
            tracing::error!(error = %message, "CSRF token rejected");
            return Err(ApiError::CsrfRejected(message));
        }

        let token = parsed.token.unwrap_or_default();
        let runtime_id = parsed.runtime_id.unwrap_or_default();
        self.transport.set_cookie(&format!(
            "csrf_token_{runtime_id}={token}; SameSite=Strict; Path=/"
        ));
        *self.token.borrow_mut() = Some(token.clone());
        Ok(token)
    }

    /// Send `request` with the anti-forgery header, retrying once on 403.
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut retry = true;
        loop {
            let token = self.csrf_token().await?;
            let mut attempt = request.clone();
            attempt.set_header(CSRF_HEADER, &token);

            let response = self.transport.send(attempt).await?;
            if response.status == 403 && retry {
                tracing::debug!(url = %request.url, "403 with cached token; refreshing");
                *self.token.borrow_mut() = None;
                retry = false;
                continue;
            }
            self.check_login_redirect(&response)?;
            return Ok(response);
        }
    }

    /// POST `body` as JSON and decode the reply. Empty replies are `None`.
    pub async fn call_json<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<Option<Value>, ApiError> {
        let payload =
            serde_json::to_string(body).map_err(|e| ApiError::InvalidJson(e.to_string()))?;
        let response = self.fetch(HttpRequest::post_json(endpoint, payload)).await?;

        if !response.is_success() {
            let message = error_message(&response.body);
            tracing::error!(endpoint, status = response.status, error = %message, "API call failed");
            return Err(ApiError::Status {
                status: response.status,
                message,
            });
        }

        if response.status == 204 || response.header("Content-Length") == Some("0") {
            return Ok(None);
        }

        let is_json = response
            .header("Content-Type")
            .map_or(false, |ct| ct.contains("application/json"));
        if is_json {
            return serde_json::from_str(&response.body)
                .map(Some)
                .map_err(|e| ApiError::InvalidJson(e.to_string()));
        }

        match serde_json::from_str(&response.body) {
            Ok(value) => Ok(Some(value)),
            Err(_) if response.body.is_empty() => Ok(None),
            Err(_) => Ok(Some(Value::String(response.body))),
        }
    }
}

/// Error text from a failed response: JSON `error`, then `message`, then
/// the raw body.
fn error_message(body: &str) -> String {
    if let Ok(Value::Object(json)) = serde_json::from_str::<Value>(body) {
        for key in ["error", "message"] {
            match json.get(key) {
                Some(Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(Value::Null) | Some(Value::Bool(false)) | None => {}
                Some(Value::String(_)) => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    body.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedTransport {
        responses: RefCell<VecDeque<HttpResponse>>,
        requests: RefCell<Vec<HttpRequest>>,
        cookies: RefCell<Vec<String>>,
    }

    impl ScriptedTransport {
        fn with(responses: Vec<HttpResponse>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait(?Send)]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
            self.requests.borrow_mut().push(request);
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| ApiError::Transport("no scripted response".to_string()))
        }

        fn set_cookie(&self, cookie: &str) {
            self.cookies.borrow_mut().push(cookie.to_string());
        }
    }

    fn token_response(token: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            url: "/csrf_token".to_string(),
            body: format!(r#"{{"ok":true,"token":"{token}","runtime_id":"rt1"}}"#),
            ..Default::default()
        }
    }

    fn json_response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            url: "/api".to_string(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string(),
            ..Default::default()
        }
    }

    fn client(responses: Vec<HttpResponse>) -> ApiClient<ScriptedTransport> {
        ApiClient::new(ScriptedTransport::with(responses), &RenderConfig::default())
    }

    #[tokio::test]
    async fn test_token_is_cached_and_sent() {
        let api = client(vec![
            token_response("t1"),
            json_response(200, r#"{"a":1}"#),
            json_response(200, r#"{"b":2}"#),
        ]);
        assert_eq!(api.call_json("/api", &serde_json::json!({})).await.unwrap().unwrap()["a"], 1);
        api.call_json("/api", &serde_json::json!({})).await.unwrap();

        let requests = api.transport().requests.borrow();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].header(CSRF_HEADER), Some("t1"));
        assert_eq!(requests[2].header(CSRF_HEADER), Some("t1"));
        assert_eq!(
            api.transport().cookies.borrow()[0],
            "csrf_token_rt1=t1; SameSite=Strict; Path=/"
        );
    }

    #[tokio::test]
    async fn test_403_refreshes_token_and_retries_once() {
        let api = client(vec![
            token_response("old"),
            json_response(403, "{}"),
            token_response("new"),
            json_response(403, r#"{"error":"still forbidden"}"#),
        ]);
        let err = api.call_json("/api", &1).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Status {
                status: 403,
                message: "still forbidden".to_string()
            }
        );
        let requests = api.transport().requests.borrow();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[3].header(CSRF_HEADER), Some("new"));
    }

    #[tokio::test]
    async fn test_login_redirect_is_auth_expired() {
        let api = client(vec![
            token_response("t"),
            HttpResponse {
                status: 200,
                url: "https://host/login".to_string(),
                redirected: true,
                ..Default::default()
            },
        ]);
        let err = api.fetch(HttpRequest::get("/poll")).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::AuthExpired {
                location: "https://host/login".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_csrf_failures() {
        let api = client(vec![HttpResponse {
            status: 200,
            body: "<html>".to_string(),
            ..Default::default()
        }]);
        assert!(matches!(api.csrf_token().await, Err(ApiError::CsrfParse(_))));

        let api = client(vec![HttpResponse {
            status: 200,
            body: r#"{"ok":false,"error":"origin not allowed"}"#.to_string(),
            ..Default::default()
        }]);
        assert_eq!(
            api.csrf_token().await,
            Err(ApiError::CsrfRejected("origin not allowed".to_string()))
        );
        assert!(api.cached_token().is_none());
    }

    #[tokio::test]
    async fn test_reply_decoding() {
        let empty = HttpResponse {
            status: 204,
            ..Default::default()
        };
        let text = HttpResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: "done".to_string(),
            ..Default::default()
        };
        let numeric_text = HttpResponse {
            status: 200,
            body: "42".to_string(),
            ..Default::default()
        };
        let api = client(vec![token_response("t"), empty, text, numeric_text]);

        assert_eq!(api.call_json("/a", &()).await.unwrap(), None);
        assert_eq!(api.call_json("/a", &()).await.unwrap(), Some(Value::String("done".into())));
        assert_eq!(api.call_json("/a", &()).await.unwrap(), Some(serde_json::json!(42)));
    }

    #[test]
    fn test_error_message_precedence() {
        assert_eq!(error_message(r#"{"error":"e","message":"m"}"#), "e");
        assert_eq!(error_message(r#"{"message":"m"}"#), "m");
        assert_eq!(error_message("plain failure"), "plain failure");
    }
}
