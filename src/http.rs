//! Outbound HTTP: the [`Transport`] seam, the blocking reqwest transport, and the
//! [`HttpGateway`] that wraps every API call with pacing, bearer auth, a one-shot
//! re-authentication on 401, and bounded exponential retry.

use std::fmt::{self, Debug, Display};
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error as ThisError;

pub use reqwest::Method;

use crate::auth::{AuthClient, Token};
use crate::clock::Clock;
use crate::error::{ApiError, AuthError, ConfigError, Error, Result};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::util::{retriable_status, urljoin};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    /// Sent as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
}

/// A fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.body = Some(RequestBody::Form(pairs));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response with its body fully read.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    /// JSON response with a matching content type.
    pub fn json_body(status: u16, body: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".into()),
            body: body.to_string().into_bytes(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Parsed JSON body, or `None` when the body is empty or not JSON.
    pub fn json_value(&self) -> Option<Value> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        self.json().ok()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Network-level failure: DNS, connect, TLS, timeout, or a truncated body.
#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            "request timed out".to_string()
        } else if e.is_connect() {
            "could not connect".to_string()
        } else {
            format!("network error: {e}")
        };
        Self::with_source(message, e)
    }
}

/// Sends one request and reads the whole response. Implementations do no retrying.
pub trait Transport: Debug + Send + Sync {
    fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// Production transport on top of `reqwest::blocking`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> std::result::Result<Self, ConfigError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("eagleview-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("eagleview-rs")),
        );

        let http = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self { http })
    }

    pub fn with_client(http: HttpClient) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let mut req = self.http.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req = match &request.body {
            Some(RequestBody::Json(v)) => req.json(v),
            Some(RequestBody::Form(pairs)) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs)
                    .finish();
                req.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(encoded)
            }
            None => req,
        };

        let resp = req.send()?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes()?.to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Which configured base URL a path is joined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiBase {
    /// Main API host (reports, products).
    #[default]
    Api,
    /// Imagery/property host (`/property/v2/...`, `/imagery/v3/...`).
    Imagery,
}

/// An API call as the rest of the crate describes it; the gateway resolves it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base, or an absolute `http(s)://` link.
    pub path: String,
    pub base: ApiBase,
    pub body: Option<Value>,
    pub accept: Option<String>,
    /// Overrides the gateway's attempt budget for this call.
    pub max_attempts: Option<u32>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            base: ApiBase::Api,
            body: None,
            accept: None,
            max_attempts: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn imagery(mut self) -> Self {
        self.base = ApiBase::Imagery;
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn accept(mut self, content_type: impl Into<String>) -> Self {
        self.accept = Some(content_type.into());
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub base_url: String,
    pub imagery_base_url: String,
}

/// Why a single gateway attempt did not produce a usable response.
#[derive(Debug)]
enum AttemptError {
    Status(HttpResponse),
    Transport(TransportError),
    Auth(AuthError),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Status(resp) => retriable_status(resp.status),
            AttemptError::Transport(_) => true,
            AttemptError::Auth(_) => false,
        }
    }
}

impl Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Status(resp) => write!(f, "HTTP {}", resp.status),
            AttemptError::Transport(e) => write!(f, "{e}"),
            AttemptError::Auth(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug)]
pub struct HttpGateway {
    endpoints: Endpoints,
    transport: Arc<dyn Transport>,
    auth: AuthClient,
    limiter: RateLimiter,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl HttpGateway {
    pub fn new(
        endpoints: Endpoints,
        transport: Arc<dyn Transport>,
        auth: AuthClient,
        limiter: RateLimiter,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoints,
            transport,
            auth,
            limiter,
            retry,
            clock,
        }
    }

    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn url_for(&self, request: &ApiRequest) -> String {
        let base = match request.base {
            ApiBase::Api => &self.endpoints.base_url,
            ApiBase::Imagery => &self.endpoints.imagery_base_url,
        };
        urljoin(base, &request.path)
    }

    /// Issues `request`, returning any 2xx or 404 response.
    ///
    /// The first 401 clears the cached token, re-authenticates and resends within
    /// the same attempt; any later 401 in this call fails without retry. Transport
    /// errors and 408/429/5xx are retried with `2^attempt` second sleeps; any other
    /// status fails immediately.
    pub fn execute(&self, request: &ApiRequest) -> Result<HttpResponse> {
        self.limiter.acquire();

        let url = self.url_for(request);
        let mut token = self.auth.get_token()?;
        let policy = request
            .max_attempts
            .map_or(self.retry, |n| self.retry.with_max_attempts(n));
        let mut attempts = 0;
        let mut reauthenticated = false;

        let outcome = policy.run(
            self.clock.as_ref(),
            |attempt| {
                attempts = attempt + 1;
                self.attempt(request, &url, &mut token, &mut reauthenticated)
            },
            AttemptError::is_retryable,
        );

        match outcome {
            Ok(resp) => Ok(resp),
            Err(AttemptError::Auth(e)) => Err(Error::Auth(e)),
            Err(AttemptError::Transport(e)) => {
                tracing::error!("giving up on {} {url}: {e}", request.method);
                Err(ApiError::from_transport(&url, e, attempts).into())
            }
            Err(AttemptError::Status(resp)) => {
                tracing::error!(
                    "giving up on {} {url} after {attempts} attempt(s): HTTP {}",
                    request.method,
                    resp.status
                );
                Err(ApiError::from_status(&url, resp.status, &resp.body, attempts).into())
            }
        }
    }

    fn attempt(
        &self,
        request: &ApiRequest,
        url: &str,
        token: &mut Token,
        reauthenticated: &mut bool,
    ) -> std::result::Result<HttpResponse, AttemptError> {
        let mut resp = self
            .send(request, url, token)
            .map_err(AttemptError::Transport)?;

        if resp.status == 401 && !*reauthenticated {
            tracing::info!("HTTP 401 from {url}; refreshing the access token and resending once");
            *reauthenticated = true;
            self.auth.invalidate();
            *token = self.auth.get_token().map_err(AttemptError::Auth)?;
            resp = self
                .send(request, url, token)
                .map_err(AttemptError::Transport)?;
        }

        if resp.is_success() {
            return Ok(resp);
        }
        if resp.status == 404 {
            tracing::warn!("{url} not found (404)");
            return Ok(resp);
        }
        Err(AttemptError::Status(resp))
    }

    fn send(
        &self,
        request: &ApiRequest,
        url: &str,
        token: &Token,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let mut http = HttpRequest::new(request.method.clone(), url)
            .header("Authorization", format!("Bearer {}", token.access_token))
            .header(
                "Accept",
                request.accept.as_deref().unwrap_or("application/json"),
            );
        if let Some(body) = &request.body {
            http = http.json(body.clone());
        }

        tracing::debug!("{} {url}", request.method);
        self.transport.send(&http)
    }
}
