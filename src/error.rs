use std::path::PathBuf;

use thiserror::Error as ThisError;

use crate::http::TransportError;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure surfaced by the public API.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status attached to the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => e.status,
            Self::Auth(AuthError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

/// Client-credentials exchange failures. Never retried by the auth client.
#[derive(Debug, ThisError)]
pub enum AuthError {
    #[error("token endpoint rejected the credentials (HTTP {status}): {summary}")]
    Rejected {
        status: u16,
        summary: String,
        body: String,
    },
    #[error("token endpoint returned a malformed payload")]
    Malformed {
        #[source]
        source: serde_json::Error,
    },
    #[error("token endpoint response did not include an access token")]
    MissingToken,
    #[error("network error while requesting an access token")]
    Transport(#[source] TransportError),
}

/// Non-success HTTP outcome after the gateway gave up.
#[derive(Debug, ThisError)]
#[error("{summary}")]
pub struct ApiError {
    /// Last observed status; `None` when every attempt failed at the transport level.
    pub status: Option<u16>,
    /// Last observed response body (lossy UTF-8).
    pub body: String,
    pub url: String,
    pub attempts: u32,
    summary: String,
    #[source]
    source: Option<TransportError>,
}

impl ApiError {
    pub(crate) fn from_status(url: &str, status: u16, body: &[u8], attempts: u32) -> Self {
        let body = String::from_utf8_lossy(body).into_owned();
        let summary = describe_status(url, status, &body, attempts);

        Self {
            status: Some(status),
            body,
            url: url.to_string(),
            attempts,
            summary,
            source: None,
        }
    }

    pub(crate) fn from_transport(url: &str, source: TransportError, attempts: u32) -> Self {
        Self {
            status: None,
            body: String::new(),
            url: url.to_string(),
            attempts,
            summary: format!("network error after {attempts} attempt(s) for url ({url}): {source}"),
            source: Some(source),
        }
    }

    /// Marks a response whose status is not the one an operation requires.
    pub(crate) fn unexpected(url: &str, status: u16, body: &[u8], expected: u16) -> Self {
        let mut e = Self::from_status(url, status, body, 1);
        e.summary = format!(
            "expected HTTP {expected} from ({url}) but got HTTP {status}{}",
            payload_message(&e.body)
                .map(|m| format!(": {m}"))
                .unwrap_or_default()
        );
        e
    }

    /// A successful status whose body lacks what the operation needs.
    pub(crate) fn malformed(url: &str, status: u16, body: &[u8], what: &str) -> Self {
        let mut e = Self::from_status(url, status, body, 1);
        e.summary = format!("HTTP {status} from ({url}) did not include {what}");
        e
    }

    /// Whether the failure stems from an authentication or authorization problem.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, Some(401 | 403))
    }
}

/// Caller-supplied input that the current environment does not accept.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum ValidationError {
    #[error("coordinates ({lat}, {lon}) are outside the {environment} bounds")]
    OutOfBounds {
        lat: f64,
        lon: f64,
        environment: String,
    },
    #[error("coordinates ({lat}, {lon}) are not finite")]
    NotFinite { lat: f64, lon: f64 },
    #[error("address must not be empty")]
    EmptyAddress,
}

/// Configuration problems detected before any request is issued.
#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("missing configuration: {field} (set {env_var} or add `{field}` to the config file)")]
    Missing {
        field: &'static str,
        env_var: &'static str,
    },
    #[error("invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
    #[error("unknown environment `{0}` (expected `sandbox` or `production`)")]
    UnknownEnvironment(String),
    #[error("failed to read configuration file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

/// Token-store persistence failures.
#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("token store I/O failed on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("token record could not be serialized")]
    Serialization(#[source] serde_json::Error),
}

#[derive(Debug, Default, serde::Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Best-effort one-line message from the error payload shapes the service uses.
pub(crate) fn payload_message(body: &str) -> Option<String> {
    let payload: ErrorPayload = serde_json::from_str(body).ok()?;
    let error = payload.error.as_ref().and_then(|v| match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(o) => o
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string),
        _ => None,
    });
    let head = payload
        .title
        .or(payload.message)
        .or(error)
        .filter(|s| !s.is_empty())?;
    let tail = payload
        .detail
        .or(payload.error_description)
        .filter(|s| !s.is_empty());

    Some(match tail {
        Some(tail) => format!("{head} ({tail})"),
        None => head,
    })
}

fn describe_status(url: &str, status: u16, body: &str, attempts: u32) -> String {
    let message = payload_message(body).unwrap_or_else(|| truncate(body, 200));

    match status {
        401 | 403 => format!(
            "authentication/authorization failed (HTTP {status}) for url ({url}).\n\
             - Check EAGLEVIEW_CLIENT_ID / EAGLEVIEW_CLIENT_SECRET\n\
             - Ensure the application is entitled to this API in the selected environment\n\n\
             Server message: {message}"
        ),
        _ => format!(
            "API request failed after {attempts} attempt(s): HTTP {status} for url ({url})\n{message}"
        ),
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
