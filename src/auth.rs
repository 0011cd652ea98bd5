//! OAuth2 client-credentials exchange with a cached, persisted bearer token.

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::error::{AuthError, payload_message};
use crate::http::{HttpRequest, Method, Transport};
use crate::store::TokenStore;

/// Token endpoint shared by sandbox and production.
pub const TOKEN_URL: &str = "https://apicenter.eagleview.com/oauth2/v1/token";

/// A token is refreshed once it is this close to expiry.
pub const REFRESH_MARGIN: Duration = Duration::minutes(5);

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Client id and secret. The secret never appears in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }

    /// `Basic base64(id:secret)`.
    fn basic_authorization(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub expires_at: OffsetDateTime,
    /// Client id the token was issued to; a store never hands it to another client.
    pub owner_client_id: String,
}

impl Token {
    /// Whether the token is still usable for more than [`REFRESH_MARGIN`].
    pub fn is_fresh(&self, now: OffsetDateTime) -> bool {
        self.expires_at - now > REFRESH_MARGIN
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("owner_client_id", &self.owner_client_id)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Hands out a valid bearer token, exchanging credentials only when needed.
#[derive(Debug)]
pub struct AuthClient {
    token_url: String,
    credentials: Credentials,
    transport: Arc<dyn Transport>,
    store: Box<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<Token>>,
}

impl AuthClient {
    /// Seeds the in-memory cache from `store` when it holds a token for these credentials.
    pub fn new(
        token_url: impl Into<String>,
        credentials: Credentials,
        transport: Arc<dyn Transport>,
        store: Box<dyn TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cached = store.load(credentials.client_id());
        if let Some(token) = &cached {
            tracing::info!("loaded saved access token, expires at {}", token.expires_at);
        }

        Self {
            token_url: token_url.into(),
            credentials,
            transport,
            store,
            clock,
            cached: Mutex::new(cached),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Token currently held in memory, fresh or not.
    pub fn cached(&self) -> Option<Token> {
        self.cached.lock().clone()
    }

    /// Returns the cached token when it is fresh, otherwise performs exactly one
    /// client-credentials exchange. Failures are not retried here.
    pub fn get_token(&self) -> Result<Token, AuthError> {
        let now = self.clock.now();
        let mut cached = self.cached.lock();

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.clone());
        }

        let token = self.exchange(now)?;
        tracing::info!("obtained access token, expires at {}", token.expires_at);

        if let Err(e) = self.store.save(&token) {
            tracing::warn!("could not persist access token: {e}");
        }
        *cached = Some(token.clone());

        Ok(token)
    }

    /// Forgets the in-memory token so the next [`get_token`](Self::get_token) re-authenticates.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    fn exchange(&self, now: OffsetDateTime) -> Result<Token, AuthError> {
        tracing::info!("requesting access token via client credentials");

        let request = HttpRequest::new(Method::POST, &self.token_url)
            .header("Authorization", self.credentials.basic_authorization())
            .header("Accept", "application/json")
            .form([("grant_type", "client_credentials"), ("scope", "default")]);

        let resp = self
            .transport
            .send(&request)
            .map_err(AuthError::Transport)?;

        if !resp.is_success() {
            let body = resp.text();
            let summary = payload_message(&body).unwrap_or_else(|| body.trim().to_string());
            tracing::error!("token request failed: HTTP {}", resp.status);
            return Err(AuthError::Rejected {
                status: resp.status,
                summary,
                body,
            });
        }

        let parsed: TokenResponse = resp
            .json()
            .map_err(|source| AuthError::Malformed { source })?;
        if parsed.access_token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let expires_in = parsed
            .expires_in
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_EXPIRES_IN);
        let expires_at = now + Duration::seconds(expires_in);

        Ok(Token {
            access_token: parsed.access_token,
            expires_at: expires_at.replace_nanosecond(0).unwrap_or(expires_at),
            owner_client_id: self.credentials.client_id.clone(),
        })
    }
}
