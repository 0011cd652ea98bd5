use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::auth::{AuthClient, Token};
use crate::cache::ResponseCache;
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::{Result, ValidationError};
use crate::http::{ApiRequest, Endpoints, HttpGateway, HttpResponse, ReqwestTransport, Transport};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::store::{FileTokenStore, TokenStore};

const PRODUCTS_TTL: Duration = Duration::from_secs(60 * 60);

/// Context object owning every collaborator of one API session.
///
/// All methods take `&self`; the token, rate window and cache are guarded
/// internally. The client is meant to be driven by one caller at a time.
#[derive(Debug)]
pub struct Client {
    pub(crate) settings: Settings,
    pub(crate) gateway: HttpGateway,
    pub(crate) cache: Option<ResponseCache>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) progress: bool,
}

impl Client {
    /// Creates a client from environment variables and/or a YAML config file.
    ///
    /// See [`Settings::load`] for the lookup order.
    pub fn from_env() -> Result<Self> {
        Self::new(Settings::load(None)?)
    }

    /// Creates a client with the production transport, a file token store at
    /// `settings.token_file` and a response cache in `settings.cache_dir`.
    pub fn new(settings: Settings) -> Result<Self> {
        let cache_dir = settings.cache_dir.clone();
        Self::builder(settings).cache_dir(cache_dir).build()
    }

    pub fn builder(settings: Settings) -> ClientBuilder {
        ClientBuilder {
            settings,
            transport: None,
            token_store: None,
            clock: None,
            cache_dir: None,
            progress: true,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    /// A bearer token valid for at least five more minutes.
    pub fn access_token(&self) -> Result<Token> {
        Ok(self.gateway.auth().get_token()?)
    }

    /// Checks coordinates against the current environment.
    pub fn validate_coordinates(&self, lat: f64, lon: f64) -> Result<(), ValidationError> {
        self.settings.check_coordinates(lat, lon)
    }

    /// Issues an arbitrary API call through the rate limiter, auth and retry layers.
    pub fn execute(&self, request: &ApiRequest) -> Result<HttpResponse> {
        self.gateway.execute(request)
    }

    /// Products the account may order, cached for an hour. A non-200 answer yields
    /// an empty list.
    pub fn available_products(&self) -> Result<Vec<Value>> {
        const KEY: &str = "GET /GetAvailableProducts";

        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(KEY, PRODUCTS_TTL)) {
            return Ok(hit);
        }

        let resp = self.execute(&ApiRequest::get("/GetAvailableProducts"))?;
        if resp.status != 200 {
            tracing::warn!("products endpoint returned HTTP {}", resp.status);
            return Ok(Vec::new());
        }

        let products = match resp.json_value() {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None => Vec::new(),
        };
        if let Some(cache) = &self.cache {
            cache.put(KEY, &products);
        }
        Ok(products)
    }
}

/// Assembles a [`Client`], allowing any collaborator to be swapped out.
#[derive(Debug)]
pub struct ClientBuilder {
    settings: Settings,
    transport: Option<Arc<dyn Transport>>,
    token_store: Option<Box<dyn TokenStore>>,
    clock: Option<Arc<dyn Clock>>,
    cache_dir: Option<PathBuf>,
    progress: bool,
}

impl ClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn token_store(mut self, store: Box<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enables the response cache in `dir`. Without it nothing is cached.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn build(self) -> Result<Client> {
        let settings = self.settings;
        settings.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new(settings.timeout)?),
        };
        let store = self
            .token_store
            .unwrap_or_else(|| Box::new(FileTokenStore::new(settings.token_file.clone())));

        let auth = AuthClient::new(
            settings.token_url.clone(),
            settings.credentials.clone(),
            transport.clone(),
            store,
            clock.clone(),
        );
        let limiter = RateLimiter::new(settings.rate_limits, clock.clone())?;
        let gateway = HttpGateway::new(
            Endpoints {
                base_url: settings.base_url.clone(),
                imagery_base_url: settings.imagery_base_url.clone(),
            },
            transport,
            auth,
            limiter,
            RetryPolicy::exponential(settings.max_attempts),
            clock.clone(),
        );
        let cache = self
            .cache_dir
            .map(|dir| ResponseCache::new(dir, clock.clone()));

        tracing::debug!(
            "client ready for {} ({}, {})",
            settings.environment,
            settings.base_url,
            settings.imagery_base_url
        );

        Ok(Client {
            settings,
            gateway,
            cache,
            clock,
            progress: self.progress,
        })
    }
}
