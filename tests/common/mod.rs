#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use eagleview::{
    Client, Credentials, Environment, HttpRequest, HttpResponse, ManualClock, MemoryTokenStore,
    RateLimits, Settings, TokenStore, Transport, TransportError,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

pub const TOKEN_URL: &str = "https://auth.test/oauth2/v1/token";
pub const BASE_URL: &str = "https://api.test";

type Reply = Result<HttpResponse, TransportError>;

/// Transport answering token requests on its own and API requests from a script.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Option<HttpResponse>>,
    token_failure: Mutex<Option<HttpResponse>>,
    issued: Mutex<u32>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, resp: HttpResponse) -> &Self {
        self.replies.lock().push_back(Ok(resp));
        self
    }

    pub fn push_json(&self, status: u16, body: Value) -> &Self {
        self.push(HttpResponse::json_body(status, &body))
    }

    pub fn push_status(&self, status: u16) -> &Self {
        self.push(HttpResponse::new(status, ""))
    }

    pub fn push_network_error(&self) -> &Self {
        self.replies
            .lock()
            .push_back(Err(TransportError::new("connection reset")));
        self
    }

    /// Served once the script runs out.
    pub fn repeat(&self, resp: HttpResponse) -> &Self {
        *self.fallback.lock() = Some(resp);
        self
    }

    pub fn reject_tokens(&self, status: u16, body: &str) {
        *self.token_failure.lock() = Some(HttpResponse::new(status, body));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn api_requests(&self) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url != TOKEN_URL)
            .collect()
    }

    pub fn token_requests(&self) -> usize {
        self.requests().iter().filter(|r| r.url == TOKEN_URL).count()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());

        if request.url == TOKEN_URL {
            if let Some(resp) = self.token_failure.lock().clone() {
                return Ok(resp);
            }
            let n = {
                let mut issued = self.issued.lock();
                *issued += 1;
                *issued
            };
            return Ok(HttpResponse::json_body(
                200,
                &json!({"access_token": format!("token-{n}"), "expires_in": 3600}),
            ));
        }

        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        match self.fallback.lock().clone() {
            Some(resp) => Ok(resp),
            None => panic!("unscripted request: {} {}", request.method, request.url),
        }
    }
}

pub fn settings() -> Settings {
    Settings::for_environment(Environment::Sandbox, Credentials::new("test-id", "test-secret"))
        .with_base_url(BASE_URL)
        .with_token_url(TOKEN_URL)
        .with_rate_limits(RateLimits {
            requests_per_second: 1000.0,
            requests_per_minute: 10_000,
        })
}

pub fn client_with(
    settings: Settings,
    transport: &Arc<ScriptedTransport>,
    clock: &Arc<ManualClock>,
    store: Box<dyn TokenStore>,
) -> Client {
    Client::builder(settings)
        .transport(transport.clone())
        .clock(clock.clone())
        .token_store(store)
        .progress(false)
        .build()
        .expect("client should build")
}

pub fn client(transport: &Arc<ScriptedTransport>, clock: &Arc<ManualClock>) -> Client {
    client_with(
        settings(),
        transport,
        clock,
        Box::new(MemoryTokenStore::new()),
    )
}

/// Sleeps of at least one second, i.e. everything but rate-limiter pacing.
pub fn long_sleeps(clock: &ManualClock) -> Vec<Duration> {
    clock
        .sleeps()
        .into_iter()
        .filter(|d| *d >= Duration::from_secs(1))
        .collect()
}
