//! A blocking Rust client for the EagleView property-imagery APIs.
//!
//! The client authenticates with OAuth2 client credentials, paces every call to
//! the publisher's rate limits, retries transient failures, and drives the
//! asynchronous submit/poll flow used for property data:
//! submit a request, poll its result until it completes, then download images
//! and reports.
//!
//! ## Quick start
//! - Configure credentials via environment variables (`EAGLEVIEW_CLIENT_ID`,
//!   `EAGLEVIEW_CLIENT_SECRET`, optionally `EAGLEVIEW_ENVIRONMENT`) or an
//!   `eagleview.yaml` file with an `eagleview:` section.
//! - Call [`Client::submit`] and then [`Client::poll`].
//!
//! ```no_run
//! use eagleview::{Client, PropertyTarget, RequestStatus};
//!
//! fn main() -> eagleview::Result<()> {
//!     let client = Client::from_env()?;
//!     let mut request = client.submit(&PropertyTarget::coordinates(41.25, -95.99))?;
//!
//!     if client.poll(&mut request)? == RequestStatus::Complete {
//!         let dir = std::path::Path::new("data/imagery");
//!         if let Some(payload) = request.payload() {
//!             client.download_property_images(payload, dir)?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The sandbox environment only serves a small area of Omaha, NE
//! ([`SANDBOX_BOUNDS`]); coordinates outside it are rejected before any request
//! is made.

#![forbid(unsafe_code)]

mod auth;
mod cache;
mod client;
mod clock;
mod config;
mod error;
mod http;
mod imagery;
pub mod logging;
pub mod output;
mod property;
mod rate_limit;
mod reports;
mod retry;
mod store;
mod util;

pub use auth::{AuthClient, Credentials, REFRESH_MARGIN, TOKEN_URL, Token};
pub use cache::ResponseCache;
pub use client::{Client, ClientBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BoundingBox, Environment, SANDBOX_BOUNDS, Settings};
pub use error::{ApiError, AuthError, ConfigError, Error, Result, StoreError, ValidationError};
pub use http::{
    ApiBase, ApiRequest, Endpoints, HttpGateway, HttpRequest, HttpResponse, Method,
    ReqwestTransport, RequestBody, Transport, TransportError,
};
pub use imagery::{Image, ImageDownloadSummary, ImageryResult, Location};
pub use property::{BatchItem, PropertyRequest, PropertyTarget, RequestStatus};
pub use rate_limit::{RateLimiter, RateLimits};
pub use reports::{DownloadedFile, FileLink, report_id};
pub use retry::{Backoff, RetryPolicy};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
