//! Governor-based admission control for the processing routes.
//!
//! Each identity gets its own token bucket, created lazily on first use in a
//! concurrent map shared by every request.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

use cf_core::config::RateLimitConfig;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Identity used when a request carries neither a verified identity nor a
/// peer address.
pub const ANONYMOUS: &str = "anonymous";

/// Caller identity established by an authentication layer in front of the
/// processing routes. Only that layer inserts it into the request
/// extensions; request headers are never trusted for admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity(pub String);

/// Decides whether an identity may start another operation.
pub trait AdmissionControl: Send + Sync {
    /// Take one token from `identity`'s bucket; `false` if it is empty.
    fn try_acquire(&self, identity: &str) -> bool;

    /// Forget identities whose buckets have fully refilled.
    fn prune(&self) {}
}

/// Admits everything. Used when rate limiting is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AdmissionControl for AllowAll {
    fn try_acquire(&self, _identity: &str) -> bool {
        true
    }
}

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Per-identity token buckets backed by a keyed GCRA limiter.
pub struct KeyedAdmission {
    limiter: KeyedLimiter,
}

impl KeyedAdmission {
    /// `capacity` requests may burst; `refill_tokens` tokens are restored
    /// per `refill_interval`, spread evenly over the interval.
    pub fn new(capacity: u32, refill_tokens: u32, refill_interval: Duration) -> Self {
        let burst = NonZeroU32::new(capacity).unwrap_or(NonZeroU32::MIN);
        let per_token = refill_interval / refill_tokens.max(1);
        let quota = Quota::with_period(per_token)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Limiter for the `rate_limit` config section.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.capacity,
            config.refill_tokens,
            Duration::from_secs(config.refill_interval_secs),
        )
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }
}

impl AdmissionControl for KeyedAdmission {
    fn try_acquire(&self, identity: &str) -> bool {
        self.limiter.check_key(&identity.to_string()).is_ok()
    }

    fn prune(&self) {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        let dropped = before.saturating_sub(self.limiter.len());
        if dropped > 0 {
            tracing::debug!("Admission control forgot {dropped} idle identities");
        }
    }
}

/// Identity key for a request: the [`VerifiedIdentity`] set by an upstream
/// authentication layer, else the peer IP address, else [`ANONYMOUS`].
pub fn identity_key<B>(request: &Request<B>) -> String {
    if let Some(VerifiedIdentity(id)) = request.extensions().get::<VerifiedIdentity>() {
        return format!("user:{id}");
    }
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return format!("ip:{}", addr.ip());
    }
    ANONYMOUS.to_string()
}

/// Rejects requests whose identity has no tokens left with 429.
pub async fn admission_middleware(
    State(ctx): State<AppContext>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let identity = identity_key(&request);
    if ctx.admission.try_acquire(&identity) {
        return next.run(request).await;
    }

    tracing::warn!("Rate limit exceeded for {identity}");
    let mut err = AppError::new(cf_core::Error::RateLimited);
    if let Some(id) = request.extensions().get::<RequestId>() {
        err = err.with_request_id(id);
    }
    err.into_response()
}
