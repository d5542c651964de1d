//! Rate limiting for login, registration and verification-code endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down credential
//! guessing and code spamming.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::auth::{client_ip, error_response};

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Requests allowed per minute and client IP, also the burst size.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub login_per_minute: u32,
    pub captcha_per_minute: u32,
    pub email_per_minute: u32,
    pub register_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            login_per_minute: 10,
            captcha_per_minute: 30,
            email_per_minute: 3,
            register_per_minute: 5,
        }
    }
}

/// Limiters shared by the rate limiting middleware.
#[derive(Clone)]
pub struct RateLimiters {
    pub login: Arc<IpLimiter>,
    pub captcha: Arc<IpLimiter>,
    pub email: Arc<IpLimiter>,
    pub register: Arc<IpLimiter>,
    /// Key clients by `X-Forwarded-For` (requires running behind a proxy)
    pub trust_forwarded_for: bool,
}

fn per_minute(n: u32) -> Arc<IpLimiter> {
    let n = NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::keyed(Quota::per_minute(n)))
}

impl RateLimiters {
    pub fn new(settings: RateLimitSettings, trust_forwarded_for: bool) -> Self {
        Self {
            login: per_minute(settings.login_per_minute),
            captcha: per_minute(settings.captcha_per_minute),
            email: per_minute(settings.email_per_minute),
            register: per_minute(settings.register_per_minute),
            trust_forwarded_for,
        }
    }
}

async fn limit(
    limiter: &IpLimiter,
    trust_forwarded_for: bool,
    request: Request,
    next: Next,
    message: &str,
) -> Response {
    let ip = client_ip(request.headers(), request.extensions(), trust_forwarded_for);

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            error_response(StatusCode::TOO_MANY_REQUESTS, 429, message)
        }
    }
}

/// Middleware for rate limiting login attempts.
pub async fn rate_limit_login(
    State(limits): State<RateLimiters>,
    request: Request,
    next: Next,
) -> Response {
    limit(
        &limits.login,
        limits.trust_forwarded_for,
        request,
        next,
        "Too many login attempts. Please wait before trying again.",
    )
    .await
}

/// Middleware for rate limiting captcha generation.
pub async fn rate_limit_captcha(
    State(limits): State<RateLimiters>,
    request: Request,
    next: Next,
) -> Response {
    limit(
        &limits.captcha,
        limits.trust_forwarded_for,
        request,
        next,
        "Too many requests. Please try again later.",
    )
    .await
}

/// Middleware for rate limiting email code dispatch.
pub async fn rate_limit_email(
    State(limits): State<RateLimiters>,
    request: Request,
    next: Next,
) -> Response {
    limit(
        &limits.email,
        limits.trust_forwarded_for,
        request,
        next,
        "Too many email requests. Please wait before trying again.",
    )
    .await
}

/// Middleware for rate limiting account registration.
pub async fn rate_limit_register(
    State(limits): State<RateLimiters>,
    request: Request,
    next: Next,
) -> Response {
    limit(
        &limits.register,
        limits.trust_forwarded_for,
        request,
        next,
        "Too many registration attempts. Please wait before trying again.",
    )
    .await
}
