mod auth;
mod error;
mod menus;
mod users;
mod verification;

use axum::Router;
use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;
use crate::jwt::TokenService;
use crate::permissions::{Enforcer, PermissionResolver};
use crate::rate_limit::RateLimiters;
use crate::verification::{CaptchaConfig, CaptchaRenderer, Mailer, VerificationCodes};

pub use error::{ApiError, ApiResponse, ok};
pub use users::UserInfo;

/// Everything the API handlers need, built once at startup.
#[derive(Clone)]
pub struct ApiContext {
    pub db: Database,
    pub tokens: Arc<TokenService>,
    pub codes: Arc<VerificationCodes>,
    pub resolver: PermissionResolver,
    pub enforcer: Arc<dyn Enforcer>,
    pub captcha: Arc<CaptchaConfig>,
    pub renderer: Arc<dyn CaptchaRenderer>,
    pub mailer: Arc<dyn Mailer>,
    pub limiters: RateLimiters,
    pub email_code_ttl: Duration,
    pub captcha_required: bool,
    pub expose_captcha_answer: bool,
    pub no_signup: bool,
}

/// Create the API router.
pub fn create_api_router(ctx: ApiContext) -> Router {
    let auth_state = auth::AuthState {
        db: ctx.db.clone(),
        tokens: ctx.tokens.clone(),
        codes: ctx.codes.clone(),
        resolver: ctx.resolver.clone(),
        captcha_required: ctx.captcha_required,
    };

    let verification_state = verification::VerificationState {
        codes: ctx.codes.clone(),
        captcha: ctx.captcha.clone(),
        renderer: ctx.renderer.clone(),
        mailer: ctx.mailer.clone(),
        email_code_ttl: ctx.email_code_ttl,
        captcha_required: ctx.captcha_required,
        expose_captcha_answer: ctx.expose_captcha_answer,
    };

    let menus_state = menus::MenusState {
        db: ctx.db.clone(),
        tokens: ctx.tokens.clone(),
        resolver: ctx.resolver.clone(),
        enforcer: ctx.enforcer.clone(),
    };

    let router = Router::new()
        .nest("/auth", auth::router(auth_state, ctx.limiters.clone()))
        .merge(verification::router(verification_state, ctx.limiters.clone()))
        .merge(menus::router(menus_state));

    if ctx.no_signup {
        router
    } else {
        let users_state = users::UsersState {
            db: ctx.db,
            codes: ctx.codes,
        };
        router.nest("/users", users::router(users_state, ctx.limiters))
    }
}
