pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod clock;
pub mod db;
pub mod error;
pub mod jwt;
pub mod permissions;
pub mod rate_limit;
pub mod verification;

use api::{ApiContext, create_api_router};
use axum::Router;
use cleanup::{CleanupContext, CleanupScheduler};
use clock::{Clock, SystemClock};
use db::Database;
use jwt::{JwtError, TokenService, TokenSettings};
use permissions::{PermissionResolver, RolePolicy};
use rate_limit::{RateLimitSettings, RateLimiters};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use verification::{CaptchaConfig, LogMailer, Mailer, PngCaptchaRenderer, VerificationCodes};

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    /// Issuer, audience, lifetimes and tolerances of issued tokens
    pub tokens: TokenSettings,
    pub captcha: CaptchaConfig,
    /// Require a captcha on login and email code requests
    pub captcha_required: bool,
    /// Development only: return captcha answers to the client
    pub expose_captcha_answer: bool,
    pub email_code_ttl: Duration,
    pub cleanup_interval: Duration,
    /// Upper bound for each permission store query
    pub query_timeout: Duration,
    pub rate_limits: RateLimitSettings,
    /// Key rate limits by `X-Forwarded-For` (requires running behind a proxy)
    pub trust_forwarded_for: bool,
    /// Whether new user signups are disabled
    pub no_signup: bool,
    pub clock: Arc<dyn Clock>,
    pub mailer: Arc<dyn Mailer>,
}

impl ServerConfig {
    /// Configuration with default settings, the system clock and the log mailer.
    pub fn new(db: Database, jwt_secret: Vec<u8>) -> Self {
        Self {
            db,
            jwt_secret,
            tokens: TokenSettings::default(),
            captcha: CaptchaConfig::default(),
            captcha_required: false,
            expose_captcha_answer: false,
            email_code_ttl: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            query_timeout: Duration::from_secs(3),
            rate_limits: RateLimitSettings::default(),
            trust_forwarded_for: false,
            no_signup: false,
            clock: Arc::new(SystemClock),
            mailer: Arc::new(LogMailer),
        }
    }
}

/// The assembled application: HTTP router plus the services behind it.
pub struct App {
    pub router: Router,
    pub tokens: Arc<TokenService>,
    pub codes: Arc<VerificationCodes>,
    pub resolver: PermissionResolver,
    cleanup: CleanupContext,
    cleanup_interval: Duration,
}

impl App {
    /// Build every service from the configuration. Fails if the token settings
    /// are unusable (empty secret, issuer or audience, bad lifetimes).
    pub fn new(config: &ServerConfig) -> Result<Self, JwtError> {
        let tokens = Arc::new(
            TokenService::new(&config.jwt_secret, config.tokens.clone())?
                .with_clock(config.clock.clone()),
        );
        let codes = Arc::new(VerificationCodes::new(config.clock.clone()));
        let resolver = PermissionResolver::new(Arc::new(config.db.clone()), config.query_timeout);

        let router = Router::new().nest(
            "/api",
            create_api_router(ApiContext {
                db: config.db.clone(),
                tokens: tokens.clone(),
                codes: codes.clone(),
                resolver: resolver.clone(),
                enforcer: Arc::new(RolePolicy::new(resolver.clone())),
                captcha: Arc::new(config.captcha.clone()),
                renderer: Arc::new(PngCaptchaRenderer),
                mailer: config.mailer.clone(),
                limiters: RateLimiters::new(config.rate_limits, config.trust_forwarded_for),
                email_code_ttl: config.email_code_ttl,
                captcha_required: config.captcha_required,
                expose_captcha_answer: config.expose_captcha_answer,
                no_signup: config.no_signup,
            }),
        );

        let cleanup = CleanupContext {
            codes: codes.clone(),
            db: config.db.clone(),
            clock: config.clock.clone(),
            refresh_grace_secs: config.tokens.refresh_grace_secs,
        };

        Ok(Self {
            router,
            tokens,
            codes,
            resolver,
            cleanup,
            cleanup_interval: config.cleanup_interval,
        })
    }

    /// Spawn the periodic cleanup task. Call `stop` on the result at shutdown.
    pub fn start_cleanup(&self) -> CleanupScheduler {
        CleanupScheduler::start(self.cleanup.clone(), self.cleanup_interval)
    }
}

/// Run the server on the given listener until `shutdown` resolves, then stop
/// the cleanup task.
pub async fn run_server(
    app: App,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let scheduler = app.start_cleanup();
    let make_service = app
        .router
        .into_make_service_with_connect_info::<SocketAddr>();

    let result = axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown)
        .await;

    scheduler.stop().await;
    result
}

/// Start the server on the given port in a background task. Use port 0 to let
/// the OS choose a random port. Returns the actual address the server is
/// listening on.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), Box<dyn std::error::Error + Send + Sync>> {
    let app = App::new(&config)?;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        run_server(app, listener, std::future::pending()).await.ok();
    });

    Ok((handle, local_addr))
}
