//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::auth::hash_password;
use crate::db::{Database, NewUser};
use crate::jwt::TokenSettings;
use crate::rate_limit::RateLimitSettings;
use crate::verification::CaptchaConfig;
use clap::Parser;
use std::time::Duration;
use tracing::{error, info};

const MIN_JWT_SECRET_LENGTH: usize = 32;
const MIN_ADMIN_PASSWORD_LENGTH: usize = 8;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rbac-admin",
    about = "Role-based access control backend: tokens, menus and verification codes"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "rbac-admin.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Issuer embedded in and required of every token
    #[arg(long, default_value = "rbac-admin")]
    pub jwt_issuer: String,

    /// Audience embedded in and required of every token
    #[arg(long, default_value = "rbac-client")]
    pub jwt_audience: String,

    /// Access token lifetime in hours
    #[arg(long, default_value = "2")]
    pub access_ttl_hours: u64,

    /// Refresh token lifetime in hours, must exceed the access token lifetime
    #[arg(long, default_value = "168")]
    pub refresh_ttl_hours: u64,

    /// Clock skew tolerated when checking nbf and exp, in seconds
    #[arg(long, default_value = "0")]
    pub clock_skew_secs: u64,

    /// How long a refresh token stays usable past its expiry, in seconds
    #[arg(long, default_value = "300")]
    pub refresh_grace_secs: u64,

    /// Require a captcha on login and email code requests
    #[arg(long)]
    pub captcha: bool,

    /// Return captcha answers in the captcha response. Development only
    #[arg(long)]
    pub expose_captcha_answer: bool,

    /// Email code lifetime in seconds
    #[arg(long, default_value = "300")]
    pub email_code_ttl_secs: u64,

    /// Seconds between sweeps of expired codes and refresh tokens
    #[arg(long, default_value = "300")]
    pub cleanup_interval_secs: u64,

    /// Upper bound for each permission query, in milliseconds
    #[arg(long, default_value = "3000")]
    pub query_timeout_ms: u64,

    /// Key rate limits by X-Forwarded-For (only behind a trusted proxy)
    #[arg(long)]
    pub trust_forwarded_for: bool,

    /// Disable new user signups (admin creation via --create-admin still works)
    #[arg(long)]
    pub no_signup: bool,

    /// Create an admin user with this name on startup. Password from ADMIN_PASSWORD
    #[arg(long, value_name = "USERNAME")]
    pub create_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Read a secret from an environment variable, removing it afterwards.
///
/// Only call this before the async runtime is built.
fn take_env(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    // SAFETY: callers run in `main` before the tokio runtime exists, so no
    // other thread can be reading the environment.
    unsafe { std::env::remove_var(name) };
    Some(value)
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Some(secret) = take_env("JWT_SECRET") {
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Load the password for --create-admin from ADMIN_PASSWORD.
/// Returns None and logs an error if it is missing or too short.
pub fn load_admin_password() -> Option<String> {
    check_admin_password(take_env("ADMIN_PASSWORD"))
}

fn check_admin_password(password: Option<String>) -> Option<String> {
    let Some(password) = password else {
        error!("ADMIN_PASSWORD environment variable is required with --create-admin");
        return None;
    };
    if password.len() < MIN_ADMIN_PASSWORD_LENGTH {
        error!(
            "ADMIN_PASSWORD is shorter than {} characters",
            MIN_ADMIN_PASSWORD_LENGTH
        );
        return None;
    }
    Some(password)
}

/// Handle the --create-admin flag. Exits the process on failure.
pub async fn handle_create_admin(db: &Database, username: &str, password: &str) {
    match db.users().is_username_available(username).await {
        Ok(true) => {}
        Ok(false) => {
            println!();
            println!("User already exists: {}", username);
            println!();
            return;
        }
        Err(e) => {
            error!(error = %e, "Failed to check for existing user");
            std::process::exit(1);
        }
    }

    let password_hash = match hash_password(password) {
        Ok(hash) => hash,
        Err(e) => {
            error!(error = %e, "Failed to hash admin password");
            std::process::exit(1);
        }
    };

    let created = db
        .users()
        .create(&NewUser {
            username,
            email: None,
            password_hash: &password_hash,
            is_admin: true,
        })
        .await;

    match created {
        Ok(id) => {
            info!(user_id = id, "Admin user created");
            println!();
            println!("Admin user created: {}", username);
            println!();
        }
        Err(e) => {
            error!(error = %e, "Failed to create admin user");
            std::process::exit(1);
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, jwt_secret: String) -> ServerConfig {
    let mut config = ServerConfig::new(db, jwt_secret.into_bytes());

    config.tokens = TokenSettings {
        issuer: args.jwt_issuer.clone(),
        audience: args.jwt_audience.clone(),
        access_ttl: Duration::from_secs(args.access_ttl_hours.saturating_mul(3600)),
        refresh_ttl: Duration::from_secs(args.refresh_ttl_hours.saturating_mul(3600)),
        leeway_secs: args.clock_skew_secs,
        refresh_grace_secs: args.refresh_grace_secs,
    };
    config.captcha = CaptchaConfig::default();
    config.captcha_required = args.captcha;
    config.expose_captcha_answer = args.expose_captcha_answer;
    config.email_code_ttl = Duration::from_secs(args.email_code_ttl_secs);
    config.cleanup_interval = Duration::from_secs(args.cleanup_interval_secs);
    config.query_timeout = Duration::from_millis(args.query_timeout_ms);
    config.rate_limits = RateLimitSettings::default();
    config.trust_forwarded_for = args.trust_forwarded_for;
    config.no_signup = args.no_signup;

    config
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
