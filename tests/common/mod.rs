#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use rbac_admin::auth::hash_password;
use rbac_admin::clock::ManualClock;
use rbac_admin::db::{Database, NewPermission, NewUser};
use rbac_admin::permissions::PermissionKind;
use rbac_admin::rate_limit::RateLimitSettings;
use rbac_admin::verification::{MailError, Mailer};
use rbac_admin::{App, ServerConfig};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const TEST_SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough";
pub const PASSWORD: &str = "correct horse";

/// Mailer that keeps every message for inspection.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    /// The code in the most recent message sent to `email`.
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        sent.iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, body)| body.chars().filter(|c| c.is_ascii_digit()).take(6).collect())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, _subject: &str, body: &str) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub mailer: Arc<RecordingMailer>,
    pub app: App,
}

pub struct TestOptions {
    pub captcha_required: bool,
    pub no_signup: bool,
    pub rate_limits: RateLimitSettings,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            captcha_required: false,
            no_signup: false,
            rate_limits: RateLimitSettings {
                login_per_minute: 1000,
                captcha_per_minute: 1000,
                email_per_minute: 1000,
                register_per_minute: 1000,
            },
        }
    }
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(TestOptions::default()).await
}

pub async fn create_test_app_with(options: TestOptions) -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let clock = Arc::new(ManualClock::starting_now());
    let mailer = Arc::new(RecordingMailer::default());

    let mut config = ServerConfig::new(db.clone(), TEST_SECRET.to_vec());
    config.clock = clock.clone();
    config.mailer = mailer.clone();
    config.captcha_required = options.captcha_required;
    config.expose_captcha_answer = true;
    config.no_signup = options.no_signup;
    config.rate_limits = options.rate_limits;

    let app = App::new(&config).expect("Failed to build app");
    TestApp {
        router: app.router.clone(),
        db,
        clock,
        mailer,
        app,
    }
}

impl TestApp {
    /// Send a request and return the status plus the parsed JSON body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Create an active user with the shared test password.
    pub async fn create_user(&self, username: &str, is_admin: bool) -> i64 {
        let hash = hash_password(PASSWORD).unwrap();
        self.db
            .users()
            .create(&NewUser {
                username,
                email: None,
                password_hash: &hash,
                is_admin,
            })
            .await
            .unwrap()
    }

    /// Log in and return `(access_token, refresh_token)`.
    pub async fn login(&self, username: &str) -> (String, String) {
        let (status, json) = self
            .post(
                "/api/auth/login",
                serde_json::json!({"username": username, "password": PASSWORD}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", json);
        (
            json["data"]["token"].as_str().unwrap().to_string(),
            json["data"]["refresh_token"].as_str().unwrap().to_string(),
        )
    }

    /// Create a role granting the given permission ids and assign it to `user_id`.
    pub async fn grant_role(&self, user_id: i64, name: &str, permission_ids: &[i64]) -> i64 {
        let roles = self.db.roles();
        let role_id = roles.create(name).await.unwrap();
        for &permission_id in permission_ids {
            roles.grant(role_id, permission_id).await.unwrap();
        }
        roles.assign(user_id, role_id).await.unwrap();
        role_id
    }

    pub async fn permission(
        &self,
        parent_id: i64,
        name: &str,
        kind: PermissionKind,
        path: &str,
        sort: i64,
    ) -> i64 {
        self.db
            .permissions()
            .create(&NewPermission::new(parent_id, name, kind, path, sort))
            .await
            .unwrap()
    }
}
