mod common;

use axum::http::StatusCode;
use common::{TEST_SECRET, create_test_app};
use rbac_admin::cleanup::{CleanupContext, run_cleanup};
use rbac_admin::db::UserStatus;
use rbac_admin::jwt::{TokenService, TokenSettings};
use serde_json::json;
use std::time::Duration;

async fn refresh(app: &common::TestApp, refresh_token: &str) -> (StatusCode, serde_json::Value) {
    app.post("/api/auth/refresh", json!({"refresh_token": refresh_token}))
        .await
}

#[tokio::test]
async fn test_login_embeds_current_roles() {
    let app = create_test_app().await;
    let user_id = app.create_user("alice", false).await;
    let role_id = app.grant_role(user_id, "editor", &[]).await;

    let (access, _) = app.login("alice").await;
    let claims = app.app.tokens.validate_access_token(&access).unwrap();

    assert_eq!(claims.user_id, user_id);
    assert_eq!(claims.username, "alice");
    assert_eq!(claims.role_ids, vec![role_id]);
}

#[tokio::test]
async fn test_refresh_picks_up_role_changes() {
    let app = create_test_app().await;
    let user_id = app.create_user("alice", false).await;
    let editor = app.grant_role(user_id, "editor", &[]).await;

    let (_, refresh_token) = app.login("alice").await;

    app.db.roles().revoke(user_id, editor).await.unwrap();
    let auditor = app.grant_role(user_id, "auditor", &[]).await;

    let (status, json) = refresh(&app, &refresh_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 200);

    let access = json["data"]["token"].as_str().unwrap();
    let claims = app.app.tokens.validate_access_token(access).unwrap();
    assert_eq!(claims.role_ids, vec![auditor]);
}

#[tokio::test]
async fn test_refresh_token_is_single_use() {
    let app = create_test_app().await;
    app.create_user("alice", false).await;
    let (_, refresh_token) = app.login("alice").await;

    let (status, json) = refresh(&app, &refresh_token).await;
    assert_eq!(status, StatusCode::OK);
    let rotated = json["data"]["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(rotated, refresh_token);

    let (status, json) = refresh(&app, &refresh_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], 1004);

    // The rotated token still works
    let (status, _) = refresh(&app, &rotated).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_concurrent_refresh_exactly_one_wins() {
    let app = create_test_app().await;
    app.create_user("alice", false).await;
    let (_, refresh_token) = app.login("alice").await;

    let (first, second) = tokio::join!(
        refresh(&app, &refresh_token),
        refresh(&app, &refresh_token)
    );

    let codes = [first.1["code"].as_u64(), second.1["code"].as_u64()];
    assert_eq!(codes.iter().filter(|c| **c == Some(200)).count(), 1);
    assert_eq!(codes.iter().filter(|c| **c == Some(1004)).count(), 1);
}

#[tokio::test]
async fn test_refresh_rejected_for_disabled_user() {
    let app = create_test_app().await;
    let user_id = app.create_user("alice", false).await;
    let (_, refresh_token) = app.login("alice").await;

    app.db
        .users()
        .set_status(user_id, UserStatus::Disabled)
        .await
        .unwrap();

    let (status, json) = refresh(&app, &refresh_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], 1011);
}

#[tokio::test]
async fn test_revoking_every_session_of_a_user() {
    let app = create_test_app().await;
    let user_id = app.create_user("alice", false).await;
    let bob = app.create_user("bob", false).await;
    let (_, laptop) = app.login("alice").await;
    let (_, phone) = app.login("alice").await;
    let (_, other) = app.login("bob").await;

    let store = app.db.refresh_tokens();
    assert_eq!(store.delete_all_by_user(user_id).await.unwrap(), 2);
    assert_eq!(store.count_by_user(bob).await.unwrap(), 1);

    for token in [&laptop, &phone] {
        let (status, json) = refresh(&app, token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["code"], 1004);
    }
    let (status, _) = refresh(&app, &other).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_access_token_is_not_a_refresh_token() {
    let app = create_test_app().await;
    app.create_user("alice", false).await;
    let (access, _) = app.login("alice").await;

    let (status, json) = refresh(&app, &access).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], 1007);
}

#[tokio::test]
async fn test_refresh_within_grace_window() {
    let app = create_test_app().await;
    app.create_user("alice", false).await;
    let (_, refresh_token) = app.login("alice").await;

    let settings = TokenSettings::default();
    app.clock
        .advance(settings.refresh_ttl + Duration::from_secs(settings.refresh_grace_secs / 2));

    let (status, _) = refresh(&app, &refresh_token).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_after_grace_window_expires() {
    let app = create_test_app().await;
    app.create_user("alice", false).await;
    let (_, refresh_token) = app.login("alice").await;

    let settings = TokenSettings::default();
    app.clock
        .advance(settings.refresh_ttl + Duration::from_secs(settings.refresh_grace_secs + 1));

    let (status, json) = refresh(&app, &refresh_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], 1005);
}

#[tokio::test]
async fn test_token_from_other_audience_rejected() {
    let app = create_test_app().await;
    let user_id = app.create_user("alice", false).await;

    let foreign = TokenService::new(
        TEST_SECRET,
        TokenSettings {
            audience: "someone-else".to_string(),
            ..TokenSettings::default()
        },
    )
    .unwrap();
    let token = foreign.issue_access_token(user_id, "alice", &[]).unwrap();

    let (status, json) = app.get("/api/menus", Some(&token.token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], 1009);
}

#[tokio::test]
async fn test_logout_revokes_refresh_token() {
    let app = create_test_app().await;
    app.create_user("alice", false).await;
    let (_, refresh_token) = app.login("alice").await;

    let (status, json) = app
        .post("/api/auth/logout", json!({"refresh_token": refresh_token}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 200);

    // Logging out again is harmless
    let (status, _) = app
        .post("/api/auth/logout", json!({"refresh_token": refresh_token}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = refresh(&app, &refresh_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], 1004);
}

#[tokio::test]
async fn test_cleanup_removes_refresh_tokens_past_grace() {
    let app = create_test_app().await;
    let user_id = app.create_user("alice", false).await;
    app.login("alice").await;

    let store = app.db.refresh_tokens();
    assert_eq!(store.count_by_user(user_id).await.unwrap(), 1);

    let settings = TokenSettings::default();
    let ctx = CleanupContext {
        codes: app.app.codes.clone(),
        db: app.db.clone(),
        clock: app.clock.clone(),
        refresh_grace_secs: settings.refresh_grace_secs,
    };

    // Expired but still inside the grace window
    app.clock.advance(settings.refresh_ttl + Duration::from_secs(1));
    run_cleanup(&ctx).await;
    assert_eq!(store.count_by_user(user_id).await.unwrap(), 1);

    app.clock
        .advance(Duration::from_secs(settings.refresh_grace_secs + 1));
    run_cleanup(&ctx).await;
    assert_eq!(store.count_by_user(user_id).await.unwrap(), 0);
}
