//! Navigation and permission endpoints. All require an active user.
//!
//! - GET `/menus` - The caller's menu forest
//! - GET `/permissions` - The caller's flat permission list
//! - GET `/permissions/check` - Ask the policy whether an action is allowed

use axum::{
    Router,
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ok};
use crate::auth::ActiveUser;
use crate::db::Database;
use crate::impl_has_auth_backend;
use crate::jwt::TokenService;
use crate::permissions::{Enforcer, PermissionResolver};

#[derive(Clone)]
pub struct MenusState {
    pub db: Database,
    pub tokens: Arc<TokenService>,
    pub resolver: PermissionResolver,
    pub enforcer: Arc<dyn Enforcer>,
}

impl_has_auth_backend!(MenusState);

pub fn router(state: MenusState) -> Router {
    Router::new()
        .route("/menus", get(menus))
        .route("/permissions", get(permissions))
        .route("/permissions/check", get(check))
        .with_state(state)
}

#[derive(Deserialize)]
struct CheckQuery {
    object: String,
    action: String,
}

#[derive(Serialize)]
struct CheckResponse {
    allowed: bool,
}

async fn menus(
    State(state): State<MenusState>,
    ActiveUser(auth): ActiveUser,
) -> Result<impl IntoResponse, ApiError> {
    let forest = state
        .resolver
        .resolve_menus(auth.user.id, auth.user.is_admin)
        .await?;
    Ok(ok(forest))
}

async fn permissions(
    State(state): State<MenusState>,
    ActiveUser(auth): ActiveUser,
) -> Result<impl IntoResponse, ApiError> {
    let nodes = state
        .resolver
        .resolve_permissions(auth.user.id, auth.user.is_admin)
        .await?;
    Ok(ok(nodes))
}

async fn check(
    State(state): State<MenusState>,
    ActiveUser(auth): ActiveUser,
    Query(query): Query<CheckQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let allowed = state
        .enforcer
        .check(auth.user.id, &query.object, &query.action)
        .await?;
    Ok(ok(CheckResponse { allowed }))
}
