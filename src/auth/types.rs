//! Authentication user types.

use crate::db::User;
use crate::jwt::AccessClaims;

/// Caller identity taken from a valid access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// JWT claims from the access token
    pub claims: AccessClaims,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> i64 {
        self.claims.user_id
    }
}

/// Caller identity confirmed against the user store.
#[derive(Debug, Clone)]
pub struct ActiveAuthenticatedUser {
    /// JWT claims from the access token
    pub claims: AccessClaims,
    /// Current database record, known to be active
    pub user: User,
}
