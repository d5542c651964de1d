//! Bearer-token authentication for the HTTP layer.
//!
//! Access tokens arrive in `Authorization: Bearer <token>` and are validated
//! statelessly. `ActiveUser` additionally checks the account against the
//! database so that a disabled user is locked out before the token expires.

mod bearer;
mod errors;
mod extractors;
mod ip;
mod password;
mod state;
mod types;

pub use bearer::bearer_token;
pub use errors::{ApiAuthError, error_response, status_for};
pub use extractors::{ActiveUser, Auth};
pub use ip::client_ip;
pub use password::{check_password, hash_password, hash_password_blocking, verify_password};
pub use state::HasAuthBackend;
pub use types::{ActiveAuthenticatedUser, AuthenticatedUser};
