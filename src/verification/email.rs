//! Email confirmation codes and their out-of-band delivery.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::{error, info};

use super::VerificationCodes;
use crate::error::AuthError;

/// Number of digits in an email confirmation code.
pub const EMAIL_CODE_LENGTH: usize = 6;

/// Wrong guesses allowed against one email code before it is discarded.
pub const MAX_EMAIL_CODE_ATTEMPTS: u32 = 5;

/// Stored email code, bound to the address it was sent to.
#[derive(Debug, Clone)]
pub struct EmailCode {
    pub code: String,
    pub email: String,
    pub failed_attempts: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("mail dispatch failed: {0}")]
pub struct MailError(pub String);

/// Outgoing mail collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Development mailer: writes the message to the log instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        info!(to = %to, subject = %subject, body = %body, "Email dispatched to log");
        Ok(())
    }
}

/// Fixed-length numeric code.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..EMAIL_CODE_LENGTH)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

/// Store a new code for `email`, then hand it to the mailer.
///
/// The code is stored before sending and no store lock is held while the mailer
/// runs. If dispatch fails the code is removed again. Returns the session id.
pub async fn dispatch_email_code(
    codes: &VerificationCodes,
    mailer: &dyn Mailer,
    email: &str,
    ttl: Duration,
) -> Result<String, AuthError> {
    let (session_id, code) = codes.generate_email_code(email, ttl);

    let minutes = (ttl.as_secs() / 60).max(1);
    let body = format!(
        "Your verification code is {}. It expires in {} minute(s).",
        code, minutes
    );

    if let Err(e) = mailer.send(email, "Account verification", &body).await {
        error!(error = %e, "Failed to send verification email");
        codes.remove_email_code(&session_id);
        return Err(AuthError::EmailSend(e.to_string()));
    }

    Ok(session_id)
}
