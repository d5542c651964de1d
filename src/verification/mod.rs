//! Short-lived, single-use verification codes.
//!
//! Two keyspaces share one shape: captcha answers keyed by captcha id, and
//! email codes keyed by a generated session id and bound to an address. Both
//! live in process memory only, so they do not survive a restart and are not
//! shared between instances.

mod captcha;
mod email;
mod store;

use std::sync::Arc;
use std::time::Duration;

pub use captcha::{
    Captcha, CaptchaConfig, CaptchaRenderer, PngCaptchaRenderer, RenderError, answer_matches,
    generate_answer,
};
pub use email::{
    EMAIL_CODE_LENGTH, EmailCode, LogMailer, MAX_EMAIL_CODE_ATTEMPTS, MailError, Mailer,
    dispatch_email_code, generate_code,
};
pub use store::Keyspace;

use crate::clock::Clock;
use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("captcha answer does not match")]
    CaptchaMismatch,
    #[error("captcha is expired or unknown")]
    CaptchaExpiredOrUnknown,
    #[error("email code does not match")]
    EmailCodeMismatch,
    #[error("email code is expired or unknown")]
    EmailCodeExpiredOrUnknown,
}

impl CodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodeError::CaptchaMismatch => ErrorKind::CaptchaMismatch,
            CodeError::CaptchaExpiredOrUnknown => ErrorKind::CaptchaExpiredOrUnknown,
            CodeError::EmailCodeMismatch => ErrorKind::EmailCodeMismatch,
            CodeError::EmailCodeExpiredOrUnknown => ErrorKind::EmailCodeExpiredOrUnknown,
        }
    }
}

/// Entries removed by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub captchas: usize,
    pub email_codes: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.captchas + self.email_codes
    }
}

/// Captcha and email-code store.
pub struct VerificationCodes {
    captchas: Keyspace<String>,
    email_codes: Keyspace<EmailCode>,
}

impl VerificationCodes {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            captchas: Keyspace::new(clock.clone()),
            email_codes: Keyspace::new(clock),
        }
    }

    /// Generate a captcha, keep its answer for `config.ttl` and return it.
    ///
    /// Nothing is stored if rendering fails.
    pub fn generate_captcha(
        &self,
        config: &CaptchaConfig,
        renderer: &dyn CaptchaRenderer,
    ) -> Result<Captcha, RenderError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let answer = generate_answer(config);
        let image = renderer.render(&answer, config)?;

        self.captchas.insert(id.clone(), answer.clone(), config.ttl);

        Ok(Captcha { id, image, answer })
    }

    /// Check a captcha answer, case-insensitively.
    ///
    /// With `clear_on_check` the entry is deleted whatever the outcome, so an id
    /// can be tried once.
    pub fn verify_captcha(
        &self,
        id: &str,
        input: &str,
        clear_on_check: bool,
    ) -> Result<(), CodeError> {
        let matched = if clear_on_check {
            self.captchas
                .take(id)
                .map(|answer| answer_matches(&answer, input))
        } else {
            self.captchas
                .check(id, |answer| answer_matches(answer, input))
        };

        match matched {
            Some(true) => Ok(()),
            Some(false) => Err(CodeError::CaptchaMismatch),
            None => Err(CodeError::CaptchaExpiredOrUnknown),
        }
    }

    /// Store a new numeric code for `email`. Returns `(session_id, code)`.
    ///
    /// Sending the code is the caller's job and happens after this returns.
    pub fn generate_email_code(&self, email: &str, ttl: Duration) -> (String, String) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let code = generate_code();

        self.email_codes.insert(
            session_id.clone(),
            EmailCode {
                code: code.clone(),
                email: email.to_string(),
                failed_attempts: 0,
            },
            ttl,
        );

        (session_id, code)
    }

    /// Check that both the bound email and the code match, by exact comparison.
    ///
    /// The entry is kept on success; call `remove_email_code` once the dependent
    /// operation has completed. After `MAX_EMAIL_CODE_ATTEMPTS` mismatches the
    /// entry is discarded and the session reads as unknown.
    pub fn verify_email_code(
        &self,
        session_id: &str,
        email: &str,
        code: &str,
    ) -> Result<(), CodeError> {
        let matched = self
            .email_codes
            .check(session_id, |entry| entry.email == email && entry.code == code)
            .ok_or(CodeError::EmailCodeExpiredOrUnknown)?;

        if matched {
            return Ok(());
        }

        self.email_codes.update(session_id, |entry| {
            entry.failed_attempts += 1;
            ((), entry.failed_attempts < MAX_EMAIL_CODE_ATTEMPTS)
        });
        Err(CodeError::EmailCodeMismatch)
    }

    /// Idempotent delete of an email code.
    pub fn remove_email_code(&self, session_id: &str) -> bool {
        self.email_codes.remove(session_id)
    }

    /// Sweep expired entries from both keyspaces.
    pub fn clean_expired(&self) -> SweepStats {
        SweepStats {
            captchas: self.captchas.clean_expired(),
            email_codes: self.email_codes.clean_expired(),
        }
    }

    pub fn captcha_count(&self) -> usize {
        self.captchas.len()
    }

    pub fn email_code_count(&self) -> usize {
        self.email_codes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn codes() -> (Arc<ManualClock>, VerificationCodes) {
        let clock = Arc::new(ManualClock::new(10_000));
        (clock.clone(), VerificationCodes::new(clock))
    }

    struct FixedImage;

    impl CaptchaRenderer for FixedImage {
        fn render(&self, _answer: &str, _config: &CaptchaConfig) -> Result<String, RenderError> {
            Ok("data:image/png;base64,".to_string())
        }
    }

    struct Broken;

    impl CaptchaRenderer for Broken {
        fn render(&self, _answer: &str, _config: &CaptchaConfig) -> Result<String, RenderError> {
            Err(RenderError("out of ink".to_string()))
        }
    }

    #[test]
    fn test_failed_render_stores_nothing() {
        let (_clock, codes) = codes();
        assert!(
            codes
                .generate_captcha(&CaptchaConfig::default(), &Broken)
                .is_err()
        );
        assert_eq!(codes.captcha_count(), 0);
    }

    #[test]
    fn test_png_captcha_round_trip() {
        let (_clock, codes) = codes();
        let captcha = codes
            .generate_captcha(&CaptchaConfig::default(), &PngCaptchaRenderer)
            .unwrap();

        assert!(captcha.image.starts_with("data:image/png;base64,"));
        assert_eq!(codes.verify_captcha(&captcha.id, &captcha.answer, true), Ok(()));
    }

    #[test]
    fn test_captcha_single_use() {
        let (_clock, codes) = codes();
        let captcha = codes
            .generate_captcha(&CaptchaConfig::default(), &FixedImage)
            .unwrap();

        assert_eq!(codes.verify_captcha(&captcha.id, &captcha.answer, true), Ok(()));
        assert_eq!(
            codes.verify_captcha(&captcha.id, &captcha.answer, true),
            Err(CodeError::CaptchaExpiredOrUnknown)
        );
    }

    #[test]
    fn test_captcha_cleared_on_wrong_answer() {
        let (_clock, codes) = codes();
        let config = CaptchaConfig {
            charset: "a".to_string(),
            ..CaptchaConfig::default()
        };
        let captcha = codes.generate_captcha(&config, &FixedImage).unwrap();

        assert_eq!(
            codes.verify_captcha(&captcha.id, "zzzz", true),
            Err(CodeError::CaptchaMismatch)
        );
        // Removed after the failed attempt, so the right answer no longer works
        assert_eq!(
            codes.verify_captcha(&captcha.id, &captcha.answer, true),
            Err(CodeError::CaptchaExpiredOrUnknown)
        );
    }

    #[test]
    fn test_captcha_without_clear_is_reusable() {
        let (_clock, codes) = codes();
        let config = CaptchaConfig {
            charset: "abc".to_string(),
            ..CaptchaConfig::default()
        };
        let captcha = codes.generate_captcha(&config, &FixedImage).unwrap();
        let shouted = captcha.answer.to_uppercase();

        assert_eq!(codes.verify_captcha(&captcha.id, &shouted, false), Ok(()));
        assert_eq!(codes.verify_captcha(&captcha.id, &shouted, false), Ok(()));
        assert_eq!(codes.captcha_count(), 1);
    }

    #[test]
    fn test_captcha_expires() {
        let (clock, codes) = codes();
        let captcha = codes
            .generate_captcha(&CaptchaConfig::default(), &FixedImage)
            .unwrap();

        clock.advance(Duration::from_secs(5 * 60));
        assert_eq!(
            codes.verify_captcha(&captcha.id, &captcha.answer, false),
            Err(CodeError::CaptchaExpiredOrUnknown)
        );
    }

    #[test]
    fn test_unknown_captcha() {
        let (_clock, codes) = codes();
        assert_eq!(
            codes.verify_captcha("nope", "1234", true),
            Err(CodeError::CaptchaExpiredOrUnknown)
        );
    }

    #[test]
    fn test_email_code_bound_to_address() {
        let (_clock, codes) = codes();
        let (session_id, code) = codes.generate_email_code("b@y.com", Duration::from_secs(300));

        assert_eq!(
            codes.verify_email_code(&session_id, "a@x.com", &code),
            Err(CodeError::EmailCodeMismatch)
        );
        assert_eq!(codes.verify_email_code(&session_id, "b@y.com", &code), Ok(()));
    }

    #[test]
    fn test_email_code_exact_match() {
        let (_clock, codes) = codes();
        let (session_id, code) = codes.generate_email_code("a@x.com", Duration::from_secs(300));
        let wrong = if code == "000000" { "000001" } else { "000000" };

        assert_eq!(
            codes.verify_email_code(&session_id, "a@x.com", wrong),
            Err(CodeError::EmailCodeMismatch)
        );
        assert_eq!(
            codes.verify_email_code(&session_id, "A@X.COM", &code),
            Err(CodeError::EmailCodeMismatch)
        );
    }

    #[test]
    fn test_email_code_discarded_after_too_many_mismatches() {
        let (_clock, codes) = codes();
        let (session_id, code) = codes.generate_email_code("a@x.com", Duration::from_secs(300));
        let wrong = if code == "000000" { "000001" } else { "000000" };

        for _ in 0..MAX_EMAIL_CODE_ATTEMPTS {
            assert_eq!(
                codes.verify_email_code(&session_id, "a@x.com", wrong),
                Err(CodeError::EmailCodeMismatch)
            );
        }

        // The right code no longer helps
        assert_eq!(
            codes.verify_email_code(&session_id, "a@x.com", &code),
            Err(CodeError::EmailCodeExpiredOrUnknown)
        );
        assert_eq!(codes.email_code_count(), 0);
    }

    #[test]
    fn test_success_after_a_few_mismatches() {
        let (_clock, codes) = codes();
        let (session_id, code) = codes.generate_email_code("a@x.com", Duration::from_secs(300));
        let wrong = if code == "000000" { "000001" } else { "000000" };

        for _ in 1..MAX_EMAIL_CODE_ATTEMPTS {
            assert!(codes.verify_email_code(&session_id, "a@x.com", wrong).is_err());
        }
        assert_eq!(codes.verify_email_code(&session_id, "a@x.com", &code), Ok(()));
    }

    #[test]
    fn test_email_code_survives_success_until_removed() {
        let (_clock, codes) = codes();
        let (session_id, code) = codes.generate_email_code("a@x.com", Duration::from_secs(300));

        assert!(codes.verify_email_code(&session_id, "a@x.com", &code).is_ok());
        assert!(codes.verify_email_code(&session_id, "a@x.com", &code).is_ok());

        assert!(codes.remove_email_code(&session_id));
        assert!(!codes.remove_email_code(&session_id));
        assert_eq!(
            codes.verify_email_code(&session_id, "a@x.com", &code),
            Err(CodeError::EmailCodeExpiredOrUnknown)
        );
    }

    #[test]
    fn test_email_code_expires() {
        let (clock, codes) = codes();
        let (session_id, code) = codes.generate_email_code("a@x.com", Duration::from_secs(300));

        clock.advance(Duration::from_secs(301));
        assert_eq!(
            codes.verify_email_code(&session_id, "a@x.com", &code),
            Err(CodeError::EmailCodeExpiredOrUnknown)
        );
    }

    #[test]
    fn test_clean_expired_counts_both_keyspaces() {
        let (clock, codes) = codes();
        let config = CaptchaConfig {
            ttl: Duration::from_secs(60),
            ..CaptchaConfig::default()
        };
        codes.generate_captcha(&config, &FixedImage).unwrap();
        codes.generate_email_code("a@x.com", Duration::from_secs(60));
        let (live, _) = codes.generate_email_code("b@x.com", Duration::from_secs(600));

        clock.advance(Duration::from_secs(120));
        let stats = codes.clean_expired();
        assert_eq!(stats, SweepStats { captchas: 1, email_codes: 1 });
        assert_eq!(stats.total(), 2);
        assert_eq!(codes.captcha_count(), 0);
        assert_eq!(codes.email_code_count(), 1);
        assert!(codes.remove_email_code(&live));
    }

    #[test]
    fn test_concurrent_generate_verify_and_sweep() {
        use std::thread;

        let (clock, codes) = codes();
        let codes = Arc::new(codes);
        let short = Duration::from_secs(30);
        let long = Duration::from_secs(3_600);

        // Entries that will expire during the run
        for i in 0..100 {
            codes.generate_email_code(&format!("old{}@x.com", i), short);
        }
        clock.advance(Duration::from_secs(60));

        let workers: Vec<_> = (0..8)
            .map(|t| {
                let codes = codes.clone();
                thread::spawn(move || {
                    let mut kept = Vec::new();
                    for i in 0..200 {
                        let email = format!("user{}-{}@x.com", t, i);
                        let (session_id, code) = codes.generate_email_code(&email, long);
                        assert!(codes.verify_email_code(&session_id, &email, &code).is_ok());

                        let captcha = codes
                            .generate_captcha(&CaptchaConfig::default(), &FixedImage)
                            .unwrap();
                        assert_eq!(
                            codes.verify_captcha(&captcha.id, &captcha.answer, true),
                            Ok(())
                        );
                        kept.push((session_id, email, code));
                    }
                    kept
                })
            })
            .collect();

        let sweeper = {
            let codes = codes.clone();
            thread::spawn(move || (0..50).map(|_| codes.clean_expired().email_codes).sum::<usize>())
        };

        let kept: Vec<_> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        let swept = sweeper.join().unwrap() + codes.clean_expired().email_codes;

        assert_eq!(swept, 100);
        assert_eq!(codes.email_code_count(), 8 * 200);
        assert_eq!(codes.captcha_count(), 0);
        for (session_id, email, code) in kept {
            assert!(codes.verify_email_code(&session_id, &email, &code).is_ok());
        }
    }
}
