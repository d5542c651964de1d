//! JWT token issuance, validation and refresh rotation.
//!
//! Access tokens carry the role snapshot taken at issue time and are validated
//! statelessly. Refresh tokens carry only the user id and a JTI; roles are
//! re-resolved on every refresh so a revoked role takes effect on the next
//! rotation even while an older access token is still live.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::error::AuthError;
use crate::permissions::IdentitySource;

/// The only algorithm tokens are signed and accepted with.
const ALGORITHM: Algorithm = Algorithm::HS256;
const ALGORITHM_NAME: &str = "HS256";

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims for access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(rename = "userID")]
    pub user_id: i64,
    pub username: String,
    /// Role ids at issue time
    #[serde(rename = "roleList")]
    pub role_ids: Vec<i64>,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iss: String,
    pub aud: String,
    pub iat: u64,
    pub nbf: u64,
    pub exp: u64,
}

/// JWT claims for refresh tokens. No username or roles, to keep nothing stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// JWT ID, recorded in the refresh ledger
    pub jti: String,
    #[serde(rename = "userID")]
    pub user_id: i64,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iss: String,
    pub aud: String,
    pub iat: u64,
    pub nbf: u64,
    pub exp: u64,
}

/// Issuer, audience and lifetimes used for every token.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Clock-skew tolerance applied to `nbf` and `exp`
    pub leeway_secs: u64,
    /// Extra time a refresh token stays usable past its `exp`
    pub refresh_grace_secs: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            issuer: "rbac-admin".to_string(),
            audience: "rbac-client".to_string(),
            access_ttl: Duration::from_secs(2 * 60 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            leeway_secs: 0,
            refresh_grace_secs: 5 * 60,
        }
    }
}

/// Result of issuing an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenResult {
    pub token: String,
    pub claims: AccessClaims,
    /// Token duration in seconds
    pub duration: u64,
}

/// Result of issuing a refresh token.
#[derive(Debug, Clone)]
pub struct RefreshTokenResult {
    pub token: String,
    pub jti: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub duration: u64,
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: AccessTokenResult,
    pub refresh: RefreshTokenResult,
}

/// Record of outstanding refresh tokens. Each JTI can be consumed once.
#[async_trait]
pub trait RefreshLedger: Send + Sync {
    async fn record(&self, user_id: i64, token: &RefreshTokenResult) -> Result<(), sqlx::Error>;

    /// Atomically remove the JTI. Returns false if it was unknown or already used.
    async fn consume(&self, jti: &str) -> Result<bool, sqlx::Error>;
}

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("token configuration error: {0}")]
    Config(&'static str),
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("malformed token")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token is not valid yet")]
    NotYetValid,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token is not signed with HS256")]
    AlgorithmMismatch,
    #[error("token issuer does not match")]
    WrongIssuer,
    #[error("token audience does not match")]
    WrongAudience,
    #[error("wrong token type")]
    WrongTokenType,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

/// Issues, validates and rotates tokens. Validation reads only the secret,
/// the settings and the clock, so it is safe to call concurrently without locks.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    settings: TokenSettings,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// Create a token service. An empty secret, issuer or audience is rejected,
    /// as is a refresh lifetime that does not exceed the access lifetime.
    pub fn new(secret: &[u8], settings: TokenSettings) -> Result<Self, JwtError> {
        if secret.is_empty() {
            return Err(JwtError::Config("signing secret is empty"));
        }
        if settings.issuer.is_empty() {
            return Err(JwtError::Config("issuer is empty"));
        }
        if settings.audience.is_empty() {
            return Err(JwtError::Config("audience is empty"));
        }
        if settings.access_ttl.as_secs() == 0 {
            return Err(JwtError::Config("access token lifetime is zero"));
        }
        if settings.refresh_ttl <= settings.access_ttl {
            return Err(JwtError::Config(
                "refresh token lifetime must exceed access token lifetime",
            ));
        }

        // exp and nbf are checked against the injected clock instead.
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_issuer(&[settings.issuer.as_str()]);
        validation.set_audience(&[settings.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            settings,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock (tests use `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// Issue an access token embedding the given role snapshot.
    pub fn issue_access_token(
        &self,
        user_id: i64,
        username: &str,
        role_ids: &[i64],
    ) -> Result<AccessTokenResult, JwtError> {
        let now = self.clock.now();
        let duration = self.settings.access_ttl.as_secs();

        let claims = AccessClaims {
            user_id,
            username: username.to_string(),
            role_ids: role_ids.to_vec(),
            token_type: TokenType::Access,
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: now,
            nbf: now,
            exp: now + duration,
        };

        let token = self.sign(&claims)?;

        Ok(AccessTokenResult {
            token,
            claims,
            duration,
        })
    }

    /// Issue a refresh token. Only the user id and a fresh JTI are embedded.
    pub fn issue_refresh_token(&self, user_id: i64) -> Result<RefreshTokenResult, JwtError> {
        let now = self.clock.now();
        let duration = self.settings.refresh_ttl.as_secs();
        let jti = uuid::Uuid::new_v4().to_string();
        let exp = now + duration;

        let claims = RefreshClaims {
            jti: jti.clone(),
            user_id,
            token_type: TokenType::Refresh,
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: now,
            nbf: now,
            exp,
        };

        let token = self.sign(&claims)?;

        Ok(RefreshTokenResult {
            token,
            jti,
            issued_at: now,
            expires_at: exp,
            duration,
        })
    }

    /// Validate and decode an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let claims: AccessClaims = self.decode(token)?;

        if claims.token_type != TokenType::Access {
            return Err(JwtError::WrongTokenType);
        }

        self.check_window(claims.nbf, claims.exp, self.settings.leeway_secs)?;
        Ok(claims)
    }

    /// Validate and decode a refresh token, allowing the configured grace window past `exp`.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        let claims: RefreshClaims = self.decode(token)?;

        if claims.token_type != TokenType::Refresh {
            return Err(JwtError::WrongTokenType);
        }

        let tolerance = self.settings.leeway_secs + self.settings.refresh_grace_secs;
        self.check_window(claims.nbf, claims.exp, tolerance)?;
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The presented token is consumed from the ledger before anything is issued,
    /// and the role set is loaded fresh from `identities`. Any failure is terminal:
    /// the caller must log in again.
    pub async fn refresh_tokens(
        &self,
        refresh_token: &str,
        identities: &dyn IdentitySource,
        ledger: &dyn RefreshLedger,
    ) -> Result<TokenPair, AuthError> {
        let claims = self.validate_refresh_token(refresh_token)?;

        if !ledger.consume(&claims.jti).await? {
            warn!(user_id = claims.user_id, "Refresh token was revoked or already used");
            return Err(AuthError::TokenRevoked);
        }

        let identity = identities
            .identity(claims.user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !identity.active {
            return Err(AuthError::UserDisabled);
        }

        let access =
            self.issue_access_token(identity.user_id, &identity.username, &identity.role_ids)?;
        let refresh = self.issue_refresh_token(identity.user_id)?;
        ledger.record(identity.user_id, &refresh).await?;

        Ok(TokenPair { access, refresh })
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        jsonwebtoken::encode(&Header::new(ALGORITHM), claims, &self.encoding_key)
            .map_err(JwtError::Signing)
    }

    fn decode<T: DeserializeOwned + Clone>(&self, token: &str) -> Result<T, JwtError> {
        check_algorithm(token)?;

        let data = jsonwebtoken::decode::<T>(token, &self.decoding_key, &self.validation)
            .map_err(map_decode_error)?;
        Ok(data.claims)
    }

    fn check_window(&self, nbf: u64, exp: u64, tolerance: u64) -> Result<(), JwtError> {
        let now = self.clock.now();

        if now.saturating_add(self.settings.leeway_secs) < nbf {
            return Err(JwtError::NotYetValid);
        }
        if now >= exp.saturating_add(tolerance) {
            return Err(JwtError::Expired);
        }
        Ok(())
    }
}

/// Reject any header whose `alg` is not HS256 before the signature is looked at.
/// Covers `none` and asymmetric substitution.
fn check_algorithm(token: &str) -> Result<(), JwtError> {
    let mut segments = token.split('.');
    let (Some(header), Some(_), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(JwtError::Malformed);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| JwtError::Malformed)?;
    let header: RawHeader = serde_json::from_slice(&bytes).map_err(|_| JwtError::Malformed)?;

    if header.alg != ALGORITHM_NAME {
        return Err(JwtError::AlgorithmMismatch);
    }
    Ok(())
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> JwtError {
    match e.kind() {
        ErrorKind::InvalidSignature => JwtError::BadSignature,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            JwtError::AlgorithmMismatch
        }
        ErrorKind::InvalidIssuer => JwtError::WrongIssuer,
        ErrorKind::InvalidAudience => JwtError::WrongAudience,
        ErrorKind::ExpiredSignature => JwtError::Expired,
        ErrorKind::ImmatureSignature => JwtError::NotYetValid,
        _ => JwtError::Malformed,
    }
}
