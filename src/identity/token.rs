//! Issuing and verifying signed bearer tokens.
//!
//! Tokens are HS256 JWTs. The codec holds only the keys and the validation
//! rules built from [`JwtSettings`], so one instance is shared read-only by
//! every request.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtSettings;

pub const ALGORITHM: Algorithm = Algorithm::HS256;

/// Fixed verification marker written into every issued token. It is not tied
/// to any user record; a decoded token without it is refused by the gate.
// TODO: replace the literal with a per-user key epoch once revocation lands.
pub const KEY_MARKER: &str = "5462877478";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub jti: String,
    pub sub: String,
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub user_claims: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Claims {
    pub fn has_key_marker(&self) -> bool {
        self.key.is_some()
    }

    /// Numeric subject id, if `sub` is one.
    pub fn subject_id(&self) -> Option<i64> {
        self.sub.trim().parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token issuer is invalid")]
    InvalidIssuer,
    #[error("token audience is invalid")]
    InvalidAudience,
    #[error("token is missing the verification marker")]
    MissingKey,
    #[error("token is malformed: {0}")]
    Malformed(String),
    #[error("failed to encode token: {0}")]
    Encode(String),
}

impl TokenError {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Expired => "expired",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::InvalidIssuer => "invalid_issuer",
            TokenError::InvalidAudience => "invalid_audience",
            TokenError::MissingKey => "missing_key",
            TokenError::Malformed(_) => "malformed",
            TokenError::Encode(_) => "encode",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::InvalidSignature,
            ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
            ErrorKind::InvalidAudience => TokenError::InvalidAudience,
            ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => TokenError::InvalidAudience,
            ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => TokenError::InvalidIssuer,
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}

pub struct TokenCodec {
    settings: JwtSettings,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(settings: JwtSettings) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        // `exp` is compared against the clock exactly.
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.set_issuer(&[settings.issuer.as_str()]);
        match &settings.audience {
            Some(aud) => validation.set_audience(&[aud.as_str()]),
            None => validation.validate_aud = false,
        }
        Self {
            encoding_key: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            validation,
            settings,
        }
    }

    /// Issues a token for `identity` valid for the configured window.
    pub fn issue(&self, identity: &str, user_claims: Option<Map<String, Value>>) -> Result<String, TokenError> {
        let expires_in = Duration::try_seconds(self.settings.expires_in_secs)
            .ok_or_else(|| TokenError::Encode(format!("expiry window of {}s is out of range", self.settings.expires_in_secs)))?;
        self.issue_with_expiry(identity, user_claims, expires_in)
    }

    /// Issues a token expiring `expires_in` from now. A negative window yields
    /// a token that is already expired.
    pub fn issue_with_expiry(
        &self,
        identity: &str,
        user_claims: Option<Map<String, Value>>,
        expires_in: Duration,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let exp = now
            .checked_add_signed(expires_in)
            .ok_or_else(|| TokenError::Encode("expiry timestamp is out of range".to_string()))?;
        let claims = Claims {
            jti: Uuid::new_v4().to_string(),
            sub: identity.to_string(),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            user_claims: user_claims.unwrap_or_default(),
            key: Some(KEY_MARKER.to_string()),
        };
        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key).map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Verifies signature, issuer, audience and expiry, and returns the claims.
    /// Without a configured audience, a token that names one is refused.
    /// The key marker is not checked here; see [`Claims::has_key_marker`].
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        if self.settings.audience.is_none() && data.claims.aud.as_deref().is_some_and(|a| !a.is_empty()) {
            return Err(TokenError::InvalidAudience);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> TokenCodec {
        TokenCodec::new(JwtSettings::default())
    }

    fn extra() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("username".into(), json!("alice"));
        m.insert("tier".into(), json!(3));
        m
    }

    #[test]
    fn issue_then_decode_recovers_subject_and_claims() {
        let c = codec();
        let token = c.issue("42", Some(extra())).unwrap();
        let claims = c.decode(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.subject_id(), Some(42));
        assert_eq!(claims.user_claims, extra());
        assert_eq!(claims.iss, crate::config::DEFAULT_ISSUER);
        assert_eq!(claims.key.as_deref(), Some(KEY_MARKER));
        assert_eq!(claims.exp - claims.iat, crate::config::DEFAULT_TOKEN_TTL_SECS);
        assert!(claims.aud.is_none());
    }

    #[test]
    fn missing_user_claims_default_to_empty() {
        let c = codec();
        let claims = c.decode(&c.issue("7", None).unwrap()).unwrap();
        assert!(claims.user_claims.is_empty());
    }

    #[test]
    fn every_token_gets_a_fresh_jti() {
        let c = codec();
        let a = c.decode(&c.issue("1", None).unwrap()).unwrap();
        let b = c.decode(&c.issue("1", None).unwrap()).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn already_expired_token_fails_with_expired() {
        let c = codec();
        let token = c.issue_with_expiry("1", None, Duration::seconds(-1)).unwrap();
        assert_eq!(c.decode(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn different_key_fails_signature_check() {
        let other = TokenCodec::new(JwtSettings { secret: "another-secret-entirely".into(), ..Default::default() });
        let token = other.issue("1", Some(extra())).unwrap();
        assert_eq!(codec().decode(&token).unwrap_err(), TokenError::InvalidSignature);
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let other = TokenCodec::new(JwtSettings { issuer: "https://elsewhere.example".into(), ..Default::default() });
        let token = other.issue("1", None).unwrap();
        assert_eq!(codec().decode(&token).unwrap_err(), TokenError::InvalidIssuer);
    }

    #[test]
    fn audience_is_enforced_when_configured() {
        let with_aud = TokenCodec::new(JwtSettings { audience: Some("minco-app".into()), ..Default::default() });
        let good = with_aud.issue("1", None).unwrap();
        assert_eq!(with_aud.decode(&good).unwrap().aud.as_deref(), Some("minco-app"));

        let wrong = TokenCodec::new(JwtSettings { audience: Some("other-app".into()), ..Default::default() });
        let bad = wrong.issue("1", None).unwrap();
        assert_eq!(with_aud.decode(&bad).unwrap_err(), TokenError::InvalidAudience);

        // token without any aud
        let none = codec().issue("1", None).unwrap();
        assert_eq!(with_aud.decode(&none).unwrap_err(), TokenError::InvalidAudience);
    }

    #[test]
    fn audience_is_refused_when_none_is_configured() {
        let foreign = TokenCodec::new(JwtSettings { audience: Some("some-other-service".into()), ..Default::default() });
        let token = foreign.issue("1", None).unwrap();
        assert_eq!(codec().decode(&token).unwrap_err(), TokenError::InvalidAudience);
    }

    #[test]
    fn out_of_range_expiry_is_an_error() {
        let c = TokenCodec::new(JwtSettings { expires_in_secs: i64::MAX, ..Default::default() });
        assert_eq!(c.issue("1", None).unwrap_err().kind(), "encode");
        let err = codec().issue_with_expiry("1", None, Duration::MAX).unwrap_err();
        assert_eq!(err.kind(), "encode");
    }

    #[test]
    fn garbage_is_malformed() {
        let err = codec().decode("not.a.jwt").unwrap_err();
        assert_eq!(err.kind(), "malformed");
        let err = codec().decode("").unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn claims_without_marker_still_decode() {
        let settings = JwtSettings::default();
        let now = Utc::now().timestamp();
        let raw = json!({
            "jti": "hand-made",
            "sub": "1",
            "iss": settings.issuer,
            "iat": now,
            "exp": now + 600,
            "user_claims": {}
        });
        let token = encode(&Header::new(ALGORITHM), &raw, &EncodingKey::from_secret(settings.secret.as_bytes())).unwrap();
        let claims = codec().decode(&token).unwrap();
        assert!(!claims.has_key_marker());
    }
}
