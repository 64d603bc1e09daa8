//! Request gates for protected routes.
//!
//! `authenticate` turns an `Authorization: Bearer <token>` header into a
//! per-request [`Session`]; `authorize` is the admin predicate applied on top
//! of an authenticated session. Both are wired into axum as middleware by
//! [`require_auth`] and [`require_admin`].

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use super::session::Session;
use super::token::{Claims, TokenCodec, TokenError};
use crate::error::AppError;
use crate::security::UserDirectory;
use crate::server::logging::RequestId;

/// Subject ids allowed through the admin gate.
pub const ADMIN_USER_IDS: &[i64] = &[1];

/// Why a presented token was refused. Logged, never returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTokenReason {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("subject is not a numeric user id")]
    BadSubject,
    #[error("subject is unknown or disabled")]
    UnknownSubject,
    #[error("user lookup failed: {0}")]
    LookupFailed(String),
}

impl InvalidTokenReason {
    pub fn kind(&self) -> &'static str {
        match self {
            InvalidTokenReason::Token(e) => e.kind(),
            InvalidTokenReason::BadSubject => "bad_subject",
            InvalidTokenReason::UnknownSubject => "unknown_subject",
            InvalidTokenReason::LookupFailed(_) => "lookup_failed",
        }
    }
}

/// Display strings are the client-facing messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid authorization credentials.")]
    MissingCredential,
    #[error("Invalid authentication scheme.")]
    InvalidScheme,
    #[error("Invalid token or expired token.")]
    InvalidToken(InvalidTokenReason),
    #[error("Permission denied.")]
    Forbidden,
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::InvalidScheme => "invalid_scheme",
            AuthError::InvalidToken(reason) => reason.kind(),
            AuthError::Forbidden => "forbidden",
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::Forbidden => AppError::forbidden("forbidden".to_string(), message),
            AuthError::MissingCredential => AppError::auth("missing_credential".to_string(), message),
            AuthError::InvalidScheme => AppError::auth("invalid_scheme".to_string(), message),
            AuthError::InvalidToken(_) => AppError::auth("invalid_token".to_string(), message),
        }
    }
}

/// Extracts the credential from an `Authorization` header.
/// The scheme must be `bearer` in any letter case.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::MissingCredential)?;
    let (scheme, credentials) = match raw.split_once(char::is_whitespace) {
        Some((scheme, rest)) => (scheme, rest.trim()),
        None => (raw, ""),
    };
    if credentials.is_empty() {
        return Err(AuthError::MissingCredential);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidScheme);
    }
    Ok(credentials)
}

pub fn is_admin(claims: &Claims) -> bool {
    claims.subject_id().is_some_and(|id| ADMIN_USER_IDS.contains(&id))
}

pub fn authorize(claims: &Claims) -> Result<(), AuthError> {
    if is_admin(claims) { Ok(()) } else { Err(AuthError::Forbidden) }
}

#[derive(Clone)]
pub struct AuthGate {
    codec: Arc<TokenCodec>,
    users: Arc<dyn UserDirectory>,
}

impl AuthGate {
    pub fn new(codec: Arc<TokenCodec>, users: Arc<dyn UserDirectory>) -> Self {
        Self { codec, users }
    }

    /// Runs the authentication checks in order, stopping at the first failure:
    /// credential present, bearer scheme, token decodes, key marker present,
    /// subject is an active user. Lookup errors reject the request.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Session, AuthError> {
        let token = bearer_token(headers)?;
        let claims = self
            .codec
            .decode(token)
            .map_err(|e| AuthError::InvalidToken(e.into()))?;
        if !claims.has_key_marker() {
            return Err(AuthError::InvalidToken(TokenError::MissingKey.into()));
        }

        let mut session = Session::new();
        session.set_current(token, claims);

        let Some(user_id) = session.subject_id() else {
            return Err(AuthError::InvalidToken(InvalidTokenReason::BadSubject));
        };
        match self.users.find_active_user_by_id(user_id).await {
            Ok(Some(_)) => Ok(session),
            Ok(None) => Err(AuthError::InvalidToken(InvalidTokenReason::UnknownSubject)),
            Err(e) => Err(AuthError::InvalidToken(InvalidTokenReason::LookupFailed(format!("{e:#}")))),
        }
    }

    /// Authentication followed by the admin predicate.
    pub async fn authenticate_admin(&self, headers: &HeaderMap) -> Result<Session, AuthError> {
        let session = self.authenticate(headers).await?;
        match session.current_claims() {
            Some(claims) => authorize(claims)?,
            None => return Err(AuthError::Forbidden),
        }
        Ok(session)
    }
}

fn reject(req: &Request, err: AuthError) -> Response {
    let request_id = req.extensions().get::<RequestId>().map(|r| r.0.as_str()).unwrap_or("unknown");
    warn!(
        request_id,
        path = %req.uri().path(),
        kind = err.kind(),
        "request rejected by auth gate"
    );
    if let AuthError::InvalidToken(InvalidTokenReason::LookupFailed(detail)) = &err {
        warn!(request_id, "user lookup error: {}", detail);
    }
    AppError::from(err).into_response()
}

/// Middleware for routes that need any authenticated user.
pub async fn require_auth(State(gate): State<AuthGate>, mut req: Request, next: Next) -> Response {
    let outcome = gate.authenticate(req.headers()).await;
    match outcome {
        Ok(session) => {
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        Err(err) => reject(&req, err),
    }
}

/// Middleware for routes restricted to [`ADMIN_USER_IDS`].
pub async fn require_admin(State(gate): State<AuthGate>, mut req: Request, next: Next) -> Response {
    let outcome = gate.authenticate_admin(req.headers()).await;
    match outcome {
        Ok(session) => {
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        Err(err) => reject(&req, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtSettings;
    use crate::security::{InMemoryUserDirectory, User, STATUS_DISABLED};
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    struct BrokenDirectory;

    #[async_trait]
    impl UserDirectory for BrokenDirectory {
        async fn find_active_user_by_id(&self, _id: i64) -> anyhow::Result<Option<User>> {
            anyhow::bail!("directory unreachable")
        }
        async fn find_by_username(&self, _username: &str) -> anyhow::Result<Option<User>> {
            anyhow::bail!("directory unreachable")
        }
        async fn list_users(&self) -> anyhow::Result<Vec<User>> {
            anyhow::bail!("directory unreachable")
        }
        async fn set_status(&self, _id: i64, _status: i32) -> anyhow::Result<Option<User>> {
            anyhow::bail!("directory unreachable")
        }
    }

    fn setup() -> (AuthGate, Arc<InMemoryUserDirectory>) {
        let users = Arc::new(InMemoryUserDirectory::new());
        users.ensure_default_admin("pw").unwrap();
        users.add_user("bob", "pw", None).unwrap();
        let codec = Arc::new(TokenCodec::new(JwtSettings::default()));
        (AuthGate::new(codec, users.clone()), users)
    }

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    fn bearer(gate: &AuthGate, sub: &str) -> HeaderMap {
        headers(&format!("Bearer {}", gate.codec.issue(sub, None).unwrap()))
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(&HeaderMap::new()), Err(AuthError::MissingCredential));
        assert_eq!(bearer_token(&headers("Bearer")), Err(AuthError::MissingCredential));
        assert_eq!(bearer_token(&headers("Bearer    ")), Err(AuthError::MissingCredential));
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwdw==")), Err(AuthError::InvalidScheme));
        assert_eq!(bearer_token(&headers("Bearer abc")), Ok("abc"));
        assert_eq!(bearer_token(&headers("bEaReR abc")), Ok("abc"));
    }

    #[tokio::test]
    async fn valid_token_populates_session() {
        let (gate, _) = setup();
        let session = gate.authenticate(&bearer(&gate, "2")).await.unwrap();
        assert_eq!(session.subject_id(), Some(2));
        assert!(session.current_token().is_some());
    }

    #[tokio::test]
    async fn expired_token_is_invalid() {
        let (gate, _) = setup();
        let token = gate.codec.issue_with_expiry("2", None, chrono::Duration::seconds(-1)).unwrap();
        let err = gate.authenticate(&headers(&format!("Bearer {token}"))).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidToken(InvalidTokenReason::Token(TokenError::Expired)));
        assert_eq!(AppError::from(err).http_status(), 401);
    }

    #[tokio::test]
    async fn token_without_key_marker_is_rejected() {
        let (gate, _) = setup();
        let settings = JwtSettings::default();
        let now = chrono::Utc::now().timestamp();
        let raw = json!({
            "jti": "no-key",
            "sub": "1",
            "iss": settings.issuer,
            "iat": now,
            "exp": now + 600,
            "user_claims": {}
        });
        let token = encode(&Header::default(), &raw, &EncodingKey::from_secret(settings.secret.as_bytes())).unwrap();
        let err = gate.authenticate(&headers(&format!("Bearer {token}"))).await.unwrap_err();
        assert_eq!(err.kind(), "missing_key");
        assert_eq!(err.to_string(), "Invalid token or expired token.");
    }

    #[tokio::test]
    async fn disabled_or_unknown_subject_is_rejected() {
        let (gate, users) = setup();
        users.set_status(2, STATUS_DISABLED).await.unwrap();
        let err = gate.authenticate(&bearer(&gate, "2")).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidToken(InvalidTokenReason::UnknownSubject));

        let err = gate.authenticate(&bearer(&gate, "404")).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidToken(InvalidTokenReason::UnknownSubject));

        let err = gate.authenticate(&bearer(&gate, "bob")).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidToken(InvalidTokenReason::BadSubject));
    }

    #[tokio::test]
    async fn lookup_failure_fails_closed() {
        let codec = Arc::new(TokenCodec::new(JwtSettings::default()));
        let gate = AuthGate::new(codec, Arc::new(BrokenDirectory));
        let err = gate.authenticate(&bearer(&gate, "1")).await.unwrap_err();
        assert_eq!(err.kind(), "lookup_failed");
        assert_eq!(AppError::from(err).http_status(), 401);
    }

    #[tokio::test]
    async fn admin_gate_admits_only_user_one() {
        let (gate, _) = setup();
        assert!(gate.authenticate_admin(&bearer(&gate, "1")).await.is_ok());
        let err = gate.authenticate_admin(&bearer(&gate, "2")).await.unwrap_err();
        assert_eq!(err, AuthError::Forbidden);
        assert_eq!(AppError::from(err).http_status(), 403);
        // authentication failures still surface as 401 on the admin gate
        let err = gate.authenticate_admin(&HeaderMap::new()).await.unwrap_err();
        assert_eq!(err, AuthError::MissingCredential);
    }
}
