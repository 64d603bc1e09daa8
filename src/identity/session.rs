use tracing::debug;

use super::token::Claims;

/// Identity of the caller for a single request.
///
/// A fresh value is built by the authentication gate for every request and
/// travels with that request only (as a request extension), so overlapping
/// requests can never see each other's claims.
#[derive(Debug, Clone, Default)]
pub struct Session {
    token: Option<String>,
    claims: Option<Claims>,
}

impl Session {
    pub fn new() -> Self { Self::default() }

    /// Replaces whatever this session held.
    pub fn set_current(&mut self, token: impl Into<String>, claims: Claims) {
        self.token = Some(token.into());
        self.claims = Some(claims);
    }

    pub fn current_claims(&self) -> Option<&Claims> { self.claims.as_ref() }

    pub fn current_token(&self) -> Option<&str> { self.token.as_deref() }

    pub fn is_empty(&self) -> bool { self.claims.is_none() }

    pub fn subject_id(&self) -> Option<i64> {
        self.claims.as_ref().and_then(Claims::subject_id)
    }

    /// Resets to empty and returns the `jti` that was held.
    ///
    /// The token itself stays valid until it expires; nothing is recorded
    /// against the `jti`.
    pub fn clear(&mut self) -> Option<String> {
        let jti = self.claims.take().map(|c| c.jti);
        self.token = None;
        if let Some(j) = &jti { debug!(jti = %j, "session.clear"); }
        jti
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn claims(sub: &str, jti: &str) -> Claims {
        Claims {
            jti: jti.into(),
            sub: sub.into(),
            iss: "test".into(),
            aud: None,
            iat: 0,
            exp: 0,
            user_claims: Map::new(),
            key: Some("k".into()),
        }
    }

    #[test]
    fn starts_empty() {
        let s = Session::new();
        assert!(s.is_empty());
        assert!(s.current_claims().is_none());
        assert!(s.current_token().is_none());
        assert_eq!(s.subject_id(), None);
    }

    #[test]
    fn set_overwrites_previous_value() {
        let mut s = Session::new();
        s.set_current("t1", claims("1", "a"));
        s.set_current("t2", claims("2", "b"));
        assert_eq!(s.current_token(), Some("t2"));
        assert_eq!(s.subject_id(), Some(2));
    }

    #[test]
    fn clear_returns_jti_once() {
        let mut s = Session::new();
        s.set_current("t", claims("5", "jti-5"));
        assert_eq!(s.clear().as_deref(), Some("jti-5"));
        assert!(s.is_empty());
        assert_eq!(s.clear(), None);
    }

    #[test]
    fn clones_are_independent() {
        let mut a = Session::new();
        a.set_current("t", claims("1", "x"));
        let mut b = a.clone();
        b.clear();
        assert_eq!(a.subject_id(), Some(1));
        assert!(b.is_empty());
    }
}
