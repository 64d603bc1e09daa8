use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{info, warn};

use super::session::Session;
use super::token::TokenCodec;
use crate::error::{AppError, AppResult};
use crate::security::{verify_password, User, UserDirectory};

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub user_id: i64,
    pub username: String,
}

/// Password login and session-subject resolution over a [`UserDirectory`].
#[derive(Clone)]
pub struct AuthService {
    codec: Arc<TokenCodec>,
    users: Arc<dyn UserDirectory>,
}

impl AuthService {
    pub fn new(codec: Arc<TokenCodec>, users: Arc<dyn UserDirectory>) -> Self {
        Self { codec, users }
    }

    pub async fn login(&self, username: &str, password: &str) -> AppResult<AuthResponse> {
        let user = self.users.find_by_username(username.trim()).await?;
        // Unknown user and wrong password look the same to the caller.
        let Some(user) = user.filter(|u| verify_password(&u.password_hash, password)) else {
            warn!(username, "login failed: bad credentials");
            return Err(AppError::auth("invalid_credentials", "Invalid username or password."));
        };
        if !user.is_active() {
            warn!(user_id = user.id, "login refused: user disabled");
            return Err(AppError::auth("user_disabled", "User is disabled."));
        }

        let mut extra = Map::new();
        extra.insert("username".into(), json!(user.username));
        let access_token = self
            .codec
            .issue(&user.id.to_string(), Some(extra))
            .map_err(|e| AppError::internal("token_issue_failed".to_string(), e.to_string()))?;

        info!(user_id = user.id, "user login");
        Ok(AuthResponse { access_token, token_type: "bearer".into(), user_id: user.id, username: user.username })
    }

    /// Active user behind the session's subject.
    pub async fn current_user(&self, session: &Session) -> AppResult<User> {
        let Some(user_id) = session.subject_id() else {
            return Err(AppError::auth("not_logged_in", "Invalid token or expired token."));
        };
        self.users
            .find_active_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::auth("invalid_token", "Invalid token or expired token."))
    }

    /// Ends the session for this request and returns the token's `jti`.
    /// The token is not revoked and keeps working until `exp`.
    pub fn logout(&self, session: &mut Session) -> Option<String> {
        let jti = session.clear();
        if let Some(jti) = &jti {
            info!(jti = %jti, "session logout");
        }
        jti
    }
}
