//! User accounts and password verification.
//!
//! The authentication gate only needs `find_active_user_by_id`; login
//! additionally looks users up by name. The in-memory directory stands in for
//! the relational `users` table and keeps the same shape (numeric ids from 1,
//! integer `status` with 1 meaning enabled).

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use serde::Serialize;
use tracing::info;

pub const STATUS_DISABLED: i32 = 0;
pub const STATUS_ACTIVE: i32 = 1;

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: i32,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// Lookup capability consumed by the authentication gate and the login path.
///
/// Implementations report backend failures as `Err`; callers on the auth path
/// treat any error as a rejection.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns the user only if it exists and is enabled.
    async fn find_active_user_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Returns the user regardless of status.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn list_users(&self) -> Result<Vec<User>>;

    /// Updates the status flag, returning the updated user or `None` if unknown.
    async fn set_status(&self, id: i64, status: i32) -> Result<Option<User>>;
}

#[derive(Debug, Default)]
struct Users {
    by_id: BTreeMap<i64, User>,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    inner: RwLock<Users>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self { Self::default() }

    /// Adds an enabled user with a freshly hashed password.
    pub fn add_user(&self, username: &str, password: &str, email: Option<&str>) -> Result<User> {
        let username = username.trim();
        if username.is_empty() { bail!("username must not be empty"); }
        let password_hash = hash_password(password)?;
        let mut g = self.inner.write();
        if g.by_id.values().any(|u| u.username == username) {
            bail!("user '{}' already exists", username);
        }
        g.next_id += 1;
        let user = User {
            id: g.next_id,
            username: username.to_string(),
            email: email.map(|s| s.to_string()),
            full_name: None,
            password_hash,
            status: STATUS_ACTIVE,
            created_at: Utc::now(),
        };
        g.by_id.insert(user.id, user.clone());
        Ok(user)
    }

    /// Creates the `admin` account (id 1) when the directory is empty.
    pub fn ensure_default_admin(&self, password: &str) -> Result<()> {
        if !self.inner.read().by_id.is_empty() { return Ok(()); }
        let admin = self.add_user(DEFAULT_ADMIN_USERNAME, password, None)?;
        info!(target: "startup", user_id = admin.id, "created default admin account '{}'", admin.username);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_active_user_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self.inner.read().by_id.get(&id).filter(|u| u.is_active()).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.inner.read().by_id.values().find(|u| u.username == username).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.inner.read().by_id.values().cloned().collect())
    }

    async fn set_status(&self, id: i64, status: i32) -> Result<Option<User>> {
        let mut g = self.inner.write();
        Ok(g.by_id.get_mut(&id).map(|u| {
            u.status = status;
            u.clone()
        }))
    }
}
