//! Process configuration.
//!
//! Everything is read once at start-up from CLI flags, falling back to
//! `MINCO_*` environment variables, and then handed to the server by value.
//! Nothing here is global or lazily initialised.

use std::fmt;

use clap::{Args, Parser};

/// Development signing secret. Deployments must override it with
/// `MINCO_JWT_SECRET`; start-up warns while it is in use.
pub const DEV_JWT_SECRET: &str = "ve58mpGu0IKHbTkXJ2aXfImsH2V9ATh0";
pub const DEFAULT_ISSUER: &str = "http://localhost:8000";
/// 7 days.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 604_800;
/// Upper bound accepted for the token lifetime (about ten years).
pub const MAX_TOKEN_TTL_SECS: i64 = 315_360_000;

/// Signing and validation parameters for bearer tokens. The algorithm is
/// always HMAC-SHA256.
#[derive(Clone, Args)]
pub struct JwtSettings {
    /// Symmetric signing secret
    #[arg(long = "jwt-secret", env = "MINCO_JWT_SECRET", default_value = DEV_JWT_SECRET, hide_env_values = true, hide_default_value = true)]
    pub secret: String,
    /// Value of the `iss` claim, checked on every decode
    #[arg(long = "jwt-issuer", env = "MINCO_JWT_ISSUER", default_value = DEFAULT_ISSUER)]
    pub issuer: String,
    /// Optional `aud` claim; when unset, audience is neither written nor checked
    #[arg(long = "jwt-audience", env = "MINCO_JWT_AUDIENCE")]
    pub audience: Option<String>,
    /// Token lifetime in seconds, between 1 and MAX_TOKEN_TTL_SECS
    #[arg(
        long = "jwt-expires-in",
        env = "MINCO_JWT_EXPIRES_IN",
        default_value_t = DEFAULT_TOKEN_TTL_SECS,
        value_parser = clap::value_parser!(i64).range(1..=MAX_TOKEN_TTL_SECS)
    )]
    pub expires_in_secs: i64,
}

impl JwtSettings {
    pub fn is_dev_secret(&self) -> bool {
        self.secret == DEV_JWT_SECRET
    }
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: DEV_JWT_SECRET.to_string(),
            issuer: DEFAULT_ISSUER.to_string(),
            audience: None,
            expires_in_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

// The secret never shows up in logs.
impl fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSettings")
            .field("secret", &"***")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expires_in_secs", &self.expires_in_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "minco", version, about = "minco task/focus backend")]
pub struct ServerConfig {
    /// HTTP API port
    #[arg(long, env = "MINCO_HTTP_PORT", default_value_t = 8000)]
    pub http_port: u16,

    #[command(flatten)]
    pub jwt: JwtSettings,

    /// `Domain` attribute of the `auth_token` cookie set on login
    #[arg(long, env = "MINCO_COOKIE_DOMAIN")]
    pub cookie_domain: Option<String>,

    /// Password for the built-in `admin` account (user id 1), created on first start
    #[arg(long, env = "MINCO_ADMIN_PASSWORD", default_value = "admin", hide_env_values = true)]
    pub admin_password: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8000,
            jwt: JwtSettings::default(),
            cookie_domain: None,
            admin_password: "admin".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_long_lived_tokens() {
        let cfg = ServerConfig::parse_from(["minco"]);
        assert_eq!(cfg.http_port, 8000);
        assert_eq!(cfg.jwt.expires_in_secs, 604_800);
        assert_eq!(cfg.jwt.issuer, DEFAULT_ISSUER);
        assert!(cfg.jwt.audience.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = ServerConfig::parse_from([
            "minco",
            "--http-port",
            "9100",
            "--jwt-secret",
            "s3cret",
            "--jwt-audience",
            "minco-app",
            "--jwt-expires-in",
            "60",
        ]);
        assert_eq!(cfg.http_port, 9100);
        assert_eq!(cfg.jwt.audience.as_deref(), Some("minco-app"));
        assert_eq!(cfg.jwt.expires_in_secs, 60);
        assert!(!cfg.jwt.is_dev_secret());
    }

    #[test]
    fn token_lifetime_must_be_in_range() {
        for bad in ["0", "-60", "9999999999999999"] {
            let res = ServerConfig::try_parse_from(["minco", "--jwt-expires-in", bad]);
            assert!(res.is_err(), "accepted --jwt-expires-in {bad}");
        }
        let max = MAX_TOKEN_TTL_SECS.to_string();
        let cfg = ServerConfig::try_parse_from(["minco", "--jwt-expires-in", max.as_str()]).unwrap();
        assert_eq!(cfg.jwt.expires_in_secs, MAX_TOKEN_TTL_SECS);
    }

    #[test]
    fn debug_redacts_secret() {
        let s = format!("{:?}", JwtSettings::default());
        assert!(!s.contains(DEV_JWT_SECRET));
    }
}
