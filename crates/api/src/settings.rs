//! Runtime settings.
//!
//! Sources, lowest precedence first: built-in defaults, an optional
//! `bierp.toml` in the working directory, `BIERP__*` environment variables
//! (e.g. `BIERP__BIND_ADDR`), then the plain `JWT_SECRET` / `DATABASE_URL`
//! variables most deployments already set.

use serde::Deserialize;
use tracing::warn;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Postgres connection string; without it the in-memory store is used.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    #[serde(default = "default_approval_expiry_hours")]
    pub approval_expiry_hours: i64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_approval_expiry_hours() -> i64 {
    24
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            jwt_secret: None,
            database_url: None,
            database_max_connections: default_max_connections(),
            approval_expiry_hours: default_approval_expiry_hours(),
        }
    }
}

impl Settings {
    /// Load `.env`, then the layered sources.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut settings: Settings = ::config::Config::builder()
            .add_source(::config::File::with_name("bierp").required(false))
            .add_source(
                ::config::Environment::with_prefix("BIERP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(secret) = std::env::var("JWT_SECRET") {
            settings.jwt_secret = Some(secret);
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            settings.database_url = Some(url);
        }
        Ok(settings)
    }

    /// Configured secret, or the development fallback.
    pub fn jwt_secret(&self) -> String {
        match self.jwt_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => secret.to_string(),
            _ => {
                warn!("JWT secret not configured; using the insecure development secret");
                DEV_JWT_SECRET.to_string()
            }
        }
    }

    pub fn approval_expiry(&self) -> chrono::Duration {
        chrono::Duration::hours(self.approval_expiry_hours.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.bind_addr, "0.0.0.0:8080");
        assert_eq!(settings.database_max_connections, 5);
        assert_eq!(settings.approval_expiry(), chrono::Duration::hours(24));
        assert!(settings.database_url.is_none());
    }

    #[test]
    fn blank_secret_falls_back_to_the_dev_secret() {
        let settings = Settings {
            jwt_secret: Some("  ".into()),
            ..Settings::default()
        };
        assert_eq!(settings.jwt_secret(), DEV_JWT_SECRET);

        let settings = Settings {
            jwt_secret: Some("s3cret".into()),
            ..Settings::default()
        };
        assert_eq!(settings.jwt_secret(), "s3cret");
    }
}
