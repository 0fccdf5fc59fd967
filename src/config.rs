use {
    std::{env, time::Duration},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// How the receiving endpoint authenticates OpenPix deliveries.
#[derive(Debug, Clone)]
pub struct WebhookAuthConfig {
    /// Header carrying the shared secret configured on the provider side.
    pub header: String,
    pub secret: String,
    /// Header carrying a hex HMAC-SHA256 of the raw body.
    pub signature_header: String,
    /// When set, the body signature is required as well.
    pub hmac_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub repo_timeout: Duration,
    pub webhook: WebhookAuthConfig,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

impl Config {
    /// Reads the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let repo_timeout_ms: u64 = parsed("REPO_TIMEOUT_MS", 5_000)?;
        if repo_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "REPO_TIMEOUT_MS",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 20)?,
            repo_timeout: Duration::from_millis(repo_timeout_ms),
            webhook: WebhookAuthConfig {
                header: optional("OPENPIX_AUTH_HEADER")
                    .unwrap_or_else(|| "authorization".into())
                    .to_ascii_lowercase(),
                secret: required("OPENPIX_WEBHOOK_SECRET")?,
                signature_header: optional("OPENPIX_SIGNATURE_HEADER")
                    .unwrap_or_else(|| "x-openpix-signature".into())
                    .to_ascii_lowercase(),
                hmac_secret: optional("OPENPIX_HMAC_SECRET"),
            },
        })
    }
}
