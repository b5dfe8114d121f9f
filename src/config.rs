// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults and the typed [`AuthServerConfig`]
//! loaded from them at startup. Invalid values fail startup with a
//! [`ConfigError`] naming the offending variable.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `APP_ENV` | `development` or `production` | `development` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `DATA_DIR` | Directory holding `auth.redb` | unset (in-memory stores) |
//! | `SESSION_SECRET` | Session signing / refresh hashing key, at least 32 bytes | Required for production |
//! | `SESSION_TTL_SECS` | Session cookie lifetime | `604800` (7 days) |
//! | `REFRESH_TTL_SECS` | Refresh token lifetime | `2592000` (30 days) |
//! | `IDENTITY_PROVIDER` | `jwks` or `shared_secret` | `jwks` in production |
//! | `IDP_JWKS_URL` | HTTPS JWKS endpoint | Required for `jwks` |
//! | `IDP_ISSUER` | Expected ID token issuer | Optional |
//! | `IDP_AUDIENCE` | Expected ID token audience | Optional |
//! | `IDP_SHARED_SECRET` | HS256 key for ID tokens | Required for `shared_secret` |
//! | `PROVIDER_TIMEOUT_MS` | Identity provider / directory call bound | `5000` |
//! | `STORE_TIMEOUT_MS` | Shared store call bound | `2000` |
//! | `RATE_LIMIT_{AUTH,REFRESH,ADMIN}_MAX` | Requests per window | `10` / `30` / `60` |
//! | `RATE_LIMIT_{AUTH,REFRESH,ADMIN}_WINDOW_SECS` | Window length | `60` |
//! | `SIGN_IN_PATH` | Redirect target for unauthenticated pages | `/sign-in` |
//! | `TRUST_PROXY_HEADERS` | Take the client IP from `X-Forwarded-For` / `X-Real-IP` (only behind a proxy that sets them) | `false` |
//! | `CORS_ALLOWED_ORIGIN` | Credentialed CORS origin | unset (no CORS layer) |
//! | `USER_DIRECTORY_FILE` | JSON seed for the user directory | unset |
//! | `SWEEP_INTERVAL_SECS` | Background purge period | `300` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ring::rand::{SecureRandom, SystemRandom};
use url::Url;

use crate::auth::rate_limit::RateLimitPolicy;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const APP_ENV_ENV: &str = "APP_ENV";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Environment variable name for the data directory.
///
/// When set, refresh tokens, rate-limit windows and audit events are kept in
/// `$DATA_DIR/auth.redb` and survive restarts. When unset every store is
/// in-memory, which is only correct for a single instance.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// HMAC key for session tokens and refresh token hashing.
///
/// # Requirements
/// At least [`MIN_SECRET_LEN`] bytes. Mandatory in production; development
/// generates a random key per process, so sessions do not survive restarts.
pub const SESSION_SECRET_ENV: &str = "SESSION_SECRET";
pub const SESSION_TTL_ENV: &str = "SESSION_TTL_SECS";
pub const REFRESH_TTL_ENV: &str = "REFRESH_TTL_SECS";

pub const IDENTITY_PROVIDER_ENV: &str = "IDENTITY_PROVIDER";
pub const IDP_JWKS_URL_ENV: &str = "IDP_JWKS_URL";
pub const IDP_ISSUER_ENV: &str = "IDP_ISSUER";
pub const IDP_AUDIENCE_ENV: &str = "IDP_AUDIENCE";
pub const IDP_SHARED_SECRET_ENV: &str = "IDP_SHARED_SECRET";

pub const PROVIDER_TIMEOUT_ENV: &str = "PROVIDER_TIMEOUT_MS";
pub const STORE_TIMEOUT_ENV: &str = "STORE_TIMEOUT_MS";

pub const SIGN_IN_PATH_ENV: &str = "SIGN_IN_PATH";
pub const CORS_ALLOWED_ORIGIN_ENV: &str = "CORS_ALLOWED_ORIGIN";
pub const TRUST_PROXY_HEADERS_ENV: &str = "TRUST_PROXY_HEADERS";
pub const USER_DIRECTORY_FILE_ENV: &str = "USER_DIRECTORY_FILE";
pub const SWEEP_INTERVAL_ENV: &str = "SWEEP_INTERVAL_SECS";

/// Minimum length of any HMAC secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_REFRESH_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Configuration error, always naming the variable at fault.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn is_production(&self) -> bool {
        matches!(self, AppEnv::Production)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// The single active identity provider.
#[derive(Clone)]
pub enum IdentityProviderConfig {
    Jwks {
        url: String,
        issuer: Option<String>,
        audience: Option<String>,
    },
    SharedSecret {
        secret: Vec<u8>,
        issuer: Option<String>,
        audience: Option<String>,
    },
}

impl IdentityProviderConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            IdentityProviderConfig::Jwks { .. } => "jwks",
            IdentityProviderConfig::SharedSecret { .. } => "shared_secret",
        }
    }
}

impl std::fmt::Debug for IdentityProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityProviderConfig::Jwks { url, issuer, audience } => f
                .debug_struct("Jwks")
                .field("url", url)
                .field("issuer", issuer)
                .field("audience", audience)
                .finish(),
            IdentityProviderConfig::SharedSecret { issuer, audience, .. } => f
                .debug_struct("SharedSecret")
                .field("secret", &"<redacted>")
                .field("issuer", issuer)
                .field("audience", audience)
                .finish(),
        }
    }
}

/// Fully validated server configuration.
#[derive(Clone)]
pub struct AuthServerConfig {
    pub host: String,
    pub port: u16,
    pub app_env: AppEnv,
    pub log_format: LogFormat,
    pub data_dir: Option<PathBuf>,
    pub session_secret: Vec<u8>,
    pub session_ttl: Duration,
    pub refresh_ttl: Duration,
    pub identity_provider: IdentityProviderConfig,
    pub provider_timeout: Duration,
    pub store_timeout: Duration,
    pub auth_rate_limit: RateLimitPolicy,
    pub refresh_rate_limit: RateLimitPolicy,
    pub admin_rate_limit: RateLimitPolicy,
    /// Read the client IP from forwarded headers instead of the peer address.
    pub trust_proxy_headers: bool,
    pub sign_in_path: String,
    pub cors_allowed_origin: Option<String>,
    pub user_directory_file: Option<PathBuf>,
    pub sweep_interval: Duration,
}

impl std::fmt::Debug for AuthServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("app_env", &self.app_env)
            .field("data_dir", &self.data_dir)
            .field("session_secret", &"<redacted>")
            .field("session_ttl", &self.session_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("identity_provider", &self.identity_provider)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .field("sign_in_path", &self.sign_in_path)
            .finish_non_exhaustive()
    }
}

impl AuthServerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let app_env = match get(APP_ENV_ENV).as_deref() {
            None | Some("development") | Some("dev") => AppEnv::Development,
            Some("production") | Some("prod") => AppEnv::Production,
            Some(other) => {
                return Err(ConfigError::invalid(
                    APP_ENV_ENV,
                    format!("expected development or production, got {other}"),
                ))
            }
        };

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::invalid(
                    LOG_FORMAT_ENV,
                    format!("expected json or pretty, got {other}"),
                ))
            }
        };

        let session_secret = match get(SESSION_SECRET_ENV) {
            Some(secret) => secret_bytes(SESSION_SECRET_ENV, secret)?,
            None if app_env.is_production() => return Err(ConfigError::Missing(SESSION_SECRET_ENV)),
            None => {
                tracing::warn!(
                    "{SESSION_SECRET_ENV} not set, using a random per-process key (development only)"
                );
                random_secret()?
            }
        };

        let identity_provider = identity_provider(&get, app_env)?;

        let session_ttl = Duration::from_secs(parse_or(&get, SESSION_TTL_ENV, DEFAULT_SESSION_TTL_SECS)?);
        let refresh_ttl = Duration::from_secs(parse_or(&get, REFRESH_TTL_ENV, DEFAULT_REFRESH_TTL_SECS)?);
        if session_ttl.is_zero() {
            return Err(ConfigError::invalid(SESSION_TTL_ENV, "must be positive"));
        }
        if refresh_ttl < session_ttl {
            return Err(ConfigError::invalid(
                REFRESH_TTL_ENV,
                "must not be shorter than the session lifetime",
            ));
        }

        let sign_in_path = get(SIGN_IN_PATH_ENV).unwrap_or_else(|| "/sign-in".to_string());
        if !sign_in_path.starts_with('/') {
            return Err(ConfigError::invalid(SIGN_IN_PATH_ENV, "must be an absolute path"));
        }

        let cors_allowed_origin = get(CORS_ALLOWED_ORIGIN_ENV);
        if let Some(origin) = &cors_allowed_origin {
            Url::parse(origin).map_err(|e| ConfigError::invalid(CORS_ALLOWED_ORIGIN_ENV, e.to_string()))?;
        }

        Ok(Self {
            host: get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, PORT_ENV, 8080)?,
            app_env,
            log_format,
            data_dir: get(DATA_DIR_ENV).map(PathBuf::from),
            session_secret,
            session_ttl,
            refresh_ttl,
            identity_provider,
            provider_timeout: Duration::from_millis(positive(&get, PROVIDER_TIMEOUT_ENV, 5000)?),
            store_timeout: Duration::from_millis(positive(&get, STORE_TIMEOUT_ENV, 2000)?),
            auth_rate_limit: rate_policy(&get, "AUTH", 10)?,
            refresh_rate_limit: rate_policy(&get, "REFRESH", 30)?,
            admin_rate_limit: rate_policy(&get, "ADMIN", 60)?,
            trust_proxy_headers: parse_or(&get, TRUST_PROXY_HEADERS_ENV, false)?,
            sign_in_path,
            cors_allowed_origin,
            user_directory_file: get(USER_DIRECTORY_FILE_ENV).map(PathBuf::from),
            sweep_interval: Duration::from_secs(positive(&get, SWEEP_INTERVAL_ENV, 300)?),
        })
    }

    /// Whether cookies carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.app_env.is_production()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn identity_provider<G>(get: &G, app_env: AppEnv) -> Result<IdentityProviderConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let issuer = get(IDP_ISSUER_ENV);
    let audience = get(IDP_AUDIENCE_ENV);
    let default_kind = if app_env.is_production() { "jwks" } else { "shared_secret" };

    match get(IDENTITY_PROVIDER_ENV).as_deref().unwrap_or(default_kind) {
        "jwks" => {
            let url = get(IDP_JWKS_URL_ENV).ok_or(ConfigError::Missing(IDP_JWKS_URL_ENV))?;
            let parsed = Url::parse(&url).map_err(|e| ConfigError::invalid(IDP_JWKS_URL_ENV, e.to_string()))?;
            if parsed.scheme() != "https" {
                return Err(ConfigError::invalid(IDP_JWKS_URL_ENV, "JWKS URL must use HTTPS"));
            }
            Ok(IdentityProviderConfig::Jwks { url, issuer, audience })
        }
        "shared_secret" => {
            if app_env.is_production() && !cfg!(feature = "dev") {
                return Err(ConfigError::invalid(
                    IDENTITY_PROVIDER_ENV,
                    "shared_secret is not allowed in production",
                ));
            }
            let secret = get(IDP_SHARED_SECRET_ENV).ok_or(ConfigError::Missing(IDP_SHARED_SECRET_ENV))?;
            Ok(IdentityProviderConfig::SharedSecret {
                secret: secret_bytes(IDP_SHARED_SECRET_ENV, secret)?,
                issuer,
                audience,
            })
        }
        other => Err(ConfigError::invalid(
            IDENTITY_PROVIDER_ENV,
            format!("expected jwks or shared_secret, got {other}"),
        )),
    }
}

fn secret_bytes(var: &'static str, secret: String) -> Result<Vec<u8>, ConfigError> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(ConfigError::invalid(
            var,
            format!("must be at least {MIN_SECRET_LEN} bytes"),
        ));
    }
    Ok(secret.into_bytes())
}

fn random_secret() -> Result<Vec<u8>, ConfigError> {
    let mut secret = vec![0u8; 64];
    SystemRandom::new()
        .fill(&mut secret)
        .map_err(|_| ConfigError::invalid(SESSION_SECRET_ENV, "system RNG unavailable"))?;
    Ok(secret)
}

fn parse_or<G, T>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::invalid(var, e.to_string())),
        None => Ok(default),
    }
}

fn positive<G>(get: &G, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match parse_or(get, var, default)? {
        0 => Err(ConfigError::invalid(var, "must be positive")),
        value => Ok(value),
    }
}

fn rate_policy<G>(get: &G, class: &'static str, default_max: u32) -> Result<RateLimitPolicy, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let (max_var, window_var) = match class {
        "AUTH" => ("RATE_LIMIT_AUTH_MAX", "RATE_LIMIT_AUTH_WINDOW_SECS"),
        "REFRESH" => ("RATE_LIMIT_REFRESH_MAX", "RATE_LIMIT_REFRESH_WINDOW_SECS"),
        _ => ("RATE_LIMIT_ADMIN_MAX", "RATE_LIMIT_ADMIN_WINDOW_SECS"),
    };
    let max = parse_or(get, max_var, default_max)?;
    if max == 0 {
        return Err(ConfigError::invalid(max_var, "must be positive"));
    }
    let window = positive(get, window_var, 60)?;
    Ok(RateLimitPolicy::new(max, Duration::from_secs(window)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn load(vars: &[(&str, &str)]) -> Result<AuthServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AuthServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn development_defaults() {
        let config = load(&[(IDP_SHARED_SECRET_ENV, SECRET)]).unwrap();
        assert_eq!(config.app_env, AppEnv::Development);
        assert_eq!(config.port, 8080);
        assert_eq!(config.session_ttl, Duration::from_secs(604_800));
        assert_eq!(config.refresh_ttl, Duration::from_secs(2_592_000));
        assert_eq!(config.sign_in_path, "/sign-in");
        assert_eq!(config.auth_rate_limit, RateLimitPolicy::new(10, Duration::from_secs(60)));
        assert_eq!(config.session_secret.len(), 64);
        assert!(!config.secure_cookies());
        assert_eq!(config.identity_provider.kind(), "shared_secret");
        assert!(config.data_dir.is_none());
        assert!(!config.trust_proxy_headers);
    }

    #[test]
    fn proxy_headers_are_trusted_only_on_request() {
        let config = load(&[(IDP_SHARED_SECRET_ENV, SECRET), (TRUST_PROXY_HEADERS_ENV, "true")]).unwrap();
        assert!(config.trust_proxy_headers);

        let err = load(&[(IDP_SHARED_SECRET_ENV, SECRET), (TRUST_PROXY_HEADERS_ENV, "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: TRUST_PROXY_HEADERS_ENV, .. }));
    }

    #[test]
    fn production_requires_session_secret() {
        let err = load(&[
            (APP_ENV_ENV, "production"),
            (IDP_JWKS_URL_ENV, "https://idp.example.com/.well-known/jwks.json"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(SESSION_SECRET_ENV)));
    }

    #[test]
    fn production_uses_jwks_and_secure_cookies() {
        let config = load(&[
            (APP_ENV_ENV, "production"),
            (SESSION_SECRET_ENV, SECRET),
            (IDP_JWKS_URL_ENV, "https://idp.example.com/.well-known/jwks.json"),
            (IDP_ISSUER_ENV, "https://idp.example.com"),
        ])
        .unwrap();
        assert!(config.secure_cookies());
        assert!(matches!(
            config.identity_provider,
            IdentityProviderConfig::Jwks { ref issuer, .. } if issuer.as_deref() == Some("https://idp.example.com")
        ));
    }

    #[test]
    fn jwks_url_must_be_https() {
        let err = load(&[
            (IDENTITY_PROVIDER_ENV, "jwks"),
            (IDP_JWKS_URL_ENV, "http://idp.example.com/jwks"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains(IDP_JWKS_URL_ENV));
    }

    #[test]
    fn short_secrets_are_rejected() {
        let err = load(&[(SESSION_SECRET_ENV, "short"), (IDP_SHARED_SECRET_ENV, SECRET)]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: SESSION_SECRET_ENV, .. }));
    }

    #[cfg(not(feature = "dev"))]
    #[test]
    fn shared_secret_provider_is_refused_in_production() {
        let err = load(&[
            (APP_ENV_ENV, "production"),
            (SESSION_SECRET_ENV, SECRET),
            (IDENTITY_PROVIDER_ENV, "shared_secret"),
            (IDP_SHARED_SECRET_ENV, SECRET),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: IDENTITY_PROVIDER_ENV, .. }));
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = load(&[(IDP_SHARED_SECRET_ENV, SECRET), (PORT_ENV, "eighty")]).unwrap_err();
        assert!(err.to_string().starts_with(PORT_ENV));

        let err = load(&[(IDP_SHARED_SECRET_ENV, SECRET), ("RATE_LIMIT_REFRESH_MAX", "0")]).unwrap_err();
        assert!(err.to_string().starts_with("RATE_LIMIT_REFRESH_MAX"));
    }

    #[test]
    fn refresh_ttl_cannot_undercut_session_ttl() {
        let err = load(&[
            (IDP_SHARED_SECRET_ENV, SECRET),
            (SESSION_TTL_ENV, "3600"),
            (REFRESH_TTL_ENV, "60"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: REFRESH_TTL_ENV, .. }));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = load(&[(SESSION_SECRET_ENV, SECRET), (IDP_SHARED_SECRET_ENV, SECRET)]).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains(SECRET));
        assert!(rendered.contains("<redacted>"));
    }
}
