use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

/// Longest session a provider will seal.
pub const MAX_SESSION_TTL_DAYS: i64 = 14;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionServiceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub cookie: CookieConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
    pub accounts: AccountPolicyConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub project_id: String,
    pub api_base_url: String,
    pub service_token: String,
    pub id_token_issuer: String,
    pub id_token_jwks_url: String,
    pub session_issuer: String,
    pub session_jwks_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub name: String,
    pub domain: String,
    pub ttl_days: i64,
    /// Enables reading signed session cookies when set.
    pub signing_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window_seconds: u64,
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_origin_suffixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountPolicyConfig {
    /// Sign-in providers whose first login silently creates an account.
    pub auto_provision_providers: Vec<String>,
    /// Approval flag for accounts created after the bootstrap admin.
    pub default_approved: bool,
}

impl SessionServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let app_name = get_env("APP_NAME", Some("app"), is_prod)?;

        let config = SessionServiceConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("session-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            provider: ProviderConfig {
                project_id: get_env("IDP_PROJECT_ID", None, is_prod)?,
                api_base_url: get_env(
                    "IDP_API_BASE_URL",
                    Some("https://identitytoolkit.googleapis.com"),
                    is_prod,
                )?,
                service_token: get_env("IDP_SERVICE_TOKEN", None, is_prod)?,
                id_token_issuer: get_env("IDP_ID_TOKEN_ISSUER", None, is_prod)?,
                id_token_jwks_url: get_env("IDP_ID_TOKEN_JWKS_URL", None, is_prod)?,
                session_issuer: get_env("IDP_SESSION_ISSUER", None, is_prod)?,
                session_jwks_url: get_env("IDP_SESSION_JWKS_URL", None, is_prod)?,
                timeout_ms: parse_env("IDP_TIMEOUT_MS", "5000", is_prod)?,
            },
            cookie: CookieConfig {
                name: get_env(
                    "SESSION_COOKIE_NAME",
                    Some(default_cookie_name(&app_name).as_str()),
                    is_prod,
                )?,
                domain: get_env("SESSION_COOKIE_DOMAIN", Some("localhost"), is_prod)?,
                ttl_days: parse_env("SESSION_TTL_DAYS", "5", is_prod)?,
                signing_secret: env::var("SESSION_COOKIE_SECRET")
                    .ok()
                    .filter(|s| !s.is_empty()),
            },
            rate_limit: RateLimitConfig {
                max_attempts: parse_env("RATE_LIMIT_MAX_ATTEMPTS", "10", is_prod)?,
                window_seconds: parse_env("RATE_LIMIT_WINDOW_SECONDS", "60", is_prod)?,
                trust_forwarded_for: parse_env("TRUST_FORWARDED_FOR", "false", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?),
                allowed_origin_suffixes: split_list(
                    &env::var("ALLOWED_ORIGIN_SUFFIXES").unwrap_or_default(),
                ),
            },
            accounts: AccountPolicyConfig {
                auto_provision_providers: split_list(&get_env(
                    "AUTO_PROVISION_PROVIDERS",
                    Some("google.com"),
                    is_prod,
                )?),
                default_approved: parse_env("DEFAULT_ACCOUNT_APPROVED", "false", is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.cookie.ttl_days <= 0 || self.cookie.ttl_days > MAX_SESSION_TTL_DAYS {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_TTL_DAYS must be between 1 and {}",
                MAX_SESSION_TTL_DAYS
            )));
        }

        if self.cookie.name.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_COOKIE_NAME must not be empty"
            )));
        }

        if self.rate_limit.max_attempts == 0 || self.rate_limit.window_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RATE_LIMIT_MAX_ATTEMPTS and RATE_LIMIT_WINDOW_SECONDS must be positive"
            )));
        }

        if self.provider.timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "IDP_TIMEOUT_MS must be positive"
            )));
        }

        if let Some(secret) = &self.cookie.signing_secret {
            // axum-extra's Key derivation needs at least 32 bytes of input.
            if secret.len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SESSION_COOKIE_SECRET must be at least 32 bytes"
                )));
            }
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.cookie.domain == "localhost" {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SESSION_COOKIE_DOMAIN must be the shared parent domain in production"
                )));
            }
        }

        Ok(())
    }

    pub fn is_dev(&self) -> bool {
        self.environment == Environment::Dev
    }
}

/// `__Secure-<app>_session`
pub fn default_cookie_name(app_name: &str) -> String {
    format!("__Secure-{}_session", app_name)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionServiceConfig {
        SessionServiceConfig {
            common: core_config::Config::default(),
            environment: Environment::Prod,
            service_name: "session-service".to_string(),
            service_version: "1.0.0".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "postgres://localhost/sessions".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            provider: ProviderConfig {
                project_id: "demo".to_string(),
                api_base_url: "https://idp.example".to_string(),
                service_token: "token".to_string(),
                id_token_issuer: "https://idp.example/demo".to_string(),
                id_token_jwks_url: "https://idp.example/jwks".to_string(),
                session_issuer: "https://session.idp.example/demo".to_string(),
                session_jwks_url: "https://idp.example/session-jwks".to_string(),
                timeout_ms: 5000,
            },
            cookie: CookieConfig {
                name: default_cookie_name("acme"),
                domain: ".acme.example".to_string(),
                ttl_days: 5,
                signing_secret: None,
            },
            rate_limit: RateLimitConfig {
                max_attempts: 10,
                window_seconds: 60,
                trust_forwarded_for: true,
            },
            security: SecurityConfig {
                allowed_origins: vec!["https://app.acme.example".to_string()],
                allowed_origin_suffixes: vec![],
            },
            accounts: AccountPolicyConfig {
                auto_provision_providers: vec!["google.com".to_string()],
                default_approved: false,
            },
        }
    }

    #[test]
    fn default_cookie_name_uses_secure_prefix() {
        assert_eq!(default_cookie_name("acme"), "__Secure-acme_session");
    }

    #[test]
    fn valid_production_config_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn ttl_beyond_provider_limit_is_rejected() {
        let mut config = sample();
        config.cookie.ttl_days = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn production_rejects_wildcard_origin_and_localhost_cookie() {
        let mut config = sample();
        config.security.allowed_origins.push("*".to_string());
        assert!(config.validate().is_err());

        let mut config = sample();
        config.cookie.domain = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn short_signing_secret_is_rejected() {
        let mut config = sample();
        config.cookie.signing_secret = Some("too-short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(
            split_list(" https://a.example , ,https://b.example"),
            vec!["https://a.example", "https://b.example"]
        );
    }
}
