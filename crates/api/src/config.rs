//! Service configuration from environment variables.
//!
//! | Variable                 | Default                           |
//! |--------------------------|-----------------------------------|
//! | `APP_ENV`                | `development`                     |
//! | `JWT_SECRET`             | dev secret (refused in production)|
//! | `ACCESS_TOKEN_TTL_SECS`  | `900`                             |
//! | `REFRESH_TOKEN_TTL_SECS` | `604800`                          |
//! | `BCRYPT_COST`            | `10`                              |
//! | `GATEWAY_BIND`           | `0.0.0.0:8080`                    |
//! | `PORTAL_BIND`            | `0.0.0.0:8081`                    |
//! | `UPSTREAM_URL`           | `http://127.0.0.1:8081`           |
//! | `UPSTREAM_TIMEOUT_MS`    | `5000`                            |
//! | `OBJECT_BASE_URL`        | `memory://objects`                |
//! | `ADMIN_EMAIL` / `ADMIN_PASSWORD` | unset (no bootstrap admin)|
//! | `USE_REDIS_BROKER` / `REDIS_URL` | `false` / `redis://127.0.0.1/` |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use clubhub_auth::TokenConfig;
use clubhub_events::{BrokerError, Consumer, InMemoryBroker, Publisher};

const DEV_JWT_SECRET: &str = "RAW:clubhub-insecure-development-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is not valid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Where facts travel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerSettings {
    /// In-process only; facts do not leave the process.
    InMemory,
    Redis { url: String },
}

impl BrokerSettings {
    /// Open the broker. `group` names the consuming service (a Redis
    /// consumer group); the consumer name adds the process id.
    pub fn connect(&self, group: &str) -> Result<(Arc<dyn Publisher>, Arc<dyn Consumer>), BrokerError> {
        match self {
            BrokerSettings::InMemory => {
                warn!(group, "using the in-process broker; facts stay inside this process");
                let broker = Arc::new(InMemoryBroker::default());
                Ok((broker.clone(), broker))
            }
            #[cfg(feature = "redis")]
            BrokerSettings::Redis { url } => {
                let broker = Arc::new(clubhub_infra::event_bus::RedisStreamsBroker::new(
                    url,
                    clubhub_events::Topology::standard(),
                    group,
                    format!("{group}-{}", std::process::id()),
                )?);
                Ok((broker.clone(), broker))
            }
            #[cfg(not(feature = "redis"))]
            BrokerSettings::Redis { .. } => Err(BrokerError::Connection(
                "USE_REDIS_BROKER is set but this build lacks the `redis` feature".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub tokens: TokenConfig,
    pub bcrypt_cost: u32,
    pub upstream_url: String,
    pub upstream_timeout: Duration,
    pub broker: BrokerSettings,
    pub admin: Option<BootstrapAdmin>,
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub bind_addr: String,
    pub object_base_url: String,
    pub broker: BrokerSettings,
}

/// Variable source; the process environment in production, a map in tests.
pub trait Env {
    fn var(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

impl<F> Env for F
where
    F: Fn(&str) -> Option<String>,
{
    fn var(&self, name: &str) -> Option<String> {
        self(name)
    }
}

fn parsed<T>(env: &impl Env, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env.var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

fn is_production(env: &impl Env) -> bool {
    env.var("APP_ENV")
        .is_some_and(|v| v.eq_ignore_ascii_case("production") || v.eq_ignore_ascii_case("prod"))
}

fn broker_settings(env: &impl Env) -> Result<BrokerSettings, ConfigError> {
    if parsed(env, "USE_REDIS_BROKER", false)? {
        let url = env.var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1/".into());
        Ok(BrokerSettings::Redis { url })
    } else {
        Ok(BrokerSettings::InMemory)
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(env: &impl Env) -> Result<Self, ConfigError> {
        let jwt_secret = match env.var("JWT_SECRET") {
            Some(s) => s,
            None if is_production(env) => return Err(ConfigError::Missing("JWT_SECRET")),
            None => {
                warn!("JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
        };

        let defaults = TokenConfig::default();
        let access: i64 = parsed(env, "ACCESS_TOKEN_TTL_SECS", defaults.access_ttl.num_seconds())?;
        let refresh: i64 = parsed(env, "REFRESH_TOKEN_TTL_SECS", defaults.refresh_ttl.num_seconds())?;
        if access <= 0 || refresh <= 0 {
            return Err(ConfigError::Invalid {
                name: "ACCESS_TOKEN_TTL_SECS",
                reason: "token lifetimes must be positive".into(),
            });
        }

        let bcrypt_cost = parsed(env, "BCRYPT_COST", clubhub_auth::DEFAULT_BCRYPT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                name: "BCRYPT_COST",
                reason: format!("{bcrypt_cost} is outside 4..=31"),
            });
        }

        let admin = match (env.var("ADMIN_EMAIL"), env.var("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("ADMIN_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("ADMIN_EMAIL")),
        };

        Ok(Self {
            bind_addr: env.var("GATEWAY_BIND").unwrap_or_else(|| "0.0.0.0:8080".into()),
            jwt_secret,
            tokens: TokenConfig {
                access_ttl: chrono::Duration::seconds(access),
                refresh_ttl: chrono::Duration::seconds(refresh),
            },
            bcrypt_cost,
            upstream_url: env
                .var("UPSTREAM_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8081".into())
                .trim_end_matches('/')
                .to_string(),
            upstream_timeout: Duration::from_millis(parsed(env, "UPSTREAM_TIMEOUT_MS", 5_000u64)?),
            broker: broker_settings(env)?,
            admin,
        })
    }
}

impl PortalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(env: &impl Env) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: env.var("PORTAL_BIND").unwrap_or_else(|| "0.0.0.0:8081".into()),
            object_base_url: env
                .var("OBJECT_BASE_URL")
                .unwrap_or_else(|| "memory://objects".into()),
            broker: broker_settings(env)?,
        })
    }
}
