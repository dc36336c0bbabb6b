use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

const REQUIRED_VARS: [&str; 4] = ["DB_PRIMARY_HOST", "DB_NAME", "DB_USERNAME", "DB_PASSWORD"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub log_level: String,
    pub json_logs: bool,
    pub shutdown_grace: Duration,
    /// Origins CORS admits in production; other environments mirror the caller.
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

/// Pool sizing and timeouts for one database role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub min: u32,
    pub max: u32,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub statement_timeout: Duration,
}

#[derive(Clone)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool: PoolConfig,
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("pool", &self.pool)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslConfig {
    Disabled,
    Required,
    Verified,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub primary: EndpointConfig,
    pub replica: EndpointConfig,
    pub ssl: SslConfig,
    pub query_logging: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: ServerConfig,
    pub database: DatabaseConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let missing: Vec<&str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|key| lookup(*key).map_or(true, |v| v.trim().is_empty()))
            .collect();
        if !missing.is_empty() {
            anyhow::bail!(
                "Missing required environment variables: {}",
                missing.join(", ")
            );
        }

        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(default)
        };

        let app = ServerConfig {
            host: var("APP_HOST", "0.0.0.0"),
            port: parse_or(&lookup, "APP_PORT", 8080),
            environment: var("APP_ENV", "development"),
            log_level: var("LOG_LEVEL", "info"),
            json_logs: lookup("LOG_FORMAT").map(|v| v == "json").unwrap_or(false),
            shutdown_grace: Duration::from_secs(parse_or(&lookup, "SHUTDOWN_GRACE_SECS", 10)),
            cors_origins: lookup("CORS_ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        };

        let primary_host = var("DB_PRIMARY_HOST", "");
        let port = parse_or(&lookup, "DB_PORT", 5432);
        let database = var("DB_NAME", "");
        let user = var("DB_USERNAME", "");
        let password = var("DB_PASSWORD", "");

        let primary = EndpointConfig {
            host: primary_host.clone(),
            port,
            database: database.clone(),
            user: user.clone(),
            password: password.clone(),
            pool: pool_config(&lookup, "PRIMARY")?,
        };
        let replica = EndpointConfig {
            host: lookup("DB_REPLICA_HOST")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(primary_host),
            port: parse_or(&lookup, "DB_REPLICA_PORT", port),
            database,
            user,
            password,
            pool: pool_config(&lookup, "REPLICA")?,
        };

        let ssl = if !flag("DB_SSL", false) {
            SslConfig::Disabled
        } else if flag("DB_SSL_REJECT_UNAUTHORIZED", true) {
            SslConfig::Verified
        } else {
            SslConfig::Required
        };

        Ok(Self {
            app,
            database: DatabaseConfig {
                primary,
                replica,
                ssl,
                query_logging: flag("DB_QUERY_LOGGING", false),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// `DB_POOL_*` applies to both roles; `DB_<ROLE>_POOL_*` overrides it for one.
/// The shared statement timeout is `DB_STATEMENT_TIMEOUT` rather than `DB_POOL_STATEMENT_TIMEOUT`.
fn pool_config<F>(lookup: &F, role: &str) -> anyhow::Result<PoolConfig>
where
    F: Fn(&str) -> Option<String>,
{
    fn setting<F, T>(lookup: &F, shared_key: &str, role_key: &str, default: T) -> T
    where
        F: Fn(&str) -> Option<String>,
        T: std::str::FromStr,
    {
        let shared = parse_or(lookup, shared_key, default);
        parse_or(lookup, role_key, shared)
    }
    let pooled = |name: &str, default: u64| -> u64 {
        setting(lookup, &format!("DB_POOL_{name}"), &format!("DB_{role}_POOL_{name}"), default)
    };

    let max: u32 = setting(lookup, "DB_POOL_MAX", &format!("DB_{role}_POOL_MAX"), 20);
    if max == 0 {
        anyhow::bail!("{role} pool max connections must be at least 1");
    }

    Ok(PoolConfig {
        min: setting(lookup, "DB_POOL_MIN", &format!("DB_{role}_POOL_MIN"), 2),
        max,
        idle_timeout: Duration::from_millis(pooled("IDLE_TIMEOUT", 10_000)),
        connect_timeout: Duration::from_millis(pooled("CONNECTION_TIMEOUT", 5_000)),
        statement_timeout: Duration::from_millis(setting(
            lookup,
            "DB_STATEMENT_TIMEOUT",
            &format!("DB_{role}_POOL_STATEMENT_TIMEOUT"),
            30_000,
        )),
    })
}

#[cfg(test)]
impl AppConfig {
    /// Local-only configuration with required values filled in; `overrides` wins.
    pub(crate) fn for_tests(overrides: &[(&str, &str)]) -> Self {
        let mut vars: std::collections::HashMap<String, String> = [
            ("DB_PRIMARY_HOST", "127.0.0.1"),
            ("DB_NAME", "postgres"),
            ("DB_USERNAME", "postgres"),
            ("DB_PASSWORD", "postgres"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in overrides {
            vars.insert(k.to_string(), v.to_string());
        }
        Self::from_lookup(|key| vars.get(key).cloned()).expect("test config is complete")
    }
}
