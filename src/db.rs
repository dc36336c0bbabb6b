use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{
    migrate::Migrator,
    pool::PoolConnection,
    postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode},
    ConnectOptions, Postgres,
};
use time::OffsetDateTime;
use tracing::{error, info};

use crate::config::{DatabaseConfig, EndpointConfig, SslConfig};
use crate::error::AppError;

const APPLICATION_NAME: &str = "rds-crud";

/// Reversible schema migrations, applied to the primary only.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Which database endpoint a pool talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => f.write_str("primary"),
            Role::Replica => f.write_str("replica"),
        }
    }
}

/// Kind of statement a repository operation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    /// Static routing policy: writes hit the primary, reads the replica.
    pub fn role(self) -> Role {
        match self {
            Access::Write => Role::Primary,
            Access::Read => Role::Replica,
        }
    }
}

/// Result of probing both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Connectivity {
    pub primary: bool,
    pub replica: bool,
}

impl Connectivity {
    pub fn is_healthy(&self) -> bool {
        self.primary && self.replica
    }
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn test_connectivity(&self) -> Connectivity;
}

/// Primary and replica pools, owned by the lifecycle and shared by cloning.
#[derive(Clone)]
pub struct DbPools {
    primary: PgPool,
    replica: PgPool,
}

impl DbPools {
    /// Builds both pools without opening a connection; the first acquire connects.
    pub fn connect_lazy(cfg: &DatabaseConfig) -> Self {
        Self {
            primary: build_pool(Role::Primary, &cfg.primary, cfg),
            replica: build_pool(Role::Replica, &cfg.replica, cfg),
        }
    }

    /// Wraps pools that were built elsewhere.
    #[cfg(test)]
    pub fn from_pools(primary: PgPool, replica: PgPool) -> Self {
        Self { primary, replica }
    }

    pub fn handle(&self, role: Role) -> &PgPool {
        match role {
            Role::Primary => &self.primary,
            Role::Replica => &self.replica,
        }
    }

    pub fn route(&self, access: Access) -> &PgPool {
        self.handle(access.role())
    }

    /// Checks out a connection; dropping it hands it back to its pool.
    pub async fn acquire(&self, role: Role) -> Result<PoolConnection<Postgres>, AppError> {
        self.handle(role).acquire().await.map_err(|e| {
            error!(%role, error = %e, "failed to acquire connection");
            AppError::from(e)
        })
    }

    async fn probe(&self, role: Role) -> bool {
        let result = async {
            let mut conn = self.acquire(role).await?;
            let now = sqlx::query_scalar::<_, OffsetDateTime>("SELECT NOW()")
                .fetch_one(&mut *conn)
                .await?;
            Ok::<_, AppError>(now)
        }
        .await;

        match result {
            Ok(now) => {
                info!(%role, server_time = %now, "database reachable");
                true
            }
            Err(e) => {
                error!(%role, error = %e, "database connectivity test failed");
                false
            }
        }
    }

    /// Waits for checked-out connections to return, then closes both pools.
    pub async fn shutdown(&self) {
        info!("closing database connections");
        tokio::join!(self.primary.close(), self.replica.close());
        info!("database connections closed");
    }
}

#[async_trait]
impl ConnectivityProbe for DbPools {
    async fn test_connectivity(&self) -> Connectivity {
        let (primary, replica) = tokio::join!(self.probe(Role::Primary), self.probe(Role::Replica));
        Connectivity { primary, replica }
    }
}

fn build_pool(role: Role, endpoint: &EndpointConfig, cfg: &DatabaseConfig) -> PgPool {
    let ssl_mode = match cfg.ssl {
        SslConfig::Disabled => PgSslMode::Prefer,
        SslConfig::Required => PgSslMode::Require,
        SslConfig::Verified => PgSslMode::VerifyFull,
    };

    let mut options = PgConnectOptions::new()
        .host(&endpoint.host)
        .port(endpoint.port)
        .database(&endpoint.database)
        .username(&endpoint.user)
        .password(&endpoint.password)
        .ssl_mode(ssl_mode)
        .application_name(APPLICATION_NAME)
        .options([(
            "statement_timeout",
            endpoint.pool.statement_timeout.as_millis(),
        )]);
    if !cfg.query_logging {
        options = options.disable_statement_logging();
    }

    let pool = &endpoint.pool;
    PgPoolOptions::new()
        .min_connections(pool.min.min(pool.max))
        .max_connections(pool.max)
        .idle_timeout(pool.idle_timeout)
        .acquire_timeout(pool.connect_timeout)
        .after_connect(move |_conn, _meta| {
            Box::pin(async move {
                info!(%role, "new client connected");
                Ok(())
            })
        })
        .connect_lazy_with(options)
}
