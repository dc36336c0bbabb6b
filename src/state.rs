use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{ConnectivityProbe, DbPools};
use crate::users::repo::{PgUserRepository, UserRepository};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, pools: DbPools) -> Self {
        Self {
            users: Arc::new(PgUserRepository::new(pools.clone())),
            probe: Arc::new(pools),
            config,
        }
    }

    pub fn from_parts(
        users: Arc<dyn UserRepository>,
        probe: Arc<dyn ConnectivityProbe>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            users,
            probe,
            config,
        }
    }

    /// In-memory repository and a probe that reports `healthy` for both roles.
    #[cfg(test)]
    pub fn fake(healthy: bool, overrides: &[(&str, &str)]) -> Self {
        use crate::db::Connectivity;
        use crate::users::memory::MemoryUserRepository;
        use async_trait::async_trait;

        struct FakeProbe(bool);
        #[async_trait]
        impl ConnectivityProbe for FakeProbe {
            async fn test_connectivity(&self) -> Connectivity {
                Connectivity {
                    primary: self.0,
                    replica: self.0,
                }
            }
        }

        Self::from_parts(
            Arc::new(MemoryUserRepository::new()),
            Arc::new(FakeProbe(healthy)),
            Arc::new(AppConfig::for_tests(overrides)),
        )
    }
}
