//! Cycle Store connection configuration.

use std::env;

/// SQLite connection settings for the Cycle Store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://dca.db".to_string());
        let max_connections = env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        Self {
            database_url,
            max_connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_max_connections_to_five() {
        let cfg = StoreConfig {
            database_url: "sqlite://test.db".to_string(),
            max_connections: 5,
        };
        assert_eq!(cfg.max_connections, 5);
    }
}
