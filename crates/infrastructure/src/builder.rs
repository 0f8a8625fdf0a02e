use std::sync::Arc;

use config::DatabaseConfig;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use crate::{
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgMessageRepository},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database url is not configured")]
    MissingDatabaseUrl,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 已连接并完成迁移的 PostgreSQL 存储
#[derive(Clone)]
pub struct Infrastructure {
    pub pool: PgPool,
    pub message_repository: Arc<PgMessageRepository>,
}

impl Infrastructure {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, InfrastructureError> {
        let url = config
            .url
            .as_deref()
            .ok_or(InfrastructureError::MissingDatabaseUrl)?;

        let pool = create_pg_pool(url, config.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        info!(max_connections = config.max_connections, "postgres message store ready");

        Ok(Self {
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        })
    }
}
