pub mod connection;
pub mod api_keys_repository;

use crate::infrastructure::config::Config;
use connection::{DatabaseConnection, DatabaseConnectionError};
pub use api_keys_repository::ApiKeysRepository;

/// 数据库错误类型
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("连接管理器错误: {0}")]
    ConnectionManager(#[from] DatabaseConnectionError),
    
    #[error("SQL执行错误: {0}")]
    Sql(#[from] sqlx::Error),
    
    #[error("配置错误: {0}")]
    Configuration(String),
}

/// 数据库管理器 - 包装连接管理器并提供仓储
#[derive(Debug, Clone)]
pub struct Database {
    connection_manager: DatabaseConnection,
    pub api_keys: ApiKeysRepository,
}

impl Database {
    /// 使用配置创建数据库实例
    pub async fn new(config: &Config) -> Result<Self, DatabaseError> {
        let database_url = config
            .database_url
            .as_deref()
            .ok_or_else(|| DatabaseError::Configuration("未配置 DATABASE_URL".to_string()))?;

        let connection_manager = DatabaseConnection::new(database_url, &config.database).await?;
        let api_keys = ApiKeysRepository::new(connection_manager.pool().clone());

        Ok(Database { connection_manager, api_keys })
    }

    /// 获取数据库连接池
    pub fn pool(&self) -> &sqlx::PgPool {
        self.connection_manager.pool()
    }

    /// 执行健康检查
    pub async fn health_check(&self) -> Result<bool, DatabaseError> {
        self.connection_manager.health_check().await
            .map_err(DatabaseError::ConnectionManager)
    }

    /// 关闭数据库连接
    pub async fn close(&self) {
        self.connection_manager.close().await;
    }
}
