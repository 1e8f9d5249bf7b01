use sqlx::{PgPool, postgres::PgPoolOptions, Row};
use std::time::{Duration, Instant};
use crate::infrastructure::config::DatabaseConfig;

/// 数据库连接错误类型
#[derive(Debug, thiserror::Error)]
pub enum DatabaseConnectionError {
    #[error("连接池配置错误: {0}")]
    Configuration(String),
    
    #[error("数据库连接失败: {0}")]
    Connection(#[from] sqlx::Error),
    
    #[error("健康检查失败: {0}")]
    HealthCheckFailed(String),
}

/// 数据库连接管理器
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// 创建新的数据库连接管理器
    pub async fn new(database_url: &str, config: &DatabaseConfig) -> Result<Self, DatabaseConnectionError> {
        validate_config(config)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(config.max_lifetime_seconds))
            .test_before_acquire(config.test_before_acquire)
            .connect(database_url)
            .await?;

        let connection = Self { pool };

        // 执行初始健康检查
        connection.health_check().await?;

        tracing::info!("数据库连接池初始化成功 - max: {}, min: {}", 
            config.max_connections, config.min_connections);

        Ok(connection)
    }

    /// 获取数据库连接池
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 执行健康检查
    pub async fn health_check(&self) -> Result<bool, DatabaseConnectionError> {
        let start = Instant::now();

        let result = sqlx::query("SELECT 1 as health_check")
            .fetch_one(&self.pool)
            .await;

        let elapsed = start.elapsed();
        match result {
            Ok(row) => {
                let _health: i32 = row.get("health_check");
                tracing::debug!("数据库健康检查成功 - 响应时间: {:?}", elapsed);
                Ok(true)
            }
            Err(e) => {
                tracing::error!("数据库健康检查失败 - 响应时间: {:?}, 错误: {:?}", elapsed, e);
                Err(DatabaseConnectionError::HealthCheckFailed(e.to_string()))
            }
        }
    }

    /// 关闭连接池
    pub async fn close(&self) {
        tracing::info!("正在关闭数据库连接池...");
        self.pool.close().await;
        tracing::info!("数据库连接池已关闭");
    }
}

/// 验证数据库配置
fn validate_config(config: &DatabaseConfig) -> Result<(), DatabaseConnectionError> {
    if config.min_connections > config.max_connections {
        return Err(DatabaseConnectionError::Configuration(
            "最小连接数不能大于最大连接数".to_string()
        ));
    }

    if config.max_connections == 0 {
        return Err(DatabaseConnectionError::Configuration(
            "最大连接数必须大于0".to_string()
        ));
    }

    if config.acquire_timeout_seconds == 0 {
        return Err(DatabaseConnectionError::Configuration(
            "连接获取超时时间必须大于0".to_string()
        ));
    }

    Ok(())
}
