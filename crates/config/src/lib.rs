//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 消息存储（PostgreSQL 或内存）
//! - JWT认证
//! - 历史消息分页
//! - WebSocket 连接
//!
//! 加载顺序：内置默认值 → `chat.yaml`（可选）→ `CHAT_` 前缀的环境变量，
//! 嵌套字段用双下划线分隔，例如 `CHAT_DATABASE__URL`。

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// 默认配置文件名
pub const CONFIG_FILE: &str = "chat.yaml";

/// 开发环境默认 JWT 密钥，生产环境必须覆盖
pub const DEV_JWT_SECRET: &str = "dev-secret-key-not-for-production-use-minimum-32-chars";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub history: HistoryConfig,
    pub websocket: WebSocketConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 数据库配置，`url` 为空时使用内存存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// 历史消息分页配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

/// WebSocket 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// 连接在该时长内没有任何入站帧时被关闭
    pub idle_timeout_secs: u64,
    /// 每个连接的出站队列长度，写满后该连接被剔除
    pub outbound_buffer: usize,
}

impl Default for AppConfig {
    /// 默认配置使用开发环境版本
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: DEV_JWT_SECRET.to_string(),
                expiration_hours: 24,
            },
            history: HistoryConfig {
                default_limit: 20,
                max_limit: 100,
            },
            websocket: WebSocketConfig {
                idle_timeout_secs: 300,
                outbound_buffer: 256,
            },
        }
    }
}

impl AppConfig {
    /// 构建配置来源链，测试中可以单独使用
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(CONFIG_FILE))
            .merge(Env::prefixed("CHAT_").split("__"))
    }

    /// 加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    /// 是否仍在使用开发密钥
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt.secret == DEV_JWT_SECRET
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证JWT密钥长度（至少256位/32字节）
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "token expiration must be positive".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "port must be greater than 0".to_string(),
            ));
        }

        if let Some(url) = &self.database.url {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "database url cannot be blank".to_string(),
                ));
            }
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidDatabaseConfig(
                "max connections must be greater than 0".to_string(),
            ));
        }

        if self.history.default_limit == 0 || self.history.default_limit > self.history.max_limit
        {
            return Err(ConfigError::InvalidHistoryConfig(format!(
                "default_limit ({}) must be within 1..={}",
                self.history.default_limit, self.history.max_limit
            )));
        }

        if self.websocket.idle_timeout_secs == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "websocket idle timeout must be greater than 0".to_string(),
            ));
        }

        if self.websocket.outbound_buffer == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "websocket outbound buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid history configuration: {0}")]
    InvalidHistoryConfig(String),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        Self::Load(Box::new(value))
    }
}
