use domain::{ConnectionId, DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 入站数据格式错误，只拒绝这一条消息
    #[error("validation failed: {0}")]
    Validation(String),
    /// 存储写入失败，只通知发送方
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("{0} not found")]
    NotFound(String),
    /// 投递时对端连接已不可用
    #[error("connection {0} is no longer reachable")]
    Connection(ConnectionId),
    #[error("authentication failed")]
    Authentication,
    #[error("authorization failed")]
    Authorization,
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApplicationError::Validation(message.into())
    }

    /// 写给客户端错误帧的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Validation(_) => "VALIDATION_ERROR",
            ApplicationError::Persistence(_) => "PERSISTENCE_ERROR",
            ApplicationError::NotFound(_) => "NOT_FOUND",
            ApplicationError::Connection(_) => "CONNECTION_ERROR",
            ApplicationError::Authentication => "UNAUTHORIZED",
            ApplicationError::Authorization => "FORBIDDEN",
            ApplicationError::Infrastructure(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        ApplicationError::Validation(value.to_string())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::NotFound("message".to_string()),
            RepositoryError::Storage { message } => ApplicationError::Persistence(message),
            RepositoryError::Rejected(err) => err.into(),
        }
    }
}
