//! 消息投递核心领域模型
//!
//! 包含会话消息实体、标识值对象以及领域错误定义。

pub mod errors;
pub mod message;
pub mod value_objects;

// 重新导出常用类型
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::{Attachment, Message, NewMessage, MAX_REACTION_LEN};
pub use value_objects::{ConnectionId, ConversationId, MessageId, Timestamp, UserId};
