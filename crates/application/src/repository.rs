use async_trait::async_trait;
use domain::{ConversationId, Message, MessageId, NewMessage, RepositoryError, UserId};

/// 会话消息分页参数（调用方负责把 `limit` 限制在配置上限内）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    pub limit: u32,
    pub skip: u32,
    /// 是否包含已逻辑删除的消息，默认包含以保持会话连续性
    pub include_deleted: bool,
}

impl ListQuery {
    pub fn new(limit: u32, skip: u32) -> Self {
        Self {
            limit,
            skip,
            include_deleted: true,
        }
    }
}

/// 消息存储契约。
///
/// `append` 必须在返回前完成持久化，并分配 `id`、`timestamp` 以及内部序号；
/// 同一会话内的时间戳按插入顺序单调不减。
/// `list` 按 `(timestamp DESC, sequence DESC)` 返回最新的消息在前。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: NewMessage) -> Result<Message, RepositoryError>;

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    async fn list(
        &self,
        conversation_id: ConversationId,
        query: ListQuery,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn mark_read(&self, id: MessageId, user_id: UserId) -> Result<Message, RepositoryError>;

    async fn set_reaction(
        &self,
        id: MessageId,
        user_id: UserId,
        reaction: String,
    ) -> Result<Message, RepositoryError>;

    async fn edit(&self, id: MessageId, content: String) -> Result<Message, RepositoryError>;

    async fn soft_delete(&self, id: MessageId) -> Result<Message, RepositoryError>;
}
