//! 消息修改服务
//!
//! 已读、表态、编辑和逻辑删除。编辑与删除只允许原发送者执行。

use std::sync::Arc;

use domain::{Message, MessageId, UserId};
use tracing::{info, warn};

use crate::error::ApplicationError;
use crate::repository::MessageRepository;

pub struct MessageService {
    repository: Arc<dyn MessageRepository>,
}

impl MessageService {
    pub fn new(repository: Arc<dyn MessageRepository>) -> Self {
        Self { repository }
    }

    pub async fn find(&self, id: MessageId) -> Result<Message, ApplicationError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound("message".to_string()))
    }

    /// 重复标记已读是无操作
    pub async fn mark_read(&self, id: MessageId, reader: UserId) -> Result<Message, ApplicationError> {
        let message = self.repository.mark_read(id, reader).await?;
        info!(message_id = %id, reader = %reader, "message marked read");
        Ok(message)
    }

    /// 每个用户只保留一个表态，新表态覆盖旧表态
    pub async fn react(
        &self,
        id: MessageId,
        user_id: UserId,
        reaction: String,
    ) -> Result<Message, ApplicationError> {
        let message = self.repository.set_reaction(id, user_id, reaction).await?;
        info!(message_id = %id, user_id = %user_id, "reaction recorded");
        Ok(message)
    }

    pub async fn edit(
        &self,
        id: MessageId,
        editor: UserId,
        content: String,
    ) -> Result<Message, ApplicationError> {
        self.ensure_sender(id, editor).await?;
        let message = self.repository.edit(id, content).await?;
        info!(message_id = %id, "message edited");
        Ok(message)
    }

    /// 逻辑删除，记录保留在历史中
    pub async fn delete(&self, id: MessageId, actor: UserId) -> Result<Message, ApplicationError> {
        self.ensure_sender(id, actor).await?;
        let message = self.repository.soft_delete(id).await?;
        info!(message_id = %id, "message deleted");
        Ok(message)
    }

    async fn ensure_sender(&self, id: MessageId, user_id: UserId) -> Result<(), ApplicationError> {
        let message = self.find(id).await?;
        if message.sender_id != user_id {
            warn!(message_id = %id, user_id = %user_id, "modification by non-sender rejected");
            return Err(ApplicationError::Authorization);
        }
        Ok(())
    }
}
