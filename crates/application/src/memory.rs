//! 内存消息存储
//!
//! 未配置数据库时使用，也是测试里的默认存储。进程重启后数据丢失。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    ConversationId, DomainError, Message, MessageId, NewMessage, RepositoryError, UserId,
};
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::repository::{ListQuery, MessageRepository};

#[derive(Default)]
struct Store {
    /// 每个会话按插入顺序追加的日志
    logs: HashMap<ConversationId, Vec<Message>>,
    /// 消息ID到 (会话, 日志下标) 的索引
    index: HashMap<MessageId, (ConversationId, usize)>,
    next_sequence: i64,
}

impl Store {
    fn get_mut(&mut self, id: MessageId) -> Result<&mut Message, RepositoryError> {
        let (conversation_id, position) = *self.index.get(&id).ok_or(RepositoryError::NotFound)?;
        self.logs
            .get_mut(&conversation_id)
            .and_then(|log| log.get_mut(position))
            .ok_or(RepositoryError::NotFound)
    }
}

pub struct InMemoryMessageRepository {
    clock: Arc<dyn Clock>,
    store: RwLock<Store>,
}

impl InMemoryMessageRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            store: RwLock::new(Store::default()),
        }
    }

    async fn mutate(
        &self,
        id: MessageId,
        apply: impl FnOnce(&mut Message) -> Result<(), DomainError>,
    ) -> Result<Message, RepositoryError> {
        let mut store = self.store.write().await;
        let message = store.get_mut(id)?;
        // 先在副本上应用，被拒绝时原记录保持不变
        let mut updated = message.clone();
        apply(&mut updated)?;
        *message = updated.clone();
        Ok(updated)
    }
}

impl Default for InMemoryMessageRepository {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, draft: NewMessage) -> Result<Message, RepositoryError> {
        let mut store = self.store.write().await;
        store.next_sequence += 1;
        let sequence = store.next_sequence;

        let log = store.logs.entry(draft.conversation_id).or_default();
        // 墙上时钟可能回拨，时间戳不得早于会话中最后一条消息
        let now = self.clock.now();
        let timestamp = log.last().map_or(now, |last| last.timestamp.max(now));

        let conversation_id = draft.conversation_id;
        let message = Message::persisted(MessageId::generate(), draft, timestamp, sequence);
        let position = log.len();
        log.push(message.clone());
        store.index.insert(message.id, (conversation_id, position));

        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.index.get(&id).and_then(|(conversation_id, position)| {
            store
                .logs
                .get(conversation_id)
                .and_then(|log| log.get(*position))
                .cloned()
        }))
    }

    async fn list(
        &self,
        conversation_id: ConversationId,
        query: ListQuery,
    ) -> Result<Vec<Message>, RepositoryError> {
        let store = self.store.read().await;
        let Some(log) = store.logs.get(&conversation_id) else {
            return Ok(Vec::new());
        };

        // 日志按插入顺序排列，时间戳单调不减、序号递增，倒序即为最新在前
        Ok(log
            .iter()
            .rev()
            .filter(|message| query.include_deleted || !message.is_deleted())
            .skip(query.skip as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, id: MessageId, user_id: UserId) -> Result<Message, RepositoryError> {
        self.mutate(id, |message| {
            message.mark_read(user_id);
            Ok(())
        })
        .await
    }

    async fn set_reaction(
        &self,
        id: MessageId,
        user_id: UserId,
        reaction: String,
    ) -> Result<Message, RepositoryError> {
        self.mutate(id, |message| message.set_reaction(user_id, reaction))
            .await
    }

    async fn edit(&self, id: MessageId, content: String) -> Result<Message, RepositoryError> {
        let now = self.clock.now();
        self.mutate(id, |message| message.edit(content, now)).await
    }

    async fn soft_delete(&self, id: MessageId) -> Result<Message, RepositoryError> {
        let now = self.clock.now();
        self.mutate(id, |message| {
            message.soft_delete(now);
            Ok(())
        })
        .await
    }
}
