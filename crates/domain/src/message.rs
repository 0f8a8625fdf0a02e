use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 附件描述对核心不透明，原样保存和转发。
pub type Attachment = serde_json::Value;

/// 单个表情回应允许的最大字符数
pub const MAX_REACTION_LEN: usize = 32;

/// 通过校验、尚未持久化的消息。
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

impl NewMessage {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<Self, DomainError> {
        let content = content.into();
        ensure_has_body(&content, &attachments)?;
        Ok(Self {
            conversation_id,
            sender_id,
            content,
            attachments,
        })
    }
}

/// 已持久化的会话消息。
///
/// `conversation_id`、`sender_id`、`timestamp` 创建后不可变；
/// `read_by`、`reactions`、`edited_at`、`deleted_at` 只能通过下面的方法修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub timestamp: Timestamp,
    pub read_by: BTreeSet<UserId>,
    pub reactions: BTreeMap<UserId, String>,
    pub edited_at: Option<Timestamp>,
    pub deleted_at: Option<Timestamp>,
    /// 存储内部的插入序号，仅用于同一时间戳下的排序
    #[serde(skip)]
    pub sequence: i64,
}

impl Message {
    pub fn persisted(
        id: MessageId,
        draft: NewMessage,
        timestamp: Timestamp,
        sequence: i64,
    ) -> Self {
        Self {
            id,
            conversation_id: draft.conversation_id,
            sender_id: draft.sender_id,
            content: draft.content,
            attachments: draft.attachments,
            timestamp,
            read_by: BTreeSet::new(),
            reactions: BTreeMap::new(),
            edited_at: None,
            deleted_at: None,
            sequence,
        }
    }

    /// 标记已读，返回是否产生了变化。
    pub fn mark_read(&mut self, user_id: UserId) -> bool {
        self.read_by.insert(user_id)
    }

    /// 每个用户只保留一个回应，后写覆盖先写。
    pub fn set_reaction(
        &mut self,
        user_id: UserId,
        reaction: impl Into<String>,
    ) -> Result<(), DomainError> {
        let reaction = reaction.into();
        let trimmed = reaction.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("reaction", "cannot be empty"));
        }
        if trimmed.chars().count() > MAX_REACTION_LEN {
            return Err(DomainError::invalid_argument("reaction", "too long"));
        }
        self.reactions.insert(user_id, trimmed.to_owned());
        Ok(())
    }

    pub fn edit(&mut self, content: impl Into<String>, at: Timestamp) -> Result<(), DomainError> {
        if self.is_deleted() {
            return Err(DomainError::MessageDeleted);
        }
        let content = content.into();
        ensure_has_body(&content, &self.attachments)?;
        self.content = content;
        self.edited_at = Some(at);
        Ok(())
    }

    /// 逻辑删除。重复删除保留第一次的删除时间。
    pub fn soft_delete(&mut self, at: Timestamp) -> bool {
        if self.deleted_at.is_some() {
            return false;
        }
        self.deleted_at = Some(at);
        true
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

fn ensure_has_body(content: &str, attachments: &[Attachment]) -> Result<(), DomainError> {
    if content.trim().is_empty() && attachments.is_empty() {
        return Err(DomainError::invalid_argument(
            "content",
            "message needs content or at least one attachment",
        ));
    }
    Ok(())
}
