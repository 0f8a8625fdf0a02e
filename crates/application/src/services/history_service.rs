//! 会话历史分页读取
//!
//! 分页之间只保证弱一致：翻页期间写入的新消息可能让相邻两页出现重复或遗漏。

use std::sync::Arc;

use config::HistoryConfig;
use domain::{ConversationId, Message};
use serde::Deserialize;
use tracing::debug;

use crate::error::ApplicationError;
use crate::repository::{ListQuery, MessageRepository};

/// 历史查询参数，缺省值由服务按配置补齐
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub skip: Option<u32>,
    #[serde(default = "include_deleted_by_default")]
    pub include_deleted: bool,
}

fn include_deleted_by_default() -> bool {
    true
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: None,
            skip: None,
            include_deleted: true,
        }
    }
}

pub struct HistoryService {
    repository: Arc<dyn MessageRepository>,
    default_limit: u32,
    max_limit: u32,
}

impl HistoryService {
    pub fn new(repository: Arc<dyn MessageRepository>, config: &HistoryConfig) -> Self {
        Self {
            repository,
            default_limit: config.default_limit.max(1),
            max_limit: config.max_limit.max(1),
        }
    }

    /// 最新的消息在前
    pub async fn history(
        &self,
        conversation_id: ConversationId,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, ApplicationError> {
        let list_query = ListQuery {
            limit: query
                .limit
                .unwrap_or(self.default_limit)
                .clamp(1, self.max_limit),
            skip: query.skip.unwrap_or(0),
            include_deleted: query.include_deleted,
        };

        let page = self.repository.list(conversation_id, list_query).await?;
        debug!(
            %conversation_id,
            limit = list_query.limit,
            skip = list_query.skip,
            returned = page.len(),
            "history page loaded"
        );
        Ok(page)
    }
}
