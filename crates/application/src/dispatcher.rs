//! 广播分发器
//!
//! 对每条入站消息执行 校验 → 持久化 → 扇出。持久化必须在扇出开始前完成；
//! 同一会话的 持久化+扇出 在一条互斥的分发通道内串行执行，
//! 保证所有连接看到的广播顺序与持久化顺序一致。

use std::sync::Arc;

use dashmap::DashMap;
use domain::{Attachment, ConversationId, Message, NewMessage, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ApplicationError;
use crate::registry::{Connection, ConnectionRegistry};
use crate::repository::MessageRepository;

/// 客户端通过实时通道发送的原始消息帧
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

/// 一次分发的结果
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub message: Message,
    /// 成功写入出站通道的连接数
    pub delivered: usize,
    /// 因连接不可用而被移出注册表的连接数
    pub dropped: usize,
}

#[derive(Serialize)]
struct ErrorFrame<'a> {
    error: ErrorFrameBody<'a>,
}

#[derive(Serialize)]
struct ErrorFrameBody<'a> {
    code: &'a str,
    message: String,
}

/// 只发回给来源连接的错误帧
pub fn error_frame(error: &ApplicationError) -> String {
    let frame = ErrorFrame {
        error: ErrorFrameBody {
            code: error.code(),
            message: error.to_string(),
        },
    };
    serde_json::to_string(&frame).unwrap_or_else(|_| {
        format!(r#"{{"error":{{"code":"{}","message":""}}}}"#, error.code())
    })
}

pub struct BroadcastDispatcher {
    repository: Arc<dyn MessageRepository>,
    registry: Arc<ConnectionRegistry>,
    /// 每个会话一条分发通道
    lanes: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl BroadcastDispatcher {
    pub fn new(repository: Arc<dyn MessageRepository>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            repository,
            registry,
            lanes: DashMap::new(),
        }
    }

    /// 处理来源连接上的一帧文本。
    ///
    /// 校验失败或持久化失败时，错误帧只发给来源连接，连接保持打开。
    pub async fn handle_frame(
        &self,
        conversation_id: ConversationId,
        origin: &Connection,
        frame: &str,
    ) -> Result<DispatchReport, ApplicationError> {
        let result = match parse_inbound(conversation_id, origin.user_id(), frame) {
            Ok(draft) => self.create(draft).await,
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            debug!(
                %conversation_id,
                connection_id = %origin.id(),
                error = %err,
                "inbound message rejected"
            );
            if let Err(send_err) = origin.send(error_frame(err)) {
                debug!(error = %send_err, "origin went away before the error frame was sent");
            }
        }

        result
    }

    /// 持久化一条已校验的消息并扇出给会话内所有连接（包括发送者自己）。
    pub async fn create(&self, draft: NewMessage) -> Result<DispatchReport, ApplicationError> {
        let conversation_id = draft.conversation_id;
        let lane = self.lane(conversation_id);

        let outcome = {
            let _guard = lane.lock().await;
            match self.repository.append(draft).await {
                Ok(message) => self.fan_out(message),
                Err(err) => {
                    warn!(%conversation_id, error = %err, "failed to persist message");
                    Err(ApplicationError::from(err))
                }
            }
        };

        drop(lane);
        self.release_lane(conversation_id);
        let report = outcome?;

        info!(
            %conversation_id,
            message_id = %report.message.id,
            delivered = report.delivered,
            dropped = report.dropped,
            "message broadcast"
        );
        Ok(report)
    }

    fn fan_out(&self, message: Message) -> Result<DispatchReport, ApplicationError> {
        let frame = serde_json::to_string(&message)
            .map_err(|err| ApplicationError::Infrastructure(err.to_string()))?;

        let mut delivered = 0;
        let mut dropped = 0;
        for connection in self.registry.snapshot(message.conversation_id) {
            match connection.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    // 单个连接失败不影响其余连接
                    debug!(
                        conversation_id = %message.conversation_id,
                        error = %err,
                        "dropping unreachable connection"
                    );
                    self.registry
                        .unregister(message.conversation_id, connection.id());
                    connection.evict();
                    dropped += 1;
                }
            }
        }

        Ok(DispatchReport {
            message,
            delivered,
            dropped,
        })
    }

    fn lane(&self, conversation_id: ConversationId) -> Arc<Mutex<()>> {
        self.lanes.entry(conversation_id).or_default().clone()
    }

    /// 没有其他任务持有时回收分发通道
    fn release_lane(&self, conversation_id: ConversationId) {
        self.lanes
            .remove_if(&conversation_id, |_, lane| Arc::strong_count(lane) == 1);
    }
}

/// 把原始帧解析为待持久化的消息。
///
/// 帧中的会话和发送者必须与连接绑定的会话和已校验用户一致。
fn parse_inbound(
    conversation_id: ConversationId,
    user_id: UserId,
    frame: &str,
) -> Result<NewMessage, ApplicationError> {
    let inbound: InboundMessage = serde_json::from_str(frame)
        .map_err(|err| ApplicationError::validation(format!("malformed frame: {err}")))?;

    let claimed_conversation = ConversationId::parse(&inbound.conversation_id)?;
    let claimed_sender = UserId::parse(&inbound.sender_id)?;

    if claimed_conversation != conversation_id {
        return Err(ApplicationError::validation(
            "conversationId does not match the connection",
        ));
    }
    if claimed_sender != user_id {
        return Err(ApplicationError::validation(
            "senderId does not match the authenticated user",
        ));
    }

    Ok(NewMessage::new(
        conversation_id,
        user_id,
        inbound.content.unwrap_or_default(),
        inbound.attachments.unwrap_or_default(),
    )?)
}
