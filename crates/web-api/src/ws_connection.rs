use std::sync::Arc;

use application::{error_frame, ApplicationError, BroadcastDispatcher, Connection};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConversationId, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// WebSocket 连接管理器
///
/// 单个已认证连接的生命周期：
/// - 注册到会话的连接桶
/// - 发送任务把出站通道里的帧写入 socket
/// - 接收任务把文本帧交给分发器，空闲超时或关闭时结束
/// - 出站队列写满被分发器剔除时结束
/// - 结束后从注册表注销
pub struct WebSocketConnection {
    state: AppState,
    conversation_id: ConversationId,
    connection: Connection,
    outbound: mpsc::Receiver<String>,
}

impl WebSocketConnection {
    pub fn new(state: AppState, conversation_id: ConversationId, user_id: UserId) -> Self {
        let (connection, outbound) = Connection::open(user_id, state.outbound_buffer);
        Self {
            state,
            conversation_id,
            connection,
            outbound,
        }
    }

    pub async fn run(self, socket: WebSocket) {
        let Self {
            state,
            conversation_id,
            connection,
            mut outbound,
        } = self;

        let connection_id = connection.id();
        let user_id = connection.user_id();
        state.registry.register(conversation_id, connection.clone());
        tracing::info!(%conversation_id, %connection_id, %user_id, "WebSocket 连接已建立");

        let evicted = connection.clone();
        let (mut sender, mut incoming) = socket.split();

        // 发送任务：唯一的 socket 写入方
        let mut send_task = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if let Err(err) = sender.send(WsMessage::Text(frame.into())).await {
                    tracing::debug!(error = %err, "WebSocket 写入失败");
                    break;
                }
            }
        });

        // 接收任务：处理来自客户端的帧
        let mut recv_task = tokio::spawn({
            let dispatcher = state.dispatcher.clone();
            let idle_timeout = state.idle_timeout;
            async move {
                loop {
                    let message = match tokio::time::timeout(idle_timeout, incoming.next()).await {
                        Err(_) => {
                            tracing::info!(%connection_id, "WebSocket 空闲超时");
                            break;
                        }
                        Ok(None) => break,
                        Ok(Some(Err(err))) => {
                            tracing::debug!(%connection_id, error = %err, "WebSocket 传输错误");
                            break;
                        }
                        Ok(Some(Ok(message))) => message,
                    };

                    if handle_incoming(&dispatcher, conversation_id, &connection, message)
                        .await
                        .is_break()
                    {
                        break;
                    }
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
            _ = evicted.evicted() => {
                tracing::info!(%connection_id, "WebSocket 出站队列已满，连接被剔除");
                send_task.abort();
                recv_task.abort();
            }
        }

        state.registry.unregister(conversation_id, connection_id);
        tracing::info!(%conversation_id, %connection_id, "WebSocket 连接已断开");
    }
}

/// 处理一帧入站消息，返回 `Break` 表示连接应当结束
async fn handle_incoming(
    dispatcher: &Arc<BroadcastDispatcher>,
    conversation_id: ConversationId,
    connection: &Connection,
    message: WsMessage,
) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    match message {
        WsMessage::Text(text) => {
            // 失败时分发器已把错误帧发回来源连接，连接保持打开
            let _ = dispatcher
                .handle_frame(conversation_id, connection, text.as_str())
                .await;
            ControlFlow::Continue(())
        }
        WsMessage::Binary(_) => {
            let error = ApplicationError::validation("binary frames are not supported");
            if connection.send(error_frame(&error)).is_err() {
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }
        WsMessage::Close(_) => {
            tracing::debug!(connection_id = %connection.id(), "WebSocket 收到关闭消息");
            ControlFlow::Break(())
        }
        // Ping 由底层协议栈自动回复 Pong
        WsMessage::Ping(_) | WsMessage::Pong(_) => ControlFlow::Continue(()),
    }
}

