use std::sync::Arc;
use std::time::Duration;

use application::{
    BroadcastDispatcher, ConnectionRegistry, HistoryService, IdentityVerifier, MessageRepository,
    MessageService,
};
use config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub history: Arc<HistoryService>,
    pub messages: Arc<MessageService>,
    pub identity: Arc<dyn IdentityVerifier>,
    /// 连接在该时长内没有入站帧即被关闭
    pub idle_timeout: Duration,
    /// 每个连接的出站队列长度
    pub outbound_buffer: usize,
}

impl AppState {
    /// 基于同一个消息存储装配所有用例服务
    pub fn new(
        repository: Arc<dyn MessageRepository>,
        identity: Arc<dyn IdentityVerifier>,
        config: &AppConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(BroadcastDispatcher::new(repository.clone(), registry.clone()));

        Self {
            registry,
            dispatcher,
            history: Arc::new(HistoryService::new(repository.clone(), &config.history)),
            messages: Arc::new(MessageService::new(repository)),
            identity,
            idle_timeout: Duration::from_secs(config.websocket.idle_timeout_secs),
            outbound_buffer: config.websocket.outbound_buffer,
        }
    }
}
