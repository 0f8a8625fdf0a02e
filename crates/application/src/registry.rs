//! 实时连接注册表
//!
//! 按会话分桶保存在线连接。桶由 `DashMap` 分片加锁，不同会话之间的
//! 注册、注销和快照互不阻塞；同一个桶内的读写互斥。

use std::sync::Arc;

use dashmap::DashMap;
use domain::{ConnectionId, ConversationId, UserId};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::error::ApplicationError;

/// 一个已通过身份校验的实时连接。
///
/// 只持有出站帧通道的发送端，真正的 socket 写入由传输层任务完成。
/// 出站通道有界，读得太慢的对端会在队列写满时被判定为不可达。
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    sender: mpsc::Sender<String>,
    evicted: Arc<Notify>,
}

impl Connection {
    pub fn new(user_id: UserId, sender: mpsc::Sender<String>) -> Self {
        Self {
            id: ConnectionId::generate(),
            user_id,
            sender,
            evicted: Arc::new(Notify::new()),
        }
    }

    /// 创建连接以及对应的出站帧接收端，`capacity` 为出站队列长度
    pub fn open(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(user_id, sender), receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// 投递一帧，从不等待。
    ///
    /// 出站队列已满或接收端已关闭时返回连接错误。
    pub fn send(&self, frame: String) -> Result<(), ApplicationError> {
        self.sender
            .try_send(frame)
            .map_err(|_| ApplicationError::Connection(self.id))
    }

    /// 通知传输层该连接已被注册表剔除，应当关闭
    pub fn evict(&self) {
        self.evicted.notify_one();
    }

    /// 等待 [`Connection::evict`]，先于等待发生的剔除同样会被观察到
    pub async fn evicted(&self) {
        self.evicted.notified().await;
    }
}

/// 注册成功后返回的订阅凭据，注销时使用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub conversation_id: ConversationId,
    pub connection_id: ConnectionId,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    /// 会话 -> 按注册顺序排列、以连接ID去重的连接集合
    buckets: DashMap<ConversationId, Vec<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把连接加入会话的桶。同一连接重复注册是无操作。
    pub fn register(
        &self,
        conversation_id: ConversationId,
        connection: Connection,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle {
            conversation_id,
            connection_id: connection.id,
        };

        let mut bucket = self.buckets.entry(conversation_id).or_default();
        if bucket.iter().any(|existing| existing.id == connection.id) {
            debug!(%conversation_id, connection_id = %connection.id, "connection already registered");
            return handle;
        }

        debug!(
            %conversation_id,
            connection_id = %connection.id,
            user_id = %connection.user_id,
            bucket_size = bucket.len() + 1,
            "connection registered"
        );
        bucket.push(connection);
        handle
    }

    /// 从桶中移除连接，不存在时无操作；桶变空时一并删除。
    pub fn unregister(&self, conversation_id: ConversationId, connection_id: ConnectionId) {
        let mut removed = false;
        let emptied = self
            .buckets
            .remove_if_mut(&conversation_id, |_, bucket| {
                let before = bucket.len();
                bucket.retain(|connection| connection.id != connection_id);
                removed = bucket.len() != before;
                bucket.is_empty()
            })
            .is_some();

        if removed {
            debug!(%conversation_id, %connection_id, emptied, "connection unregistered");
        }
    }

    /// 某一时刻桶内连接的副本，按注册顺序排列
    pub fn snapshot(&self, conversation_id: ConversationId) -> Vec<Connection> {
        self.buckets
            .get(&conversation_id)
            .map(|bucket| bucket.value().clone())
            .unwrap_or_default()
    }

    pub fn bucket_len(&self, conversation_id: ConversationId) -> usize {
        self.buckets
            .get(&conversation_id)
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }

    /// 当前至少有一个在线连接的会话数
    pub fn conversation_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const BUFFER: usize = 8;

    #[test]
    fn register_is_idempotent_per_connection() {
        let registry = ConnectionRegistry::new();
        let conversation = ConversationId::generate();
        let (connection, _rx) = Connection::open(UserId::generate(), BUFFER);

        let first = registry.register(conversation, connection.clone());
        let second = registry.register(conversation, connection.clone());

        assert_eq!(first, second);
        assert_eq!(registry.bucket_len(conversation), 1);
    }

    #[test]
    fn unregister_missing_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        let conversation = ConversationId::generate();
        let (present, _rx) = Connection::open(UserId::generate(), BUFFER);
        registry.register(conversation, present.clone());

        registry.unregister(conversation, ConnectionId::generate());
        registry.unregister(ConversationId::generate(), present.id());

        assert_eq!(registry.bucket_len(conversation), 1);
        assert_eq!(registry.conversation_count(), 1);
    }

    #[test]
    fn empty_bucket_is_removed() {
        let registry = ConnectionRegistry::new();
        let conversation = ConversationId::generate();
        let (a, _rx_a) = Connection::open(UserId::generate(), BUFFER);
        let (b, _rx_b) = Connection::open(UserId::generate(), BUFFER);

        registry.register(conversation, a.clone());
        registry.register(conversation, b.clone());
        registry.unregister(conversation, a.id());
        assert_eq!(registry.conversation_count(), 1);

        registry.unregister(conversation, b.id());
        assert_eq!(registry.conversation_count(), 0);
        assert!(registry.snapshot(conversation).is_empty());
    }

    #[test]
    fn snapshot_keeps_registration_order() {
        let registry = ConnectionRegistry::new();
        let conversation = ConversationId::generate();
        let connections: Vec<_> = (0..3)
            .map(|_| Connection::open(UserId::generate(), BUFFER))
            .collect();

        for (connection, _) in &connections {
            registry.register(conversation, connection.clone());
        }

        let ids: Vec<_> = registry.snapshot(conversation).iter().map(Connection::id).collect();
        let expected: Vec<_> = connections.iter().map(|(c, _)| c.id()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_across_conversations() {
        let registry = Arc::new(ConnectionRegistry::new());
        let conversations: Vec<_> = (0..8).map(|_| ConversationId::generate()).collect();

        let mut tasks = Vec::new();
        for conversation in conversations.clone() {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let mut receivers = Vec::new();
                for _ in 0..50 {
                    let (connection, rx) = Connection::open(UserId::generate(), BUFFER);
                    registry.register(conversation, connection);
                    receivers.push(rx);
                }
                receivers
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        for conversation in conversations {
            assert_eq!(registry.bucket_len(conversation), 50);
        }
    }

    #[test]
    fn send_to_closed_connection_fails() {
        let (connection, rx) = Connection::open(UserId::generate(), BUFFER);
        drop(rx);

        let err = connection.send("frame".into()).unwrap_err();
        assert!(matches!(err, ApplicationError::Connection(id) if id == connection.id()));
    }

    #[test]
    fn send_to_full_connection_fails() {
        let (connection, mut rx) = Connection::open(UserId::generate(), 2);

        connection.send("one".into()).unwrap();
        connection.send("two".into()).unwrap();
        let err = connection.send("three".into()).unwrap_err();
        assert!(matches!(err, ApplicationError::Connection(id) if id == connection.id()));

        // 已入队的帧不受影响
        assert_eq!(rx.try_recv().unwrap(), "one");
        assert_eq!(rx.try_recv().unwrap(), "two");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn eviction_is_observed_by_a_later_waiter() {
        let (connection, _rx) = Connection::open(UserId::generate(), BUFFER);
        let transport_side = connection.clone();

        connection.evict();

        tokio::time::timeout(Duration::from_secs(1), transport_side.evicted())
            .await
            .expect("eviction should already be pending");
    }
}
