use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use application::{Clock, ListQuery, MessageRepository, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Attachment, ConversationId, DomainError, Message, MessageId, NewMessage, RepositoryError,
    UserId,
};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "sequence, id, conversation_id, sender_id, content, attachments, \
     created_at, read_by, reactions, edited_at, deleted_at";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    sequence: i64,
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    attachments: Json<Vec<Attachment>>,
    created_at: DateTime<Utc>,
    read_by: Vec<Uuid>,
    reactions: Json<BTreeMap<UserId, String>>,
    edited_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<MessageRecord> for Message {
    fn from(value: MessageRecord) -> Self {
        Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            content: value.content,
            attachments: value.attachments.0,
            timestamp: value.created_at,
            read_by: value.read_by.into_iter().map(UserId::from).collect::<BTreeSet<_>>(),
            reactions: value.reactions.0,
            edited_at: value.edited_at,
            deleted_at: value.deleted_at,
            sequence: value.sequence,
        }
    }
}

/// PostgreSQL 消息存储
pub struct PgMessageRepository {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        id: MessageId,
    ) -> Result<Message, RepositoryError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 FOR UPDATE");
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx_err)?
            .ok_or(RepositoryError::NotFound)?;
        Ok(record.into())
    }

    /// 行锁内读取、应用领域规则、写回；规则拒绝时事务回滚
    async fn mutate<F>(&self, id: MessageId, apply: F) -> Result<Message, RepositoryError>
    where
        F: FnOnce(&mut Message) -> Result<(), DomainError> + Send,
    {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let mut message = Self::lock_row(&mut tx, id).await?;
        apply(&mut message)?;

        let read_by: Vec<Uuid> = message.read_by.iter().copied().map(Uuid::from).collect();
        let sql = format!(
            r#"
            UPDATE messages
            SET content = $2, read_by = $3, reactions = $4, edited_at = $5, deleted_at = $6
            WHERE id = $1
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        // 以数据库返回的行为准，时间精度与后续读取一致
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(id))
            .bind(message.content.as_str())
            .bind(read_by)
            .bind(Json(&message.reactions))
            .bind(message.edited_at)
            .bind(message.deleted_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(record.into())
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(&self, draft: NewMessage) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 同一会话的写入串行化，时间戳不早于会话中最后一条消息
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(Uuid::from(draft.conversation_id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let sql = format!(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, attachments, created_at)
            VALUES (
                $1, $2, $3, $4, $5,
                GREATEST($6, (SELECT MAX(created_at) FROM messages WHERE conversation_id = $2))
            )
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(MessageId::generate()))
            .bind(Uuid::from(draft.conversation_id))
            .bind(Uuid::from(draft.sender_id))
            .bind(draft.content.as_str())
            .bind(Json(&draft.attachments))
            .bind(self.clock.now())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(record.into())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(record.map(Message::from))
    }

    async fn list(
        &self,
        conversation_id: ConversationId,
        query: ListQuery,
    ) -> Result<Vec<Message>, RepositoryError> {
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE conversation_id = $1 AND ($2 OR deleted_at IS NULL)
            ORDER BY created_at DESC, sequence DESC
            LIMIT $3 OFFSET $4
            "#
        );
        let records = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(conversation_id))
            .bind(query.include_deleted)
            .bind(i64::from(query.limit))
            .bind(i64::from(query.skip))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Message::from).collect())
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

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
