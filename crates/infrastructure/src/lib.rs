//! 基础设施层实现。
//!
//! 提供基于 PostgreSQL 的消息存储适配器，实现应用层定义的 `MessageRepository`。

pub mod builder;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgMessageRepository};
