//! 应用层实现。
//!
//! 这里提供实时消息投递管线的用例：连接注册表、先持久化再扇出的广播分发器、
//! 历史分页读取，以及对外部适配器（消息存储、身份校验、时钟）的抽象。

pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod memory;
pub mod registry;
pub mod repository;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use dispatcher::{error_frame, BroadcastDispatcher, DispatchReport, InboundMessage};
pub use error::ApplicationError;
pub use identity::IdentityVerifier;
pub use memory::InMemoryMessageRepository;
pub use registry::{Connection, ConnectionRegistry, SubscriptionHandle};
pub use repository::{ListQuery, MessageRepository};
pub use services::{HistoryQuery, HistoryService, MessageService};
