mod history_service;
mod message_service;

pub use history_service::{HistoryQuery, HistoryService};
pub use message_service::MessageService;
