//! Core persistence logic for discussion messages.
//! This crate owns the message store protocol and its table contract.

pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod table;

pub use context::{CancelReason, Context, Handler};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::message::{Message, MessageId, MessageValidationError, NewsId};
pub use repo::message_repo::{
    MessageRepository, OpKey, RepoError, RepoResult, StoreOptions, TableMessageRepository,
};
pub use service::message_service::MessageService;
pub use table::{
    Consistency, ConsistencyTable, MemoryTable, SerialConsistency, SqliteTable, TableError,
    TableResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
