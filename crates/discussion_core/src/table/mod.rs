//! Consistency table contract and adapters.
//!
//! # Responsibility
//! - Define the key-value table the message store runs its protocol against.
//! - Keep backend vocabulary (SQL, replicas, locks) behind one trait.
//!
//! # Invariants
//! - Conditional writes are linearizable per key: of two concurrent
//!   conditional writes to one id, at most one reports `applied == true`.
//! - The `news_id` secondary index always mirrors the primary rows; adapters
//!   maintain it, callers never do.
//! - After `close`, every operation fails with [`TableError::Closed`].

use crate::context::Context;
use crate::db::DbError;
use crate::model::message::{Message, MessageId, NewsId};
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryTable;
pub use sqlite::SqliteTable;

pub type TableResult<T> = Result<T, TableError>;

/// Replica agreement required for ordinary reads and writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Consistency {
    One,
    LocalQuorum,
    #[default]
    Quorum,
    All,
}

/// Agreement level for the consensus round of conditional writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SerialConsistency {
    #[default]
    Serial,
    LocalSerial,
}

/// Error for a consistency level that does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownConsistency(pub String);

impl Display for UnknownConsistency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown consistency level `{}`", self.0)
    }
}

impl Error for UnknownConsistency {}

impl FromStr for Consistency {
    type Err = UnknownConsistency;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "one" => Ok(Self::One),
            "local_quorum" => Ok(Self::LocalQuorum),
            "quorum" => Ok(Self::Quorum),
            "all" => Ok(Self::All),
            other => Err(UnknownConsistency(other.to_string())),
        }
    }
}

impl FromStr for SerialConsistency {
    type Err = UnknownConsistency;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "local_serial" => Ok(Self::LocalSerial),
            other => Err(UnknownConsistency(other.to_string())),
        }
    }
}

/// Backend failure reported by a table adapter.
#[derive(Debug)]
pub enum TableError {
    /// The table handle was closed.
    Closed,
    /// Storage engine error.
    Db(DbError),
    /// Backend could not serve the request (lost worker, poisoned lock).
    Unavailable(String),
    /// A stored row cannot be mapped back to a message.
    InvalidData(String),
}

impl Display for TableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "table handle is closed"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Unavailable(details) => write!(f, "table unavailable: {details}"),
            Self::InvalidData(details) => write!(f, "invalid stored message: {details}"),
        }
    }
}

impl TableError {
    /// Backend-neutral description, safe to show outside the store.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Closed => "table closed",
            Self::Db(_) => "storage error",
            Self::Unavailable(_) => "table unavailable",
            Self::InvalidData(_) => "invalid stored data",
        }
    }
}

impl Error for TableError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for TableError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for TableError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Distributed key-value table holding discussion messages.
///
/// Every call receives the operation context. Adapters may use it to skip
/// work that nobody waits for; the store enforces cancellation on its own.
#[async_trait]
pub trait ConsistencyTable: Send + Sync {
    /// Point read by primary key. `None` when no row exists.
    async fn get(
        &self,
        ctx: &Context,
        id: MessageId,
        consistency: Consistency,
    ) -> TableResult<Option<Message>>;

    /// Equality lookup through the `news_id` secondary index. Unordered.
    async fn find_by_news_id(
        &self,
        ctx: &Context,
        news_id: NewsId,
        consistency: Consistency,
    ) -> TableResult<Vec<Message>>;

    /// Full table scan. Unordered.
    async fn scan(&self, ctx: &Context, consistency: Consistency) -> TableResult<Vec<Message>>;

    /// Largest stored id, `None` on an empty table. Costs a full scan.
    async fn max_id(&self, ctx: &Context, consistency: Consistency)
        -> TableResult<Option<MessageId>>;

    /// Inserts `message` only if no row exists at `message.id`.
    ///
    /// Returns whether the write applied.
    async fn insert_if_absent(
        &self,
        ctx: &Context,
        message: &Message,
        serial: SerialConsistency,
    ) -> TableResult<bool>;

    /// Replaces every non-key field only if a row exists at `message.id`.
    ///
    /// Returns whether the write applied.
    async fn update_if_present(
        &self,
        ctx: &Context,
        message: &Message,
        serial: SerialConsistency,
    ) -> TableResult<bool>;

    /// Unconditional delete; absent rows are not an error.
    async fn delete(&self, ctx: &Context, id: MessageId, consistency: Consistency)
        -> TableResult<()>;

    /// Releases the underlying session. Idempotent.
    async fn close(&self) -> TableResult<()>;
}
