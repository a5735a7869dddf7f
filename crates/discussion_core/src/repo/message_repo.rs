//! Message store: create/read/update/delete protocol over a consistency table.
//!
//! # Responsibility
//! - Allocate ids without a central sequence (`max(id) + 1`, advisory only).
//! - Guard uniqueness and replacement with conditional writes.
//! - Re-read every successful write and report disagreement as an integrity
//!   anomaly, distinct from not-found.
//!
//! # Invariants
//! - No table call is made for a message that fails `Message::validate()`.
//! - The conditional insert, not the allocation or the pre-check, decides
//!   which of two racing creators owns an id.
//! - Every table call races the operation context; cancellation is reported,
//!   never swallowed.
//! - The store never retries. `upsert` falling back to `create` is a semantic
//!   fallback, not a retry.

use crate::context::{CancelReason, Context};
use crate::model::message::{Message, MessageId, MessageValidationError, NewsId};
use crate::table::{Consistency, ConsistencyTable, SerialConsistency, TableError, TableResult};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

pub type RepoResult<T> = Result<T, RepoError>;

/// Key an operation was addressing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKey {
    Id(MessageId),
    NewsId(NewsId),
    Table,
}

impl Display for OpKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id={id}"),
            Self::NewsId(news_id) => write!(f, "news_id={news_id}"),
            Self::Table => write!(f, "table"),
        }
    }
}

/// Errors from message store operations.
#[derive(Debug)]
pub enum RepoError {
    /// Caller input violates a precondition. Never retried.
    Validation(MessageValidationError),
    /// The id is already taken. The caller may retry with a fresh id.
    Conflict(MessageId),
    /// A write applied but the verification read disagrees with it.
    Integrity { op: &'static str, id: MessageId },
    /// The table failed or was unreachable.
    Io {
        op: &'static str,
        key: OpKey,
        source: TableError,
    },
    /// The operation context finished before the table answered.
    Cancelled {
        op: &'static str,
        reason: CancelReason,
    },
    /// `max(id) + 1` does not fit in a message id.
    IdSpaceExhausted,
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Conflict(id) => write!(f, "message with id {id} already exists"),
            Self::Integrity { op, id } => write!(
                f,
                "{op} verification failed for message {id}: stored record does not match the write"
            ),
            // Native backend text stays behind `source()`.
            Self::Io { op, key, source } => {
                write!(f, "{op} failed ({key}): {}", source.category())
            }
            Self::Cancelled { op, reason } => write!(f, "{op} aborted: {reason}"),
            Self::IdSpaceExhausted => write!(f, "message id space exhausted"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<MessageValidationError> for RepoError {
    fn from(value: MessageValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Consistency levels the store requests from the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub read: Consistency,
    pub write: Consistency,
    pub conditional: SerialConsistency,
}

/// Store contract consumed by the message service.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Stores a new message, allocating an id when `message.id == 0`.
    ///
    /// The allocated id is written back to `message` even when a later step
    /// fails.
    async fn create(&self, ctx: &Context, message: &mut Message) -> RepoResult<()>;
    /// `None` when nothing is stored under `id`.
    async fn find_by_id(&self, ctx: &Context, id: MessageId) -> RepoResult<Option<Message>>;
    /// Unordered; empty when the news item has no messages.
    async fn find_by_news_id(&self, ctx: &Context, news_id: NewsId) -> RepoResult<Vec<Message>>;
    /// Conditionally replaces an existing message. Returns whether it applied.
    async fn replace(&self, ctx: &Context, message: &Message) -> RepoResult<bool>;
    /// Replaces an existing message, or creates it when absent.
    async fn upsert(&self, ctx: &Context, message: &mut Message) -> RepoResult<()>;
    /// Idempotent delete.
    async fn delete(&self, ctx: &Context, id: MessageId) -> RepoResult<()>;
    /// Unordered; empty on an empty table.
    async fn find_all(&self, ctx: &Context) -> RepoResult<Vec<Message>>;
}

/// Message store over a shared consistency table handle.
#[derive(Clone)]
pub struct TableMessageRepository {
    table: Arc<dyn ConsistencyTable>,
    options: StoreOptions,
}

impl TableMessageRepository {
    /// Uses quorum reads/writes and serial conditional writes.
    pub fn new(table: Arc<dyn ConsistencyTable>) -> Self {
        Self::with_options(table, StoreOptions::default())
    }

    pub fn with_options(table: Arc<dyn ConsistencyTable>, options: StoreOptions) -> Self {
        Self { table, options }
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Advisory id allocation: table-wide `max(id) + 1`, `1` when empty.
    ///
    /// Not linearizable with concurrent creators; the conditional insert
    /// arbitrates collisions.
    async fn allocate_id(&self, ctx: &Context) -> RepoResult<MessageId> {
        let max = guarded(
            ctx,
            "allocate_id",
            OpKey::Table,
            self.table.max_id(ctx, self.options.read),
        )
        .await?;
        max.unwrap_or(0)
            .checked_add(1)
            .ok_or(RepoError::IdSpaceExhausted)
    }

    async fn read(
        &self,
        ctx: &Context,
        op: &'static str,
        id: MessageId,
    ) -> RepoResult<Option<Message>> {
        guarded(
            ctx,
            op,
            OpKey::Id(id),
            self.table.get(ctx, id, self.options.read),
        )
        .await
    }

    /// Re-reads `expected.id` and checks the stored `news_id`.
    async fn verify(&self, ctx: &Context, op: &'static str, expected: &Message) -> RepoResult<()> {
        let stored = self.read(ctx, op, expected.id).await?;
        match stored {
            Some(stored) if stored.news_id == expected.news_id => Ok(()),
            other => {
                warn!(
                    "event=message_verify module=repo status=mismatch op={} id={} expected_news_id={} found_news_id={}",
                    op,
                    expected.id,
                    expected.news_id,
                    other
                        .map(|message| message.news_id.to_string())
                        .unwrap_or_else(|| "none".to_string())
                );
                Err(RepoError::Integrity {
                    op,
                    id: expected.id,
                })
            }
        }
    }

    async fn create_checked(&self, ctx: &Context, message: &mut Message) -> RepoResult<()> {
        if message.needs_id() {
            message.id = self.allocate_id(ctx).await?;
            debug!(
                "event=message_allocate module=repo status=ok id={}",
                message.id
            );
        }

        if self.read(ctx, "create", message.id).await?.is_some() {
            return Err(RepoError::Conflict(message.id));
        }

        let applied = guarded(
            ctx,
            "create",
            OpKey::Id(message.id),
            self.table
                .insert_if_absent(ctx, message, self.options.conditional),
        )
        .await?;
        if !applied {
            // Lost the race between pre-check and insert.
            return Err(RepoError::Conflict(message.id));
        }

        self.verify(ctx, "create", message).await
    }
}

#[async_trait]
impl MessageRepository for TableMessageRepository {
    async fn create(&self, ctx: &Context, message: &mut Message) -> RepoResult<()> {
        message.validate()?;
        let started_at = Instant::now();
        let result = self.create_checked(ctx, message).await;
        log_write("create", message, &result, started_at);
        result
    }

    async fn find_by_id(&self, ctx: &Context, id: MessageId) -> RepoResult<Option<Message>> {
        let found = self.read(ctx, "find_by_id", id).await?;
        debug!(
            "event=message_get module=repo status=ok id={} found={}",
            id,
            found.is_some()
        );
        Ok(found)
    }

    async fn find_by_news_id(&self, ctx: &Context, news_id: NewsId) -> RepoResult<Vec<Message>> {
        let messages = guarded(
            ctx,
            "find_by_news_id",
            OpKey::NewsId(news_id),
            self.table.find_by_news_id(ctx, news_id, self.options.read),
        )
        .await?;
        debug!(
            "event=message_list module=repo status=ok news_id={} count={}",
            news_id,
            messages.len()
        );
        Ok(messages)
    }

    async fn replace(&self, ctx: &Context, message: &Message) -> RepoResult<bool> {
        message.validate()?;
        let applied = guarded(
            ctx,
            "replace",
            OpKey::Id(message.id),
            self.table
                .update_if_present(ctx, message, self.options.conditional),
        )
        .await?;
        if applied {
            self.verify(ctx, "replace", message).await?;
        }
        Ok(applied)
    }

    async fn upsert(&self, ctx: &Context, message: &mut Message) -> RepoResult<()> {
        message.validate()?;
        let started_at = Instant::now();
        let result = match self.replace(ctx, message).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                info!(
                    "event=message_upsert module=repo status=fallback_create id={}",
                    message.id
                );
                self.create_checked(ctx, message).await
            }
            Err(err) => Err(err),
        };
        log_write("upsert", message, &result, started_at);
        result
    }

    async fn delete(&self, ctx: &Context, id: MessageId) -> RepoResult<()> {
        guarded(
            ctx,
            "delete",
            OpKey::Id(id),
            self.table.delete(ctx, id, self.options.write),
        )
        .await?;
        info!("event=message_delete module=repo status=ok id={id}");
        Ok(())
    }

    async fn find_all(&self, ctx: &Context) -> RepoResult<Vec<Message>> {
        let messages = guarded(
            ctx,
            "find_all",
            OpKey::Table,
            self.table.scan(ctx, self.options.read),
        )
        .await?;
        debug!(
            "event=message_list module=repo status=ok scope=all count={}",
            messages.len()
        );
        Ok(messages)
    }
}

/// Runs one table call under `ctx` and lifts its error into store vocabulary.
async fn guarded<T>(
    ctx: &Context,
    op: &'static str,
    key: OpKey,
    call: impl Future<Output = TableResult<T>>,
) -> RepoResult<T> {
    match ctx.run(call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => {
            warn!("event=table_call module=repo status=error op={op} {key} error={source}");
            Err(RepoError::Io { op, key, source })
        }
        Err(reason) => Err(RepoError::Cancelled { op, reason }),
    }
}

fn log_write(op: &'static str, message: &Message, result: &RepoResult<()>, started_at: Instant) {
    let duration_ms = started_at.elapsed().as_millis();
    match result {
        Ok(()) => info!(
            "event=message_{} module=repo status=ok id={} news_id={} duration_ms={}",
            op, message.id, message.news_id, duration_ms
        ),
        Err(err) => warn!(
            "event=message_{} module=repo status=error id={} news_id={} duration_ms={} error={}",
            op, message.id, message.news_id, duration_ms, err
        ),
    }
}
