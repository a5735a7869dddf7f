//! SQLite-backed consistency table.
//!
//! # Responsibility
//! - Provide a durable single-node table for the `sqlite` server backend.
//! - Express conditional writes as row-count checked statements.
//!
//! # Invariants
//! - All statements run on the blocking pool behind one connection mutex, so
//!   conditional writes are linearizable.
//! - The `idx_messages_news_id` index is maintained by SQLite itself.
//! - Consistency levels are accepted and ignored.

use super::{Consistency, ConsistencyTable, SerialConsistency, TableError, TableResult};
use crate::context::Context;
use crate::db::{open_db, open_db_in_memory};
use crate::model::message::{Message, MessageId, NewsId};
use async_trait::async_trait;
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MESSAGE_SELECT_SQL: &str = "SELECT id, news_id, country, content FROM messages";

/// Table over one migrated SQLite connection.
#[derive(Clone)]
pub struct SqliteTable {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteTable {
    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> TableResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> TableResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    async fn with_conn<T, F>(&self, op: F) -> TableResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> TableResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| TableError::Unavailable("connection lock poisoned".to_string()))?;
            let conn = guard.as_ref().ok_or(TableError::Closed)?;
            op(conn)
        })
        .await
        .map_err(|err| TableError::Unavailable(format!("blocking worker failed: {err}")))?
    }
}

#[async_trait]
impl ConsistencyTable for SqliteTable {
    async fn get(
        &self,
        _ctx: &Context,
        id: MessageId,
        _consistency: Consistency,
    ) -> TableResult<Option<Message>> {
        self.with_conn(move |conn| {
            let message = conn
                .query_row(
                    &format!("{MESSAGE_SELECT_SQL} WHERE id = ?1;"),
                    [id],
                    parse_message_row,
                )
                .optional()?;
            message.map(checked_message).transpose()
        })
        .await
    }

    async fn find_by_news_id(
        &self,
        _ctx: &Context,
        news_id: NewsId,
        _consistency: Consistency,
    ) -> TableResult<Vec<Message>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("{MESSAGE_SELECT_SQL} WHERE news_id = ?1;"))?;
            let rows = stmt.query_map([news_id], parse_message_row)?;
            collect_messages(rows)
        })
        .await
    }

    async fn scan(&self, _ctx: &Context, _consistency: Consistency) -> TableResult<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{MESSAGE_SELECT_SQL};"))?;
            let rows = stmt.query_map([], parse_message_row)?;
            collect_messages(rows)
        })
        .await
    }

    async fn max_id(
        &self,
        _ctx: &Context,
        _consistency: Consistency,
    ) -> TableResult<Option<MessageId>> {
        self.with_conn(|conn| {
            let max = conn.query_row("SELECT MAX(id) FROM messages;", [], |row| {
                row.get::<_, Option<MessageId>>(0)
            })?;
            Ok(max)
        })
        .await
    }

    async fn insert_if_absent(
        &self,
        _ctx: &Context,
        message: &Message,
        _serial: SerialConsistency,
    ) -> TableResult<bool> {
        let message = message.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT INTO messages (id, news_id, country, content)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO NOTHING;",
                params![
                    message.id,
                    message.news_id,
                    message.country.as_deref(),
                    message.content.as_str(),
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn update_if_present(
        &self,
        _ctx: &Context,
        message: &Message,
        _serial: SerialConsistency,
    ) -> TableResult<bool> {
        let message = message.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET
                    news_id = ?2,
                    country = ?3,
                    content = ?4
                 WHERE id = ?1;",
                params![
                    message.id,
                    message.news_id,
                    message.country.as_deref(),
                    message.content.as_str(),
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn delete(
        &self,
        _ctx: &Context,
        id: MessageId,
        _consistency: Consistency,
    ) -> TableResult<()> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1;", [id])?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> TableResult<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| TableError::Unavailable("connection lock poisoned".to_string()))?;
            if let Some(conn) = guard.take() {
                conn.close().map_err(|(_, err)| TableError::from(err))?;
                info!("event=table_close module=table status=ok backend=sqlite");
            }
            Ok(())
        })
        .await
        .map_err(|err| TableError::Unavailable(format!("blocking worker failed: {err}")))?
    }
}

fn parse_message_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get("id")?,
        news_id: row.get("news_id")?,
        country: row.get("country")?,
        content: row.get("content")?,
    })
}

fn checked_message(message: Message) -> TableResult<Message> {
    if message.validate().is_err() {
        return Err(TableError::InvalidData(format!(
            "message {} has zero news_id",
            message.id
        )));
    }
    Ok(message)
}

fn collect_messages(
    rows: impl Iterator<Item = rusqlite::Result<Message>>,
) -> TableResult<Vec<Message>> {
    let mut messages = Vec::new();
    for row in rows {
        messages.push(checked_message(row?)?);
    }
    Ok(messages)
}
