//! In-process consistency table.
//!
//! # Responsibility
//! - Back the store in tests and in the `memory` server backend.
//!
//! # Invariants
//! - Rows and the `news_id` index change under one write lock, so conditional
//!   writes are linearizable and the index never lags the rows.
//! - Consistency levels are accepted and ignored: there is a single replica.

use super::{Consistency, ConsistencyTable, SerialConsistency, TableError, TableResult};
use crate::context::Context;
use crate::model::message::{Message, MessageId, NewsId};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Rows {
    by_id: BTreeMap<MessageId, Message>,
    by_news_id: BTreeMap<NewsId, BTreeSet<MessageId>>,
}

impl Rows {
    fn put(&mut self, message: &Message) {
        if let Some(previous) = self.by_id.insert(message.id, message.clone()) {
            self.unindex(previous.news_id, previous.id);
        }
        self.by_news_id
            .entry(message.news_id)
            .or_default()
            .insert(message.id);
    }

    fn remove(&mut self, id: MessageId) {
        if let Some(previous) = self.by_id.remove(&id) {
            self.unindex(previous.news_id, id);
        }
    }

    fn unindex(&mut self, news_id: NewsId, id: MessageId) {
        if let Some(ids) = self.by_news_id.get_mut(&news_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_news_id.remove(&news_id);
            }
        }
    }
}

/// Single-replica table kept in memory.
#[derive(Debug, Default)]
pub struct MemoryTable {
    rows: RwLock<Rows>,
    closed: AtomicBool,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> TableResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TableError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ConsistencyTable for MemoryTable {
    async fn get(
        &self,
        _ctx: &Context,
        id: MessageId,
        _consistency: Consistency,
    ) -> TableResult<Option<Message>> {
        self.ensure_open()?;
        Ok(self.rows.read().await.by_id.get(&id).cloned())
    }

    async fn find_by_news_id(
        &self,
        _ctx: &Context,
        news_id: NewsId,
        _consistency: Consistency,
    ) -> TableResult<Vec<Message>> {
        self.ensure_open()?;
        let rows = self.rows.read().await;
        let Some(ids) = rows.by_news_id.get(&news_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| rows.by_id.get(id).cloned())
            .collect())
    }

    async fn scan(&self, _ctx: &Context, _consistency: Consistency) -> TableResult<Vec<Message>> {
        self.ensure_open()?;
        Ok(self.rows.read().await.by_id.values().cloned().collect())
    }

    async fn max_id(
        &self,
        _ctx: &Context,
        _consistency: Consistency,
    ) -> TableResult<Option<MessageId>> {
        self.ensure_open()?;
        Ok(self.rows.read().await.by_id.keys().next_back().copied())
    }

    async fn insert_if_absent(
        &self,
        _ctx: &Context,
        message: &Message,
        _serial: SerialConsistency,
    ) -> TableResult<bool> {
        self.ensure_open()?;
        let mut rows = self.rows.write().await;
        if rows.by_id.contains_key(&message.id) {
            return Ok(false);
        }
        rows.put(message);
        Ok(true)
    }

    async fn update_if_present(
        &self,
        _ctx: &Context,
        message: &Message,
        _serial: SerialConsistency,
    ) -> TableResult<bool> {
        self.ensure_open()?;
        let mut rows = self.rows.write().await;
        if !rows.by_id.contains_key(&message.id) {
            return Ok(false);
        }
        rows.put(message);
        Ok(true)
    }

    async fn delete(
        &self,
        _ctx: &Context,
        id: MessageId,
        _consistency: Consistency,
    ) -> TableResult<()> {
        self.ensure_open()?;
        self.rows.write().await.remove(id);
        Ok(())
    }

    async fn close(&self) -> TableResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryTable;
    use crate::context::Context;
    use crate::model::message::Message;
    use crate::table::{Consistency, ConsistencyTable, SerialConsistency, TableError};

    #[tokio::test]
    async fn update_moves_row_between_news_index_entries() {
        let table = MemoryTable::new();
        let ctx = Context::background();

        let message = Message::with_id(1, 10, "first");
        assert!(table
            .insert_if_absent(&ctx, &message, SerialConsistency::Serial)
            .await
            .unwrap());

        let moved = Message::with_id(1, 20, "moved");
        assert!(table
            .update_if_present(&ctx, &moved, SerialConsistency::Serial)
            .await
            .unwrap());

        let old = table
            .find_by_news_id(&ctx, 10, Consistency::Quorum)
            .await
            .unwrap();
        let new = table
            .find_by_news_id(&ctx, 20, Consistency::Quorum)
            .await
            .unwrap();
        assert!(old.is_empty());
        assert_eq!(new, vec![moved]);
    }

    #[tokio::test]
    async fn conditional_writes_report_not_applied() {
        let table = MemoryTable::new();
        let ctx = Context::background();
        let message = Message::with_id(3, 1, "x");

        assert!(!table
            .update_if_present(&ctx, &message, SerialConsistency::Serial)
            .await
            .unwrap());
        assert!(table
            .insert_if_absent(&ctx, &message, SerialConsistency::Serial)
            .await
            .unwrap());
        assert!(!table
            .insert_if_absent(&ctx, &message, SerialConsistency::Serial)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn max_id_tracks_largest_key() {
        let table = MemoryTable::new();
        let ctx = Context::background();
        assert_eq!(table.max_id(&ctx, Consistency::Quorum).await.unwrap(), None);

        for id in [4, 9, 2] {
            let message = Message::with_id(id, 1, "x");
            table
                .insert_if_absent(&ctx, &message, SerialConsistency::Serial)
                .await
                .unwrap();
        }
        assert_eq!(
            table.max_id(&ctx, Consistency::Quorum).await.unwrap(),
            Some(9)
        );
    }

    #[tokio::test]
    async fn closed_table_rejects_calls() {
        let table = MemoryTable::new();
        let ctx = Context::background();
        table.close().await.unwrap();
        table.close().await.unwrap();

        let err = table.scan(&ctx, Consistency::Quorum).await.unwrap_err();
        assert!(matches!(err, TableError::Closed));
    }
}
