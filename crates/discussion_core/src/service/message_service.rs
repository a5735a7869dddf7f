//! Message use-case service.
//!
//! # Responsibility
//! - Provide stable CRUD entry points for transports.
//! - Delegate every call 1:1 to the message store.
//!
//! # Invariants
//! - No business rule lives here; results pass through unchanged, including
//!   empty lists.
//! - `update_message` has upsert semantics (see `MessageRepository::upsert`).

use crate::context::Context;
use crate::model::message::{Message, MessageId, NewsId};
use crate::repo::message_repo::{MessageRepository, RepoResult};

/// Use-case service wrapper for message operations.
pub struct MessageService<R: MessageRepository> {
    repo: R,
}

impl<R: MessageRepository> MessageService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates a message; assigns the id back onto `message`.
    pub async fn create_message(&self, ctx: &Context, message: &mut Message) -> RepoResult<()> {
        self.repo.create(ctx, message).await
    }

    pub async fn get_message(&self, ctx: &Context, id: MessageId) -> RepoResult<Option<Message>> {
        self.repo.find_by_id(ctx, id).await
    }

    pub async fn get_messages_by_news_id(
        &self,
        ctx: &Context,
        news_id: NewsId,
    ) -> RepoResult<Vec<Message>> {
        self.repo.find_by_news_id(ctx, news_id).await
    }

    /// Replaces a message, creating it when the id is not stored yet.
    pub async fn update_message(&self, ctx: &Context, message: &mut Message) -> RepoResult<()> {
        self.repo.upsert(ctx, message).await
    }

    pub async fn delete_message(&self, ctx: &Context, id: MessageId) -> RepoResult<()> {
        self.repo.delete(ctx, id).await
    }

    pub async fn get_all_messages(&self, ctx: &Context) -> RepoResult<Vec<Message>> {
        self.repo.find_all(ctx).await
    }
}
