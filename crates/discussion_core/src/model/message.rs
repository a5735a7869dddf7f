//! Message domain model.
//!
//! # Responsibility
//! - Define the discussion message record and its wire field names.
//! - Provide the `newsId` precondition shared by create and update paths.
//!
//! # Invariants
//! - `id == 0` means "not yet allocated"; stores assign a real id on create.
//! - `news_id` must be non-zero before any write reaches the table.
//! - Referential integrity of `news_id` against news items is not checked here.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Primary key of a discussion message.
pub type MessageId = i64;

/// Identifier of the news item a message belongs to.
pub type NewsId = i64;

/// Sentinel id asking the store to allocate one.
pub const UNASSIGNED_ID: MessageId = 0;

/// Field-level validation failures for [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageValidationError {
    /// `newsId` was zero.
    MissingNewsId,
}

impl Display for MessageValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingNewsId => write!(f, "newsId is required"),
        }
    }
}

impl Error for MessageValidationError {}

/// Discussion message attached to a news item.
///
/// Serialized with camelCase names to match the external API (`newsId`).
/// Missing numeric fields decode as zero so validation, not decoding, reports
/// an absent `newsId`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: MessageId,
    #[serde(default)]
    pub news_id: NewsId,
    /// Always on the wire; `null` when unknown.
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub content: String,
}

impl Message {
    /// Creates a message without an id; the store allocates one on create.
    pub fn new(news_id: NewsId, content: impl Into<String>) -> Self {
        Self::with_id(UNASSIGNED_ID, news_id, content)
    }

    /// Creates a message with a caller-chosen id.
    pub fn with_id(id: MessageId, news_id: NewsId, content: impl Into<String>) -> Self {
        Self {
            id,
            news_id,
            country: None,
            content: content.into(),
        }
    }

    /// Builder-style setter for the optional country.
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// Returns whether the store still has to allocate an id.
    pub fn needs_id(&self) -> bool {
        self.id == UNASSIGNED_ID
    }

    /// Checks write preconditions.
    ///
    /// # Errors
    /// - [`MessageValidationError::MissingNewsId`] when `news_id == 0`.
    pub fn validate(&self) -> Result<(), MessageValidationError> {
        if self.news_id == 0 {
            return Err(MessageValidationError::MissingNewsId);
        }
        Ok(())
    }
}
