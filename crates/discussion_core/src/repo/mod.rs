//! Repository layer: the message store.
//!
//! # Responsibility
//! - Define the store contract consumed by services.
//! - Implement it on top of any [`crate::table::ConsistencyTable`].
//!
//! # Invariants
//! - Repository writes enforce `Message::validate()` before touching the table.
//! - "Not found" is a value (`None`, empty `Vec`), never an error.

pub mod message_repo;
