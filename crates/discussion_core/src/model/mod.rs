//! Domain model for discussion messages.
//!
//! # Responsibility
//! - Define the canonical message record shared by store, service and transport.
//! - Own field-level preconditions that every write path must enforce.
//!
//! # Invariants
//! - Every stored message is identified by a unique, immutable `MessageId`.
//! - A stored message always references a non-zero `NewsId`.

pub mod message;
