//! Core use-case services.
//!
//! # Responsibility
//! - Expose repository operations to transports.
//! - Keep transports decoupled from table and store details.

pub mod message_service;
