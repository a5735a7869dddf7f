//! HTTP transport for the discussion message store.
//!
//! # Responsibility
//! - Load process configuration.
//! - Map REST routes onto `MessageService` calls and store errors onto status
//!   codes.

pub mod api;
pub mod config;
