//! Cartfold Core - Shared types library.
//!
//! This crate provides common types used across all Cartfold components:
//! - `server` - The cart engine service (HTTP surface, stores, resilience)
//! - `integration-tests` - Cross-component test harness
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no
//! HTTP clients. This keeps it lightweight and allows it to be used
//! anywhere, including inside the pure client-mirror reducer.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, cart ownership, and prices

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
