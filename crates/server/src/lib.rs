//! Cartfold server library.
//!
//! This crate provides the cart engine as a library, allowing it to be
//! tested and reused; the binary in `main.rs` is a thin shell around it.
//!
//! # Architecture
//!
//! - [`identity`] resolves a stable owner (guest token or user id) per request
//! - [`store`] holds the durable `(owner, variant) -> quantity` association
//! - [`catalog`] hydrates items with product name, price, and stock
//! - [`cart`] coordinates mutations and the guest-to-user merge
//! - [`resilience`] wraps the cart service with deadlines, retries, and a circuit
//! - [`sync`] is the pure client-side mirror state machine
//! - [`routes`] is the JSON HTTP surface

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod resilience;
pub mod routes;
pub mod state;
pub mod store;
pub mod sync;
