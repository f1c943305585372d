//! `cartsync-core`: foundation building blocks shared by the cart crates.
//!
//! This crate contains **pure** primitives (no IO, no async, no storage).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{OrderId, UserId};
