//! cf-core: shared error type and configuration.
//!
//! This crate is the foundational dependency for all other cf-* crates,
//! providing the unified [`Error`] that every pipeline failure funnels into
//! and the JSON-backed application [`config::Config`].

pub mod config;
pub mod error;

pub use error::{Error, Result};
