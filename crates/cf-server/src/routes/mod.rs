//! Route handlers.

pub mod health;
pub mod tools;
pub mod video;
