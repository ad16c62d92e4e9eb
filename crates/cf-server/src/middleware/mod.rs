//! HTTP middleware: request ID and admission control.

pub mod rate_limit;
pub mod request_id;
