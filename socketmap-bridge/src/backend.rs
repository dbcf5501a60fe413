//! The lookup capability the bridge needs from its data store.
//!
//! A backend answers one question: "what is `result_column` in the row of
//! `table` whose `key_column` equals `key`?". Session setup, authentication
//! and pooling belong to the implementation. The dispatcher owns the
//! deadline and cancels the returned future once it passes.

use std::future::Future;

use anyhow::Result;
use tokio::time::Instant;

/// Scalar read from the result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Bool(bool),
    Text(String),
}

impl Scalar {
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Bool(_) => "boolean",
            Scalar::Text(_) => "text",
        }
    }
}

/// Single-column point lookup.
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    pub table: &'a str,
    pub key_column: &'a str,
    pub result_column: &'a str,
    pub key: &'a str,
    pub deadline: Instant,
}

/// Read-only store shared by every connection.
///
/// `Ok(None)` means no matching row (or an unset column); `Err` is any
/// failure to answer and is reported to the MTA as a temporary failure.
pub trait QueryBackend: Send + Sync + 'static {
    fn lookup(&self, query: &Query<'_>) -> impl Future<Output = Result<Option<Scalar>>> + Send;
}
