//! Socketmap lookup bridge for a mail transfer agent.
//!
//! The MTA keeps a long-lived TCP connection open and sends one lookup per
//! line (`<table> <key>`). Each line is answered with exactly one status line
//! (`OK`, `OK <value>`, `NOTFOUND`, `TEMPFAIL`, `DUNNO`, ...) resolved against
//! a read-only backend. Each module focuses on a concrete responsibility:
//!
//! - [`cli`] parses the process configuration from flags and environment.
//! - [`protocol`] splits request lines and encodes the response vocabulary.
//! - [`tables`] describes the six supported lookup tables.
//! - [`backend`] defines the [`backend::QueryBackend`] capability the core
//!   depends on.
//! - [`snapshot`] is the bundled backend, a keyspace loaded from JSON.
//! - [`dispatch`] runs a lookup under a deadline and applies each table's
//!   status policy.
//! - [`server`] accepts TCP connections and drives one session per client.

pub mod backend;
pub mod cli;
pub mod dispatch;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod tables;
