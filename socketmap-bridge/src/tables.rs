//! Static description of the lookup tables the bridge can answer.
//!
//! Every selector maps to one [`TableDescriptor`]: which table and columns to
//! query, what shape the stored value has, and how outcomes become status
//! tokens. The set is fixed at compile time and shared read-only by all
//! sessions.

use std::fmt;

/// Shape of the result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// Boolean `active` flag: true answers `OK`, false answers `NOTFOUND`.
    Flag,
    /// Text payload returned to the caller.
    Value,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultKind::Flag => f.write_str("boolean"),
            ResultKind::Value => f.write_str("text"),
        }
    }
}

/// How absence and failure are reported for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPolicy {
    /// `NOTFOUND` on absence, `TEMPFAIL` on failure.
    Standard,
    /// Sender access checks: the stored action verbatim, `DUNNO` on absence,
    /// `DEFER_IF_PERMIT` on failure so an outage never grants access.
    Access,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDescriptor {
    pub selector: &'static str,
    pub table: &'static str,
    pub key_column: &'static str,
    pub result_column: &'static str,
    pub kind: ResultKind,
    pub policy: StatusPolicy,
}

impl TableDescriptor {
    const fn flag(selector: &'static str, key_column: &'static str) -> Self {
        Self {
            selector,
            table: selector,
            key_column,
            result_column: "active",
            kind: ResultKind::Flag,
            policy: StatusPolicy::Standard,
        }
    }

    const fn value(
        selector: &'static str,
        key_column: &'static str,
        result_column: &'static str,
        policy: StatusPolicy,
    ) -> Self {
        Self {
            selector,
            table: selector,
            key_column,
            result_column,
            kind: ResultKind::Value,
            policy,
        }
    }
}

pub static TABLES: [TableDescriptor; 6] = [
    TableDescriptor::flag("domains", "domain"),
    TableDescriptor::flag("users", "email"),
    TableDescriptor::flag("relay_domains", "domain"),
    TableDescriptor::value(
        "virtual_aliases",
        "alias",
        "destination",
        StatusPolicy::Standard,
    ),
    TableDescriptor::value(
        "transport_maps",
        "address",
        "transport",
        StatusPolicy::Standard,
    ),
    TableDescriptor::value("access_maps", "sender", "action", StatusPolicy::Access),
];

/// Finds the descriptor for a selector. Matching is exact and case-sensitive.
pub fn route(selector: &str) -> Option<&'static TableDescriptor> {
    TABLES.iter().find(|table| table.selector == selector)
}
