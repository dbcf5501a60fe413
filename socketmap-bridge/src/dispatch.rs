//! Turns a parsed request into exactly one response.
//!
//! The dispatcher resolves the selector, runs the backend lookup under a
//! deadline, and maps the outcome through the table's [`StatusPolicy`].
//! Backend failures are logged here and never reach the client verbatim.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::{
    backend::{Query, QueryBackend, Scalar},
    protocol::{Request, Response, SERVICE_UNAVAILABLE},
    tables::{self, ResultKind, StatusPolicy, TableDescriptor},
};

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error("column {column} holds a {found} value, expected {expected}")]
    KindMismatch {
        column: &'static str,
        expected: ResultKind,
        found: &'static str,
    },
    #[error("column {column} holds a line break and cannot be sent as one response line")]
    UnsafeValue { column: &'static str },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug)]
pub enum QueryOutcome {
    Found(Scalar),
    NotFound,
    Failed(LookupError),
}

pub struct Dispatcher<B> {
    backend: Arc<B>,
    timeout: Duration,
}

impl<B> Clone for Dispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            timeout: self.timeout,
        }
    }
}

impl<B: QueryBackend> Dispatcher<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Answers one request. Unknown selectors never reach the backend.
    pub async fn dispatch(&self, request: Request<'_>) -> Response {
        let Some(table) = tables::route(request.selector) else {
            debug!(selector = request.selector, "unknown table selector");
            return Response::NotFound;
        };

        let outcome = self.query(table, request.key).await;
        if let QueryOutcome::Failed(error) = &outcome {
            warn!(table = table.table, key = request.key, %error, "lookup failed");
        }
        respond(table, outcome)
    }

    /// Runs the backend lookup for `key` and checks the value's shape.
    pub async fn query(&self, table: &TableDescriptor, key: &str) -> QueryOutcome {
        let deadline = Instant::now() + self.timeout;
        let query = Query {
            table: table.table,
            key_column: table.key_column,
            result_column: table.result_column,
            key,
            deadline,
        };

        match timeout_at(deadline, self.backend.lookup(&query)).await {
            Err(_) => QueryOutcome::Failed(LookupError::Timeout(self.timeout)),
            Ok(Err(error)) => QueryOutcome::Failed(LookupError::Backend(error)),
            Ok(Ok(None)) => QueryOutcome::NotFound,
            Ok(Ok(Some(scalar))) => check_kind(table, scalar),
        }
    }
}

fn check_kind(table: &TableDescriptor, scalar: Scalar) -> QueryOutcome {
    let expected_shape = matches!(
        (table.kind, &scalar),
        (ResultKind::Flag, Scalar::Bool(_)) | (ResultKind::Value, Scalar::Text(_))
    );
    if !expected_shape {
        return QueryOutcome::Failed(LookupError::KindMismatch {
            column: table.result_column,
            expected: table.kind,
            found: scalar.type_name(),
        });
    }
    // A line break in the value would split the reply and desynchronise the MTA.
    if let Scalar::Text(text) = &scalar {
        if text.contains(['\n', '\r']) {
            return QueryOutcome::Failed(LookupError::UnsafeValue {
                column: table.result_column,
            });
        }
    }
    QueryOutcome::Found(scalar)
}

fn respond(table: &TableDescriptor, outcome: QueryOutcome) -> Response {
    match (table.policy, outcome) {
        (StatusPolicy::Standard, QueryOutcome::Found(Scalar::Bool(true))) => Response::Ok,
        (StatusPolicy::Standard, QueryOutcome::Found(Scalar::Bool(false)))
        | (StatusPolicy::Standard, QueryOutcome::NotFound) => Response::NotFound,
        (StatusPolicy::Standard, QueryOutcome::Found(Scalar::Text(value))) => {
            Response::OkValue(value)
        }
        (StatusPolicy::Standard, QueryOutcome::Failed(_)) => Response::TempFail,
        (StatusPolicy::Access, QueryOutcome::Found(Scalar::Text(action))) => {
            Response::Action(action)
        }
        (StatusPolicy::Access, QueryOutcome::NotFound) => Response::Dunno,
        (StatusPolicy::Access, QueryOutcome::Found(Scalar::Bool(_)))
        | (StatusPolicy::Access, QueryOutcome::Failed(_)) => {
            Response::DeferIfPermit(SERVICE_UNAVAILABLE.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;

    enum Reply {
        Row(Scalar),
        Missing,
        Broken,
        Hang,
    }

    struct StubBackend {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl StubBackend {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl QueryBackend for StubBackend {
        async fn lookup(&self, _query: &Query<'_>) -> anyhow::Result<Option<Scalar>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Reply::Row(scalar) => Ok(Some(scalar.clone())),
                Reply::Missing => Ok(None),
                Reply::Broken => Err(anyhow!("connection reset by keyspace")),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(None)
                }
            }
        }
    }

    async fn answer(reply: Reply, selector: &str) -> Response {
        let dispatcher = Dispatcher::new(StubBackend::new(reply));
        dispatcher
            .dispatch(Request {
                selector,
                key: "key@example.com",
            })
            .await
    }

    #[tokio::test]
    async fn flag_tables_follow_the_active_column() {
        for selector in ["domains", "users", "relay_domains"] {
            assert_eq!(answer(Reply::Row(Scalar::Bool(true)), selector).await, Response::Ok);
            assert_eq!(
                answer(Reply::Row(Scalar::Bool(false)), selector).await,
                Response::NotFound
            );
            assert_eq!(answer(Reply::Missing, selector).await, Response::NotFound);
            assert_eq!(answer(Reply::Broken, selector).await, Response::TempFail);
        }
    }

    #[tokio::test]
    async fn value_tables_return_the_stored_value() {
        for selector in ["virtual_aliases", "transport_maps"] {
            assert_eq!(
                answer(Reply::Row(Scalar::Text("smtp:[mx.example]".into())), selector).await,
                Response::OkValue("smtp:[mx.example]".into())
            );
            assert_eq!(answer(Reply::Missing, selector).await, Response::NotFound);
            assert_eq!(answer(Reply::Broken, selector).await, Response::TempFail);
        }
    }

    #[tokio::test]
    async fn access_maps_defer_instead_of_failing() {
        assert_eq!(
            answer(Reply::Row(Scalar::Text("REJECT known spammer".into())), "access_maps").await,
            Response::Action("REJECT known spammer".into())
        );
        assert_eq!(answer(Reply::Missing, "access_maps").await, Response::Dunno);
        assert_eq!(
            answer(Reply::Broken, "access_maps").await,
            Response::DeferIfPermit(SERVICE_UNAVAILABLE.into())
        );
    }

    #[tokio::test]
    async fn wrongly_typed_values_are_failures() {
        assert_eq!(
            answer(Reply::Row(Scalar::Text("yes".into())), "domains").await,
            Response::TempFail
        );
        assert_eq!(
            answer(Reply::Row(Scalar::Bool(true)), "virtual_aliases").await,
            Response::TempFail
        );
        assert_eq!(
            answer(Reply::Row(Scalar::Bool(true)), "access_maps").await,
            Response::DeferIfPermit(SERVICE_UNAVAILABLE.into())
        );
    }

    #[tokio::test]
    async fn values_with_line_breaks_are_failures() {
        for selector in ["virtual_aliases", "transport_maps"] {
            assert_eq!(
                answer(Reply::Row(Scalar::Text("evil\nOK".into())), selector).await,
                Response::TempFail
            );
        }
        assert_eq!(
            answer(Reply::Row(Scalar::Text("REJECT\r\nOK".into())), "access_maps").await,
            Response::DeferIfPermit(SERVICE_UNAVAILABLE.into())
        );

        let dispatcher = Dispatcher::new(StubBackend::new(Reply::Row(Scalar::Text(
            "relay\rsmtp:".into(),
        ))));
        let table = tables::route("transport_maps").expect("transport_maps table");
        let outcome = dispatcher.query(table, "partner.example").await;
        assert!(matches!(
            outcome,
            QueryOutcome::Failed(LookupError::UnsafeValue { column: "transport" })
        ));
    }

    #[tokio::test]
    async fn unknown_selector_skips_the_backend() {
        let backend = StubBackend::new(Reply::Row(Scalar::Bool(true)));
        let dispatcher = Dispatcher::new(Arc::clone(&backend));

        let response = dispatcher
            .dispatch(Request {
                selector: "bogus_table",
                key: "somekey",
            })
            .await;

        assert_eq!(response, Response::NotFound);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookups_time_out() {
        let dispatcher = Dispatcher::new(StubBackend::new(Reply::Hang));
        let table = tables::route("users").expect("users table");

        let outcome = dispatcher.query(table, "alice@example.com").await;
        assert!(matches!(
            outcome,
            QueryOutcome::Failed(LookupError::Timeout(limit)) if limit == DEFAULT_LOOKUP_TIMEOUT
        ));

        let access = Dispatcher::new(StubBackend::new(Reply::Hang))
            .with_timeout(Duration::from_millis(250))
            .dispatch(Request {
                selector: "access_maps",
                key: "spammer@bad.tld",
            })
            .await;
        assert_eq!(access, Response::DeferIfPermit(SERVICE_UNAVAILABLE.into()));
    }
}
