use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::{OwnedSemaphorePermit, Semaphore},
};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    backend::QueryBackend,
    dispatch::Dispatcher,
    protocol::{ParsedLine, parse_request, read_request_line, write_response},
};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server<B> {
    listener: TcpListener,
    dispatcher: Dispatcher<B>,
    limit: Option<Arc<Semaphore>>,
}

impl<B: QueryBackend> Server<B> {
    pub fn new(listener: TcpListener, dispatcher: Dispatcher<B>) -> Self {
        Self {
            listener,
            dispatcher,
            limit: None,
        }
    }

    /// Caps the number of live sessions. Further connections wait in the
    /// listen backlog until a session ends.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.limit = Some(Arc::new(Semaphore::new(max.min(Semaphore::MAX_PERMITS))));
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves. Sessions already running
    /// are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            dispatcher,
            limit,
        } = self;
        tokio::pin!(shutdown);

        loop {
            let permit = match &limit {
                Some(semaphore) => select! {
                    _ = &mut shutdown => break,
                    permit = Arc::clone(semaphore).acquire_owned() => Some(permit?),
                },
                None => None,
            };

            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &dispatcher, permit).await;
                }
            }
        }

        info!("socketmap bridge shutting down");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_accept_result<B: QueryBackend>(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    dispatcher: &Dispatcher<B>,
    permit: Option<OwnedSemaphorePermit>,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, dispatcher, permit),
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            tokio::time::sleep(ACCEPT_BACKOFF).await;
        }
    }
}

fn spawn_session<B: QueryBackend>(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: &Dispatcher<B>,
    permit: Option<OwnedSemaphorePermit>,
) {
    let dispatcher = dispatcher.clone();
    let span = info_span!("session", %peer);
    tokio::spawn(
        async move {
            debug!("connection opened");
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            match serve_connection(&mut reader, &mut writer, &dispatcher).await {
                Ok(()) => debug!("connection closed"),
                Err(err) => debug!(error = ?err, "connection closed with error"),
            }
            drop(permit);
        }
        .instrument(span),
    );
}

/// Runs the request loop for one client until it disconnects.
///
/// Requests are handled strictly in order: each response is written and
/// flushed before the next line is read.
pub async fn serve_connection<R, W, B>(
    reader: &mut R,
    writer: &mut W,
    dispatcher: &Dispatcher<B>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    B: QueryBackend,
{
    let mut line = String::new();
    while read_request_line(reader, &mut line).await? {
        let request = match parse_request(&line) {
            ParsedLine::Skip => continue,
            ParsedLine::Malformed => {
                warn!(line = line.trim(), "ignoring malformed request");
                continue;
            }
            ParsedLine::Request(request) => request,
        };

        let response = dispatcher.dispatch(request).await;
        debug!(
            selector = request.selector,
            key = request.key,
            %response,
            "lookup answered"
        );
        write_response(writer, &response).await?;
    }

    Ok(())
}
