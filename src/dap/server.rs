//! Debug-protocol transport: one client connection bound to one session.
//!
//! The reader decodes `Content-Length` frames and spawns a task per request
//! so that a long-running request (reload, terminate) never blocks the
//! next one. A single writer task drains the [`ClientChannel`] and stamps
//! outgoing sequence numbers.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::dap::codec::DapCodec;
use crate::dap::messages::{ClientChannel, Outgoing, Request};
use crate::session::debug_session::{DebugSession, SessionDeps};
use crate::{AppError, Result};

/// How long to wait for queued messages to flush after the client leaves.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve one client over `reader`/`writer` until it disconnects.
///
/// The session is torn down when the client disconnects or the stream
/// ends, whichever comes first.
///
/// # Errors
///
/// Returns `AppError::Io` if the writer fails before the session ends.
pub async fn serve<R, W>(reader: R, writer: W, deps: SessionDeps) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (client, outgoing) = ClientChannel::new();
    let session = DebugSession::new(deps, client);
    let span = info_span!("dap_connection", session_id = %session.id());

    let writer_task = tokio::spawn(run_writer(writer, outgoing).instrument(span.clone()));

    read_requests(reader, &session).instrument(span).await;

    session.teardown().await;
    drop(session);

    match tokio::time::timeout(FLUSH_TIMEOUT, writer_task).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(AppError::Io(format!("writer task failed: {err}"))),
        Err(_) => {
            debug!("client writer did not flush in time");
            Ok(())
        }
    }
}

async fn read_requests<R>(reader: R, session: &Arc<DebugSession>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut frames = FramedRead::new(reader, DapCodec::new());

    while let Some(frame) = frames.next().await {
        let body = match frame {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, "unrecoverable framing error from client");
                break;
            }
        };

        let request: Request = match serde_json::from_str(&body) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "ignoring malformed client message");
                continue;
            }
        };
        if request.kind != "request" {
            debug!(kind = %request.kind, "ignoring non-request client message");
            continue;
        }

        let disconnect = request.command == "disconnect";
        let session = Arc::clone(session);
        let handle = tokio::spawn(async move { session.handle_request(request).await });

        if disconnect {
            if let Err(err) = handle.await {
                warn!(%err, "disconnect handler failed");
            }
            info!("client disconnected");
            return;
        }
    }

    info!("client stream ended");
}

async fn run_writer<W>(writer: W, mut outgoing: mpsc::UnboundedReceiver<Outgoing>) -> Result<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut sink = FramedWrite::new(writer, DapCodec::new());
    let mut seq: i64 = 1;

    while let Some(message) = outgoing.recv().await {
        let body = message.to_json(seq).to_string();
        seq += 1;
        sink.send(body).await?;
    }

    sink.close().await?;
    Ok(())
}

/// Serve one client on the process's stdin/stdout.
///
/// # Errors
///
/// See [`serve`].
pub async fn serve_stdio(deps: SessionDeps) -> Result<()> {
    info!("serving debug adapter on stdio");
    serve(tokio::io::stdin(), tokio::io::stdout(), deps).await
}

/// Accept a single client on `127.0.0.1:port` and serve it.
///
/// # Errors
///
/// Returns `AppError::Io` if the listener cannot bind or accept.
pub async fn serve_tcp(port: u16, deps: SessionDeps) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|err| AppError::Io(format!("failed to bind port {port}: {err}")))?;
    info!(port, "debug adapter listening");

    let (stream, peer) = listener.accept().await?;
    info!(%peer, "client connected");

    let (reader, writer) = stream.into_split();
    serve(reader, writer, deps).await
}
