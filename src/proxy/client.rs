//! The per-client read/parse/route/policy/forward/reply loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::backend::BackendError;
use crate::message::wire::LineScanner;
use crate::message::{parse_command, ParseError};
use crate::policy;
use crate::proxy::{ListenerId, Proxy};

/// How often a blocked read wakes up to observe cancellation, idle expiry,
/// and deconfiguration.
const READ_TICK: Duration = Duration::from_millis(100);

/// Error type for a single proxied client connection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Service one accepted client connection until it disconnects, idles out,
/// is deconfigured, or fails.
pub(crate) async fn serve(
    proxy: Arc<Proxy>,
    listener: ListenerId,
    stream: TcpStream,
    remote: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), ClientError> {
    let (read_half, write_half) = stream.into_split();
    let mut scanner = LineScanner::lines(read_half);
    let mut out = BufWriter::new(write_half);

    // Updated at the bottom of the loop.
    let mut idle_since = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        // Impose the configured maximum idle time.
        if idle_since.elapsed() >= proxy.current_config().effective_max_idle() {
            tracing::debug!(client = %remote, "dropping idle connection");
            return Ok(());
        }

        // Short read deadline so the checks above run even on a silent
        // connection. A tick that interrupts a partial line discards it;
        // the client must resend the whole line.
        let line = match tokio::time::timeout(READ_TICK, scanner.scan()).await {
            Err(_) => {
                scanner.reset();
                continue;
            }
            Ok(Ok(None)) => return Ok(()),
            Ok(Ok(Some(line))) => line,
            Ok(Err(error)) => return Err(error.into()),
        };
        let received = Instant::now();

        // Ignore empty lines.
        if line.is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(error) => {
                // The input is unintelligible; nothing can be echoed back
                // safely, so hang up without a reply.
                tracing::debug!(client = %remote, %error, "could not parse message");
                return Err(error.into());
            }
        };

        // Look up the route on each incoming message. This prevents old
        // connections from retaining stale policies.
        let Some((backend, policies)) = proxy.route_snapshot(listener).await else {
            tracing::debug!(client = %remote, "no route found");
            return Ok(());
        };

        // First match on policy wins.
        let Some(matched) = policy::match_policy(&policies, remote.ip()) else {
            write_error(&mut out, "MDCMUX NO POLICY MATCH").await?;
            return Ok(());
        };

        // A failed access check doesn't kill the connection.
        if !matched.policy.allow(&command) {
            write_error(&mut out, "MDCMUX DENY POLICY").await?;
            continue;
        }

        let forwarded = Instant::now();
        let response = match backend.round_trip(&cancel, &command).await {
            Ok(response) => response,
            Err(error) => {
                let _ = write_error(&mut out, "MDCMUX PROXY ERROR").await;
                return Err(error.into());
            }
        };

        out.write_all(&response.wire_bytes()).await?;
        out.write_all(b"\n").await?;
        let flush_started = Instant::now();
        out.flush().await?;

        if matched.policy.audit {
            tracing::info!(
                client = %remote,
                server = %backend.addr(),
                request = %command,
                response = %response,
                backend_latency = ?(flush_started - forwarded),
                client_latency = ?(received - idle_since),
                flush_latency = ?flush_started.elapsed(),
                "proxied message"
            );
        } else {
            tracing::debug!(
                client = %remote,
                server = %backend.addr(),
                request = %command,
                response = %response,
                "proxy response"
            );
        }

        idle_since = Instant::now();
    }
}

/// Write a proxy-generated error reply.
async fn write_error<W: AsyncWrite + Unpin>(out: &mut W, message: &str) -> io::Result<()> {
    out.write_all(format!(">>?, {message}\n").as_bytes()).await?;
    out.flush().await
}
