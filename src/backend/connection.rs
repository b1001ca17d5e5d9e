//! Message transport to a single MDC host.
//!
//! # Responsibilities
//! - Dial the host lazily, on the first round trip
//! - Serialize round trips so responses pair unambiguously with requests
//!   (the protocol has no correlation ID)
//! - Close the socket after a period of inactivity and redial on demand

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::message::wire::LineScanner;
use crate::message::{Command, Response};

/// Deadline for a complete round trip, including a lazy dial.
pub const ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("round trip to {0} timed out")]
    Timeout(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A connection to a single MDC host.
///
/// Clones share the underlying socket; the socket itself is dialed on first
/// use and reaped after idle time. MDC hosts only permit a couple of
/// concurrent clients, so the proxy keeps exactly one socket per host and
/// funnels every client through it.
#[derive(Clone)]
pub struct BackendConnection {
    inner: Arc<Inner>,
}

struct Inner {
    hostname: String,
    idle_time: Duration,
    // Incremented whenever the link is torn down or replaced, so a stale
    // reaper never closes a successor socket.
    epoch: AtomicU64,
    link: Mutex<Option<Link>>,
}

struct Link {
    writer: BufWriter<OwnedWriteHalf>,
    scanner: LineScanner<OwnedReadHalf>,
    activity: Arc<Notify>,
}

impl BackendConnection {
    /// Construct a connection to an MDC host. No dialing happens yet.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self::with_idle_time(hostname, ROUND_TRIP_TIMEOUT)
    }

    /// Construct a connection with a custom idle disconnect time.
    pub fn with_idle_time(hostname: impl Into<String>, idle_time: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                hostname: hostname.into(),
                idle_time,
                epoch: AtomicU64::new(0),
                link: Mutex::new(None),
            }),
        }
    }

    /// The target MDC hostname.
    pub fn addr(&self) -> &str {
        &self.inner.hostname
    }

    /// Write a command to the MDC host and receive its response. The
    /// response is interpreted based on the type of command sent.
    ///
    /// Round trips are fully serialized per connection.
    pub async fn round_trip(
        &self,
        cancel: &CancellationToken,
        command: &Command,
    ) -> Result<Response, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        // The deadline is measured from the request, so time spent queued
        // behind other round trips counts against it.
        let deadline = tokio::time::Instant::now() + ROUND_TRIP_TIMEOUT;
        let mut guard = self.inner.link.lock().await;

        let result = match tokio::time::timeout_at(deadline, self.attempt(&mut guard, command))
            .await
        {
            Ok(result) => result,
            // An aborted exchange may have left a partial write or an
            // unread reply on the socket; it cannot be reused.
            Err(_) => Err(BackendError::Timeout(self.inner.hostname.clone())),
        };

        if result.is_err() {
            self.inner.clear(&mut guard);
        }
        result
    }

    /// Close the socket. The next round trip redials.
    pub async fn close(&self) {
        let mut link = self.inner.link.lock().await;
        self.inner.clear(&mut link);
    }

    async fn attempt(
        &self,
        guard: &mut Option<Link>,
        command: &Command,
    ) -> Result<Response, BackendError> {
        if let Some(link) = guard.as_mut() {
            return self.exchange(link, command).await;
        }

        let link = guard.insert(self.dial().await?);

        // Consume the server's initial banner by asking for its serial
        // number, which also identifies the machine in the logs.
        let serial = self.exchange(link, &Command::machine_sn()).await?;
        tracing::info!(hostname = %self.inner.hostname, serial = %serial, "connected");

        self.exchange(link, command).await
    }

    async fn dial(&self) -> Result<Link, BackendError> {
        let stream = TcpStream::connect(&self.inner.hostname).await?;
        let (read_half, write_half) = stream.into_split();

        let activity = Arc::new(Notify::new());
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        spawn_reaper(
            Arc::downgrade(&self.inner),
            epoch,
            Arc::clone(&activity),
            self.inner.idle_time,
        );

        Ok(Link {
            writer: BufWriter::new(write_half),
            scanner: LineScanner::prompt_lines(read_half),
            activity,
        })
    }

    async fn exchange(&self, link: &mut Link, command: &Command) -> Result<Response, BackendError> {
        link.activity.notify_one();

        tracing::debug!(hostname = %self.inner.hostname, command = %command, "sending command");

        link.writer.write_all(command.canonical().as_bytes()).await?;
        link.writer.flush().await?;

        match link.scanner.scan().await? {
            Some(token) if !token.is_empty() => {
                let response = command.parse_response(&token);
                tracing::debug!(hostname = %self.inner.hostname, response = %response, "received response");
                Ok(response)
            }
            _ => Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
        }
    }
}

impl Inner {
    fn clear(&self, link: &mut Option<Link>) {
        if link.take().is_some() {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Close the link after `idle_time` without a round trip. Each round trip
/// pings the activity channel, restarting the timer. The task holds only a
/// weak reference, so dropping the connection lets everything unwind.
fn spawn_reaper(inner: Weak<Inner>, epoch: u64, activity: Arc<Notify>, idle_time: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(idle_time) => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    let mut link = inner.link.lock().await;
                    if inner.epoch.load(Ordering::SeqCst) == epoch {
                        inner.clear(&mut link);
                        tracing::debug!(hostname = %inner.hostname, "disconnected idle backend");
                    }
                    return;
                }
                _ = activity.notified() => {}
            }
        }
    });
}
