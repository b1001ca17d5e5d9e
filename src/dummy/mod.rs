//! A trivial in-process MDC host.
//!
//! Supports the canned replies for the documented basic commands and an
//! in-memory macro-variable store. Used by the integration tests and by the
//! `dummy` CLI subcommand as a stand-in control.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncWrite, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::message::wire::{write_prompt, write_response, LineScanner};
use crate::message::{parse_command, Command, Number};

/// The canned reply for a documented basic command code.
pub fn canned(code: Number) -> Option<&'static str> {
    if code.frac() != 0 {
        return None;
    }
    match code.whole() {
        100 => Some("SERIAL NUMBER, 1024"),
        101 => Some("SOFTWARE VERSION, 100.24.000.1024"),
        102 => Some("MODEL, MDCMUX"),
        104 => Some("MODE, STARTUP_MODE"),
        200 => Some("TOOL CHANGES, 1024"),
        201 => Some("USING TOOL, 16"),
        300 => Some("P.O. TIME, 00012:34:56"),
        301 => Some("C.S. TIME, 00012:34:56"),
        303 => Some("LAST CYCLE, 00012:34:56"),
        304 => Some("PREV CYCLE, 00012:34:56"),
        402 => Some("M30 #1, 22"),
        403 => Some("M30 #2, 33"),
        500 => Some("PROGRAM, MDI, ALARM ON, PARTS, 3205"),
        _ => None,
    }
}

type Variables = Arc<Mutex<HashMap<Number, Number>>>;

/// A dummy MDC host bound to a local TCP port.
pub struct Server {
    local_addr: SocketAddr,
    variables: Variables,
}

impl Server {
    /// Bind and start serving until the token is cancelled.
    pub async fn spawn(cancel: CancellationToken, bind: &str) -> io::Result<Server> {
        let listener = TcpListener::bind(bind).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(address = %local_addr, "dummy server listening");

        let variables: Variables = Arc::new(Mutex::new(HashMap::new()));
        let accept_variables = Arc::clone(&variables);
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(address = %local_addr, "dummy server listener closed");
                        return;
                    }
                    accepted = listener.accept() => accepted,
                };
                let Ok((stream, _)) = accepted else {
                    return;
                };
                let variables = Arc::clone(&accept_variables);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(error) = serve(cancel, stream, variables).await {
                        tracing::error!(%error, "handler exiting");
                    }
                });
            }
        });

        Ok(Server {
            local_addr,
            variables,
        })
    }

    /// The address to which the server is bound.
    pub fn addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the current value of a macro variable, if set.
    pub fn peek(&self, variable: Number) -> Option<Number> {
        self.variables
            .lock()
            .expect("variable store poisoned")
            .get(&variable)
            .copied()
    }

    /// Set a macro variable.
    pub fn poke(&self, variable: Number, value: Number) {
        self.variables
            .lock()
            .expect("variable store poisoned")
            .insert(variable, value);
    }
}

async fn serve(
    cancel: CancellationToken,
    stream: TcpStream,
    variables: Variables,
) -> io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut scanner = LineScanner::lines(read_half);
    let mut out = BufWriter::new(write_half);

    write_prompt(&mut out).await?;
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            scanned = scanner.scan() => match scanned? {
                Some(line) => line,
                None => return Ok(()),
            },
        };
        let line = line.trim_ascii();

        // Empty lines are ignored.
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(command) => respond(&command, &variables, &mut out).await?,
            Err(error) => {
                tracing::debug!(
                    message = %String::from_utf8_lossy(line),
                    %error,
                    "inbound parse error"
                );
                write_response(&mut out, b"?, BAD MESSAGE").await?;
            }
        }
    }
}

async fn respond<W: AsyncWrite + Unpin>(
    command: &Command,
    variables: &Variables,
    out: &mut W,
) -> io::Result<()> {
    match command {
        Command::Write { variable, value } => {
            variables
                .lock()
                .expect("variable store poisoned")
                .insert(*variable, *value);
            write_response(out, b"!").await
        }
        Command::Query { variable } => {
            if variable.whole() < 0 || variable.frac() != 0 {
                return write_response(out, b"?, BAD VARIABLE NUMBER").await;
            }
            // Macro variable 0 is always NaN.
            if variable.whole() == 0 {
                return write_response(out, b"MACRO, NaN").await;
            }
            let value = variables
                .lock()
                .expect("variable store poisoned")
                .get(variable)
                .copied()
                .unwrap_or_default();
            write_response(out, format!("MACRO, {value}").as_bytes()).await
        }
        Command::Basic(basic) => match canned(basic.code()) {
            Some(reply) => write_response(out, reply.as_bytes()).await,
            None => {
                write_response(out, format!("?, ?Q{:.0}", basic.code()).as_bytes()).await
            }
        },
    }
}
