//! Bulk retrieval of macro variables as CSV.

use std::io::{self, Write};
use std::path::Path;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendConnection, BackendError};
use crate::message::{Command, Number};

/// Error type for the fetch utility.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Fetch the inclusive range of macro variables `start..=end` from the host
/// and write `variable,value` CSV rows to the given path, or to stdout when
/// the path is absent or `-`.
pub async fn run(
    cancel: &CancellationToken,
    host: &str,
    out: Option<&Path>,
    start: i64,
    end: i64,
) -> Result<(), FetchError> {
    let conn = BackendConnection::new(host);

    let mut rows = Vec::with_capacity((end - start + 1).max(0) as usize);
    for variable in start..=end {
        let response = conn
            .round_trip(cancel, &Command::query(Number::int(variable)))
            .await?;
        let Some(value) = response.value() else {
            return Err(FetchError::UnexpectedResponse(response.to_string()));
        };
        rows.push((variable, value));
    }
    conn.close().await;

    match out {
        Some(path) if path != Path::new("-") => {
            let file = std::fs::File::create(path)?;
            write_rows(io::BufWriter::new(file), &rows)
        }
        _ => write_rows(io::stdout().lock(), &rows),
    }
}

fn write_rows<W: Write>(mut out: W, rows: &[(i64, Number)]) -> Result<(), FetchError> {
    for (variable, value) in rows {
        writeln!(out, "{variable},{value}")?;
    }
    out.flush()?;
    Ok(())
}
