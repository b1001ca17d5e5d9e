//! Line framing and the prompt convention.
//!
//! MDC output is CRLF-terminated and every line is prefixed by one or more
//! `>` prompt characters; a prompt alone signals an idle server. Input is
//! tolerant of bare LF.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::io::AsyncBufReadExt;

/// The line terminator written by an MDC host.
pub const EOL: &[u8] = b"\r\n";

/// The prompt character emitted on each line of output.
pub const PROMPT: u8 = b'>';

/// Strip leading prompt characters from a scanned line.
///
/// A prompt-only line (the idle state) strips down to an empty token.
pub fn strip_prompts(token: &[u8]) -> &[u8] {
    let start = token
        .iter()
        .position(|&b| b != PROMPT)
        .unwrap_or(token.len());
    &token[start..]
}

/// An async line splitter over a socket.
///
/// Lines are LF-delimited with an optional trailing CR, and at EOF any
/// unterminated remainder is returned as a final token. Scans are
/// cancel-safe: a timed-out read leaves partial input buffered for the next
/// call. Callers that poll with a deadline use [`LineScanner::reset`] to
/// discard that partial input instead of resuming it.
pub struct LineScanner<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    strip_prompts: bool,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineScanner<R> {
    /// A scanner that returns lines verbatim (client and dummy-server input).
    pub fn lines(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
            strip_prompts: false,
            eof: false,
        }
    }

    /// A scanner that strips prompt prefixes from each line (MDC host
    /// responses).
    pub fn prompt_lines(inner: R) -> Self {
        Self {
            strip_prompts: true,
            ..Self::lines(inner)
        }
    }

    /// Read the next line, or `None` at end of input.
    pub async fn scan(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(at) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=at).collect();
                line.pop();
                return Ok(Some(self.finish(line)));
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buf);
                return Ok(Some(self.finish(line)));
            }
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }

    /// Discard any buffered, unterminated input.
    ///
    /// Used by deadline-driven readers: a read that times out mid-line
    /// starts over rather than splicing the fragment onto later input.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn finish(&self, mut line: Vec<u8>) -> Vec<u8> {
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if self.strip_prompts {
            let stripped = strip_prompts(&line);
            if stripped.len() != line.len() {
                return stripped.to_vec();
            }
        }
        line
    }
}

/// Write a complete response line followed by a fresh prompt, and flush, so
/// the far end observes the server as idle again.
pub async fn write_response<W: AsyncWrite + Unpin>(out: &mut W, payload: &[u8]) -> io::Result<()> {
    out.write_all(&[PROMPT]).await?;
    out.write_all(payload).await?;
    out.write_all(EOL).await?;
    write_prompt(out).await
}

/// Write a bare prompt and flush.
pub async fn write_prompt<W: AsyncWrite + Unpin>(out: &mut W) -> io::Result<()> {
    out.write_all(&[PROMPT]).await?;
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_prompts() {
        assert_eq!(strip_prompts(b">MACRO, 1.0"), b"MACRO, 1.0");
        assert_eq!(strip_prompts(b">>!"), b"!");
        assert_eq!(strip_prompts(b"no prompt"), b"no prompt");
        assert_eq!(strip_prompts(b">"), b"");
        assert_eq!(strip_prompts(b">>>"), b"");
        assert_eq!(strip_prompts(b""), b"");
    }

    #[tokio::test]
    async fn test_scan_lines() {
        let input: &[u8] = b"first\r\nsecond\nthird";
        let mut scanner = LineScanner::lines(input);
        assert_eq!(scanner.scan().await.unwrap(), Some(b"first".to_vec()));
        assert_eq!(scanner.scan().await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(scanner.scan().await.unwrap(), Some(b"third".to_vec()));
        assert_eq!(scanner.scan().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_prompt_lines() {
        let input: &[u8] = b">SERIAL NUMBER, 1024\r\n>>MODEL, MDCMUX\r\n>";
        let mut scanner = LineScanner::prompt_lines(input);
        assert_eq!(
            scanner.scan().await.unwrap(),
            Some(b"SERIAL NUMBER, 1024".to_vec())
        );
        assert_eq!(scanner.scan().await.unwrap(), Some(b"MODEL, MDCMUX".to_vec()));
        // The trailing idle prompt strips down to an empty token.
        assert_eq!(scanner.scan().await.unwrap(), Some(b"".to_vec()));
        assert_eq!(scanner.scan().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reset_discards_partial_line() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut scanner = LineScanner::lines(rx);

        // A fragment with no line terminator leaves the scan pending.
        tx.write_all(b"?Q1").await.unwrap();
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(50), scanner.scan()).await;
        assert!(pending.is_err());

        // After a reset the fragment is gone; later input starts a fresh
        // line instead of splicing onto it.
        scanner.reset();
        tx.write_all(b"02\n").await.unwrap();
        assert_eq!(scanner.scan().await.unwrap(), Some(b"02".to_vec()));
    }

    #[tokio::test]
    async fn test_write_response() {
        let mut out = Vec::new();
        write_response(&mut out, b"MACRO, 1.0").await.unwrap();
        assert_eq!(out, b">MACRO, 1.0\r\n>");

        let mut out = Vec::new();
        write_prompt(&mut out).await.unwrap();
        assert_eq!(out, b">");
    }
}
