use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest request line accepted, newline included.
pub const MAX_LINE_LENGTH: u64 = 64 * 1024;

/// Reason attached to `DEFER_IF_PERMIT` when an access lookup cannot be answered.
pub const SERVICE_UNAVAILABLE: &str = "Service unavailable";

/// One lookup as sent by the MTA: `<selector> <key>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub selector: &'a str,
    pub key: &'a str,
}

/// Result of parsing a single input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedLine<'a> {
    /// Blank line; nothing is written back.
    Skip,
    /// Only one field present; logged and dropped without a reply.
    Malformed,
    Request(Request<'a>),
}

/// Splits a line into table selector and key.
///
/// Surrounding whitespace is trimmed first. The selector ends at the first
/// whitespace run and the key is everything after it, inner whitespace
/// included.
pub fn parse_request(line: &str) -> ParsedLine<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ParsedLine::Skip;
    }

    match trimmed.split_once(char::is_whitespace) {
        Some((selector, rest)) => ParsedLine::Request(Request {
            selector,
            key: rest.trim_start(),
        }),
        None => ParsedLine::Malformed,
    }
}

/// The fixed response vocabulary understood by the MTA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    OkValue(String),
    NotFound,
    TempFail,
    Dunno,
    DeferIfPermit(String),
    /// Access policy token passed through exactly as stored.
    Action(String),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok => f.write_str("OK"),
            Response::OkValue(value) => write!(f, "OK {value}"),
            Response::NotFound => f.write_str("NOTFOUND"),
            Response::TempFail => f.write_str("TEMPFAIL"),
            Response::Dunno => f.write_str("DUNNO"),
            Response::DeferIfPermit(reason) => write!(f, "DEFER_IF_PERMIT {reason}"),
            Response::Action(action) => f.write_str(action),
        }
    }
}

/// Reads the next newline-terminated line into `line`.
///
/// Returns `false` once the peer has closed the stream. A trailing fragment
/// without a newline counts as a close: the request was never completed.
/// A line longer than [`MAX_LINE_LENGTH`] is an `InvalidData` error.
pub async fn read_request_line<R>(reader: &mut R, line: &mut String) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let bytes = (&mut *reader).take(MAX_LINE_LENGTH).read_line(line).await?;
    if bytes == 0 {
        return Ok(false);
    }
    if !line.ends_with('\n') {
        if bytes as u64 >= MAX_LINE_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("request line exceeds {MAX_LINE_LENGTH} bytes"),
            ));
        }
        return Ok(false);
    }
    line.pop();
    Ok(true)
}

/// Writes one response line and flushes it before the next request is read.
pub async fn write_response<W>(writer: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = response.to_string().into_bytes();
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
