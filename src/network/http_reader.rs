//! Reads HTTP/1.x requests straight off a socket.
//!
//! The capture path cannot go through a framework request type: those
//! normalize header names and merge duplicates before the application sees
//! them. This reader keeps every header line in arrival order with its
//! original casing, which is what a bin has to show.

use std::io;

use log::trace;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::configuration::types::RequestLimits;
use crate::data_capture::types::RawHttpRequest;
use crate::error_handling::types::NetworkError;

/// Reads one request: request line, header lines and the full body.
///
/// Bodies are delimited by `Transfer-Encoding: chunked` or `Content-Length`;
/// a request with neither has an empty body. Chunk trailers are read and
/// dropped.
pub async fn read_request<R>(reader: &mut R, limits: &RequestLimits) -> Result<RawHttpRequest, NetworkError>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = limits.max_head_bytes;

    // empty lines before the request line are tolerated
    let request_line = loop {
        match read_line(reader, &mut budget).await? {
            None => return Err(NetworkError::ConnectionClosed),
            Some(line) if line.is_empty() => continue,
            Some(line) => break line,
        }
    };
    let (method, target, version) = parse_request_line(&request_line)?;

    let mut header_lines = Vec::new();
    loop {
        let line = read_line(reader, &mut budget)
            .await?
            .ok_or(NetworkError::ConnectionClosed)?;
        if line.is_empty() {
            break;
        }
        header_lines.push(parse_header_line(&line)?);
    }

    let mut request = RawHttpRequest {
        method,
        target,
        version,
        header_lines,
        body: String::new(),
    };

    let body = match body_framing(&request)? {
        BodyFraming::Chunked => read_chunked_body(reader, limits).await?,
        BodyFraming::Length(len) => {
            if len > limits.max_body_bytes as u64 {
                return Err(NetworkError::BodyTooLarge);
            }
            let mut body = vec![0u8; len as usize];
            reader.read_exact(&mut body).await.map_err(eof_as_closed)?;
            body
        }
        BodyFraming::Empty => Vec::new(),
    };
    request.body = String::from_utf8_lossy(&body).into_owned();

    trace!(
        "read {} {} ({} header line(s), {} body byte(s))",
        request.method,
        request.target,
        request.header_lines.len(),
        body.len()
    );
    Ok(request)
}

/// Writes a minimal plain-text response and flushes it.
pub async fn write_response<W>(writer: &mut W, status: u16, reason: &str, body: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}

enum BodyFraming {
    Chunked,
    Length(u64),
    Empty,
}

fn body_framing(request: &RawHttpRequest) -> Result<BodyFraming, NetworkError> {
    if let Some(encoding) = request.header_values("transfer-encoding").last() {
        let last_coding = encoding.rsplit(',').next().unwrap_or("").trim();
        return if last_coding.eq_ignore_ascii_case("chunked") {
            Ok(BodyFraming::Chunked)
        } else {
            Err(NetworkError::MalformedRequest(format!(
                "unsupported transfer-encoding {:?}",
                encoding
            )))
        };
    }

    let mut length: Option<u64> = None;
    for value in request
        .header_values("content-length")
        .flat_map(|v| v.split(','))
        .map(str::trim)
    {
        let parsed = value
            .parse::<u64>()
            .map_err(|_| NetworkError::MalformedRequest(format!("bad content-length {:?}", value)))?;
        match length {
            Some(previous) if previous != parsed => {
                return Err(NetworkError::MalformedRequest(
                    "conflicting content-length values".to_string(),
                ))
            }
            _ => length = Some(parsed),
        }
    }

    Ok(match length {
        Some(0) | None => BodyFraming::Empty,
        Some(len) => BodyFraming::Length(len),
    })
}

async fn read_chunked_body<R>(reader: &mut R, limits: &RequestLimits) -> Result<Vec<u8>, NetworkError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    let mut budget = limits.max_head_bytes;

    loop {
        let size_line = read_line(reader, &mut budget)
            .await?
            .ok_or(NetworkError::ConnectionClosed)?;
        let size_text = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| NetworkError::MalformedRequest(format!("bad chunk size {:?}", size_text)))?;

        if size == 0 {
            // trailers are not part of the captured request
            loop {
                let trailer = read_line(reader, &mut budget)
                    .await?
                    .ok_or(NetworkError::ConnectionClosed)?;
                if trailer.is_empty() {
                    return Ok(body);
                }
            }
        }

        if body.len().saturating_add(size) > limits.max_body_bytes {
            return Err(NetworkError::BodyTooLarge);
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(eof_as_closed)?;

        let terminator = read_line(reader, &mut budget)
            .await?
            .ok_or(NetworkError::ConnectionClosed)?;
        if !terminator.is_empty() {
            return Err(NetworkError::MalformedRequest(
                "chunk data not followed by CRLF".to_string(),
            ));
        }
    }
}

/// Reads one line, without its terminator, charging its length to `budget`.
/// `None` means the peer closed the connection before sending anything.
async fn read_line<R>(reader: &mut R, budget: &mut usize) -> Result<Option<String>, NetworkError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = (*budget as u64).saturating_add(1);
    let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if n > *budget {
        return Err(NetworkError::HeadTooLarge);
    }
    if !buf.ends_with(b"\n") {
        return Err(NetworkError::ConnectionClosed);
    }
    *budget -= n;

    buf.pop();
    if buf.ends_with(b"\r") {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn parse_request_line(line: &str) -> Result<(String, String, String), NetworkError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(NetworkError::MalformedRequest(format!("bad request line {:?}", line)));
    };

    let version = version
        .strip_prefix("HTTP/")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| NetworkError::MalformedRequest(format!("bad protocol {:?}", version)))?;
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_graphic()) || target.is_empty() {
        return Err(NetworkError::MalformedRequest(format!("bad request line {:?}", line)));
    }
    Ok((method.to_string(), target.to_string(), version.to_string()))
}

/// Keeps the field name exactly as sent; only the whitespace around the
/// value is dropped.
fn parse_header_line(line: &str) -> Result<String, NetworkError> {
    if line.starts_with(' ') || line.starts_with('\t') {
        return Err(NetworkError::MalformedRequest(
            "obsolete header line folding".to_string(),
        ));
    }
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| NetworkError::MalformedRequest(format!("bad header line {:?}", line)))?;
    if name.is_empty() || name.contains(|c: char| c.is_whitespace()) {
        return Err(NetworkError::MalformedRequest(format!("bad header name {:?}", name)));
    }
    Ok(format!("{}: {}", name, value.trim_matches(|c| c == ' ' || c == '\t')))
}

fn eof_as_closed(err: io::Error) -> NetworkError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        NetworkError::ConnectionClosed
    } else {
        NetworkError::Io(err)
    }
}
