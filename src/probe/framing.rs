//! Newline-delimited JSON-RPC framing
//!
//! A single read may return only part of a line, so responses are
//! accumulated across a bounded number of reads and the first line is
//! re-parsed after each one.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ProbeError;

/// Read size per attempt
const READ_CHUNK: usize = 4096;

/// Upper bound on an accumulated response (1MB)
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Build one request line, newline-terminated
pub fn request_line(id: u64, method: &str, params: Value) -> Vec<u8> {
    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    });
    let mut line = request.to_string().into_bytes();
    line.push(b'\n');
    line
}

/// Parse everything before the first newline, if it is complete JSON
pub fn parse_first_line(buf: &[u8]) -> Option<Value> {
    let end = buf.iter().position(|&b| b == b'\n').unwrap_or(buf.len());
    let line = std::str::from_utf8(&buf[..end]).ok()?.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Accumulate reads until the first line parses, up to `max_reads` reads
pub async fn read_json_line<S>(stream: &mut S, max_reads: usize) -> Result<Value, ProbeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    for _ in 0..max_reads {
        let n = stream.read(&mut chunk).await.map_err(ProbeError::Io)?;
        if n == 0 {
            return Err(ProbeError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(value) = parse_first_line(&buf) {
            return Ok(value);
        }

        if buf.len() > MAX_RESPONSE_SIZE {
            return Err(ProbeError::TooLarge(buf.len()));
        }
    }

    Err(ProbeError::Malformed(format!(
        "no complete JSON line after {} reads ({} bytes)",
        max_reads,
        buf.len()
    )))
}

/// Extract `result` from a JSON-RPC response object
pub fn into_result(response: Value) -> Result<Value, ProbeError> {
    match response {
        Value::Object(mut map) => match map.remove("result") {
            Some(result) => Ok(result),
            None => Err(ProbeError::Rpc(
                map.get("error")
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "response has no result".to_string()),
            )),
        },
        other => Err(ProbeError::Rpc(format!("response is not an object: {}", other))),
    }
}

/// Send one request and wait for its result
pub async fn exchange<S>(stream: &mut S, request: &[u8], max_reads: usize) -> Result<Value, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await.map_err(ProbeError::Io)?;
    stream.flush().await.map_err(ProbeError::Io)?;

    let response = read_json_line(stream, max_reads).await?;
    into_result(response)
}
