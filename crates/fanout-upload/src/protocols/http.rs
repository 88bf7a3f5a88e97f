//! Shared HTTP plumbing for the protocol adapters.

use std::time::Duration;

use fanout_core::{Error, Result};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

/// Longest response body echoed into an error message.
const MAX_ERROR_BODY: usize = 512;

/// Client with a per-request timeout. Redirects are not followed: a 308 is
/// a protocol answer, not a redirect.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))
}

/// A request that never produced a response. Retryable for chunk traffic.
pub(crate) fn transport_error(op: &str, err: reqwest::Error) -> Error {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "transport error"
    };
    Error::UploadChunk(format!("{op} {kind}: {err}"))
}

/// Server-side conditions worth resuming after.
pub(crate) fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Turn an unexpected response into an error. Transient statuses become
/// [`Error::UploadChunk`] when `chunk_traffic` is set.
pub(crate) async fn unexpected(resp: Response, op: &str, chunk_traffic: bool) -> Error {
    let status = resp.status();
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    let message = format!("{op} returned {status}: {}", body.trim());
    if chunk_traffic && is_transient(status) {
        Error::UploadChunk(message)
    } else {
        Error::upload_protocol(Some(status.as_u16()), message)
    }
}

pub(crate) async fn json_body(resp: Response, op: &str) -> Result<Value> {
    let status = resp.status().as_u16();
    let text = resp
        .text()
        .await
        .map_err(|e| Error::upload_protocol(Some(status), format!("{op}: unreadable body: {e}")))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| Error::upload_protocol(Some(status), format!("{op}: invalid JSON: {e}")))
}

/// Look up `field` in a JSON document. Dots descend into objects, and
/// numeric ids are stringified.
pub(crate) fn extract_id(value: &Value, field: &str) -> Option<String> {
    let found = field
        .split('.')
        .try_fold(value, |node, key| node.get(key))?;
    match found {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a `Range: bytes=0-N` header into the committed byte count `N+1`.
pub(crate) fn committed_from_range(header: Option<&str>) -> Result<u64> {
    let Some(value) = header else {
        return Ok(0);
    };
    let spec = value.trim().strip_prefix("bytes=").unwrap_or(value.trim());
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| Error::upload_protocol(Some(308), format!("malformed Range header '{value}'")))?;
    let start: u64 = start
        .trim()
        .parse()
        .map_err(|_| Error::upload_protocol(Some(308), format!("malformed Range header '{value}'")))?;
    let end: u64 = end
        .trim()
        .parse()
        .map_err(|_| Error::upload_protocol(Some(308), format!("malformed Range header '{value}'")))?;
    if start != 0 || end < start {
        return Err(Error::upload_protocol(
            Some(308),
            format!("Range header '{value}' is not a prefix"),
        ));
    }
    Ok(end + 1)
}
