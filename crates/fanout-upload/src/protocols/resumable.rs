//! Byte-range resumable PUT.
//!
//! Chunks go to a session URL with `Content-Range: bytes a-b/total`. A `308`
//! means "chunk stored, keep going" and its `Range: bytes=0-N` header says
//! how much the server holds. After a transport failure an empty `PUT` with
//! `Content-Range: bytes */total` asks for the same header.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fanout_core::{Error, Result};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, Response, StatusCode, Url};

use super::http::{
    build_client, committed_from_range, extract_id, json_body, transport_error, unexpected,
};
use crate::payload::ChunkBody;
use crate::protocol::{ChunkAck, FinalizeOutcome, ProcessingStatus, UploadProtocol};
use crate::session::UploadSession;

#[derive(Debug)]
pub struct ResumableProtocol {
    client: Client,
    session_url: Option<String>,
    initiate_url: Option<String>,
    credential: String,
    id_field: String,
    /// Artifact id from a `200` on an offset query, for `finalize`.
    completed_id: Mutex<Option<String>>,
}

impl ResumableProtocol {
    pub fn new(
        session_url: Option<String>,
        initiate_url: Option<String>,
        credential: String,
        id_field: String,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            session_url,
            initiate_url,
            credential,
            id_field,
            completed_id: Mutex::new(None),
        })
    }

    fn session_url<'a>(&self, session: &'a UploadSession) -> Result<&'a str> {
        session
            .session
            .as_deref()
            .ok_or_else(|| Error::Internal("resumable upload has no session URL".into()))
    }

    async fn artifact_from(&self, resp: Response, op: &str) -> Result<String> {
        let body = json_body(resp, op).await?;
        extract_id(&body, &self.id_field).ok_or_else(|| {
            Error::upload_protocol(None, format!("{op} response has no '{}' field", self.id_field))
        })
    }

    fn remember(&self, id: &str) {
        if let Ok(mut slot) = self.completed_id.lock() {
            *slot = Some(id.to_string());
        }
    }
}

fn range_header(resp: &Response) -> Option<String> {
    resp.headers()
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `Location` may be relative to the initiation endpoint.
fn resolve_location(base: &str, location: &str) -> Result<String> {
    let base = Url::parse(base)
        .map_err(|e| Error::Validation(format!("invalid initiate_url '{base}': {e}")))?;
    base.join(location)
        .map(|u| u.to_string())
        .map_err(|e| Error::upload_protocol(None, format!("invalid Location '{location}': {e}")))
}

#[async_trait]
impl UploadProtocol for ResumableProtocol {
    fn name(&self) -> &'static str {
        "resumable"
    }

    fn supports_offset_query(&self) -> bool {
        true
    }

    async fn init(&self, total_bytes: u64) -> Result<Option<String>> {
        let Some(ref initiate_url) = self.initiate_url else {
            return Ok(self.session_url.clone());
        };

        let resp = self
            .client
            .post(initiate_url)
            .bearer_auth(&self.credential)
            .header("X-Upload-Content-Length", total_bytes)
            .header("X-Upload-Content-Type", "video/mp4")
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .body("{}")
            .send()
            .await
            .map_err(|e| Error::upload_protocol(None, format!("session initiation failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(unexpected(resp, "session initiation", false).await);
        }
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::upload_protocol(None, "session initiation returned no Location"))?;
        let url = resolve_location(initiate_url, location)?;
        tracing::debug!(session_url = %url, total_bytes, "resumable session opened");
        Ok(Some(url))
    }

    async fn send_chunk(
        &self,
        session: &UploadSession,
        start: u64,
        data: ChunkBody,
    ) -> Result<ChunkAck> {
        let url = self.session_url(session)?;
        let len = data.len() as u64;
        if len == 0 {
            return Err(Error::Internal("empty chunk".into()));
        }
        let content_range = format!("bytes {}-{}/{}", start, start + len - 1, session.total_bytes);

        let resp = self
            .client
            .put(url)
            .bearer_auth(&self.credential)
            .header(CONTENT_RANGE, content_range)
            .header(CONTENT_LENGTH, len)
            .body(data.into_body())
            .send()
            .await
            .map_err(|e| transport_error("chunk", e))?;

        match resp.status() {
            StatusCode::PERMANENT_REDIRECT => {
                let committed = committed_from_range(range_header(&resp).as_deref())?;
                Ok(ChunkAck::Incomplete { committed })
            }
            StatusCode::OK | StatusCode::CREATED => {
                let id = self.artifact_from(resp, "final chunk").await?;
                Ok(ChunkAck::Complete {
                    artifact_id: Some(id),
                })
            }
            _ => Err(unexpected(resp, "chunk", true).await),
        }
    }

    async fn query_offset(&self, session: &UploadSession) -> Result<u64> {
        let url = self.session_url(session)?;
        let resp = self
            .client
            .put(url)
            .bearer_auth(&self.credential)
            .header(CONTENT_RANGE, format!("bytes */{}", session.total_bytes))
            .body(Bytes::new())
            .send()
            .await
            .map_err(|e| transport_error("offset query", e))?;

        match resp.status() {
            StatusCode::PERMANENT_REDIRECT => committed_from_range(range_header(&resp).as_deref()),
            StatusCode::OK | StatusCode::CREATED => {
                // The last chunk landed even though its response was lost.
                let id = self.artifact_from(resp, "offset query").await?;
                self.remember(&id);
                Ok(session.total_bytes)
            }
            _ => Err(unexpected(resp, "offset query", true).await),
        }
    }

    /// Only reached when the transfer completed through an offset query.
    async fn finalize(&self, session: &UploadSession) -> Result<FinalizeOutcome> {
        let remembered = self.completed_id.lock().ok().and_then(|slot| slot.clone());
        if let Some(id) = remembered {
            return Ok(FinalizeOutcome::Done {
                artifact_id: Some(id),
            });
        }
        match self.poll_status(session).await? {
            ProcessingStatus::Succeeded { artifact_id } => Ok(FinalizeOutcome::Done { artifact_id }),
            ProcessingStatus::InProgress => Ok(FinalizeOutcome::Pending),
            ProcessingStatus::Failed { reason } => Err(Error::upload_protocol(None, reason)),
        }
    }

    async fn poll_status(&self, session: &UploadSession) -> Result<ProcessingStatus> {
        match self.query_offset(session).await {
            Ok(offset) if offset >= session.total_bytes => {
                let id = self.completed_id.lock().ok().and_then(|slot| slot.clone());
                Ok(ProcessingStatus::Succeeded { artifact_id: id })
            }
            Ok(offset) => Ok(ProcessingStatus::Failed {
                reason: format!(
                    "server holds {offset} of {} bytes after transfer",
                    session.total_bytes
                ),
            }),
            Err(e) => Err(e),
        }
    }
}
