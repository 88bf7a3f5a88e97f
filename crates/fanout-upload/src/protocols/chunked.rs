//! INIT / APPEND / FINALIZE with asynchronous STATUS polling.
//!
//! Wire format:
//! - `POST url` form `command=INIT&total_bytes&media_type&media_category`
//!   returns `{"media_id": ...}`
//! - `POST url?command=APPEND&media_id&segment_index` with the raw chunk
//! - `POST url` form `command=FINALIZE&media_id` returns the media id and
//!   optionally `processing_info`
//! - `GET url?command=STATUS&media_id` returns `processing_info.state`
//!
//! There is no way to ask how much was received, so a failed APPEND ends
//! the upload.

use std::time::Duration;

use async_trait::async_trait;
use fanout_core::{Error, Result};
use reqwest::Client;
use serde_json::Value;

use super::http::{build_client, extract_id, json_body, transport_error, unexpected};
use crate::payload::ChunkBody;
use crate::protocol::{ChunkAck, FinalizeOutcome, ProcessingStatus, UploadProtocol};
use crate::session::UploadSession;

#[derive(Debug)]
pub struct ChunkedProtocol {
    client: Client,
    url: String,
    credential: String,
    media_type: String,
    media_category: String,
}

impl ChunkedProtocol {
    pub fn new(
        url: String,
        credential: String,
        media_type: String,
        media_category: String,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url,
            credential,
            media_type,
            media_category,
        })
    }

    fn media_id<'a>(&self, session: &'a UploadSession) -> Result<&'a str> {
        session
            .session
            .as_deref()
            .ok_or_else(|| Error::Internal("APPEND before INIT".into()))
    }
}

/// Where `processing_info.state` puts the upload.
fn processing_state(body: &Value, media_id: &str) -> ProcessingStatus {
    let info = body.get("processing_info");
    let state = info
        .and_then(|i| i.get("state"))
        .and_then(Value::as_str)
        .unwrap_or("succeeded");
    match state.to_ascii_lowercase().as_str() {
        "pending" | "in_progress" => ProcessingStatus::InProgress,
        "failed" | "error" => {
            let reason = info
                .and_then(|i| i.get("error"))
                .and_then(|e| e.get("message").or(Some(e)))
                .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
                .unwrap_or_else(|| format!("processing {state}"));
            ProcessingStatus::Failed { reason }
        }
        _ => ProcessingStatus::Succeeded {
            artifact_id: extract_id(body, "media_id_string")
                .or_else(|| extract_id(body, "media_id"))
                .or_else(|| Some(media_id.to_string())),
        },
    }
}

#[async_trait]
impl UploadProtocol for ChunkedProtocol {
    fn name(&self) -> &'static str {
        "chunked"
    }

    fn supports_offset_query(&self) -> bool {
        false
    }

    fn requires_finalize(&self) -> bool {
        true
    }

    async fn init(&self, total_bytes: u64) -> Result<Option<String>> {
        let total = total_bytes.to_string();
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.credential)
            .form(&[
                ("command", "INIT"),
                ("total_bytes", total.as_str()),
                ("media_type", self.media_type.as_str()),
                ("media_category", self.media_category.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::upload_protocol(None, format!("INIT failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(unexpected(resp, "INIT", false).await);
        }
        let body = json_body(resp, "INIT").await?;
        let media_id = extract_id(&body, "media_id_string")
            .or_else(|| extract_id(&body, "media_id"))
            .ok_or_else(|| Error::upload_protocol(None, "INIT response has no media_id"))?;
        tracing::debug!(%media_id, total_bytes, "chunked upload session opened");
        Ok(Some(media_id))
    }

    async fn send_chunk(
        &self,
        session: &UploadSession,
        start: u64,
        data: ChunkBody,
    ) -> Result<ChunkAck> {
        let media_id = self.media_id(session)?;
        let len = data.len() as u64;
        let segment_index = session.chunks_acked.to_string();
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.credential)
            .query(&[
                ("command", "APPEND"),
                ("media_id", media_id),
                ("segment_index", segment_index.as_str()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(data.into_body())
            .send()
            .await
            .map_err(|e| transport_error("APPEND", e))?;
        if !resp.status().is_success() {
            return Err(unexpected(resp, "APPEND", true).await);
        }
        Ok(ChunkAck::Incomplete {
            committed: start + len,
        })
    }

    async fn query_offset(&self, _session: &UploadSession) -> Result<u64> {
        Err(Error::Internal("chunked upload has no offset query".into()))
    }

    async fn finalize(&self, session: &UploadSession) -> Result<FinalizeOutcome> {
        let media_id = self.media_id(session)?;
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.credential)
            .form(&[("command", "FINALIZE"), ("media_id", media_id)])
            .send()
            .await
            .map_err(|e| Error::upload_protocol(None, format!("FINALIZE failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(unexpected(resp, "FINALIZE", false).await);
        }
        let body = json_body(resp, "FINALIZE").await?;
        match processing_state(&body, media_id) {
            ProcessingStatus::InProgress => Ok(FinalizeOutcome::Pending),
            ProcessingStatus::Succeeded { artifact_id } => Ok(FinalizeOutcome::Done { artifact_id }),
            ProcessingStatus::Failed { reason } => Err(Error::upload_protocol(None, reason)),
        }
    }

    async fn poll_status(&self, session: &UploadSession) -> Result<ProcessingStatus> {
        let media_id = self.media_id(session)?;
        let resp = self
            .client
            .get(&self.url)
            .bearer_auth(&self.credential)
            .query(&[("command", "STATUS"), ("media_id", media_id)])
            .send()
            .await
            .map_err(|e| Error::upload_protocol(None, format!("STATUS failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(unexpected(resp, "STATUS", false).await);
        }
        let body = json_body(resp, "STATUS").await?;
        Ok(processing_state(&body, media_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn protocol(server: &MockServer) -> ChunkedProtocol {
        ChunkedProtocol::new(
            format!("{}/media/upload", server.uri()),
            "tok".into(),
            "video/mp4".into(),
            "tweet_video".into(),
            Duration::from_millis(300),
        )
        .unwrap()
    }

    fn opened(server: &MockServer) -> UploadSession {
        let mut session = UploadSession::new("social", server.uri(), 10, 4);
        session.session = Some("m-1".into());
        session
    }

    #[test]
    fn processing_states() {
        assert_eq!(
            processing_state(&json!({"processing_info": {"state": "in_progress"}}), "m"),
            ProcessingStatus::InProgress
        );
        assert_eq!(
            processing_state(&json!({"media_id_string": "99"}), "m"),
            ProcessingStatus::Succeeded { artifact_id: Some("99".into()) }
        );
        assert_matches!(
            processing_state(
                &json!({"processing_info": {"state": "failed", "error": {"message": "bad codec"}}}),
                "m"
            ),
            ProcessingStatus::Failed { reason } if reason == "bad codec"
        );
        assert_eq!(
            processing_state(&json!({"processing_info": {"state": "succeeded"}}), "m"),
            ProcessingStatus::Succeeded { artifact_id: Some("m".into()) }
        );
    }

    #[tokio::test]
    async fn init_declares_size_and_category() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/media/upload"))
            .and(body_string_contains("command=INIT"))
            .and(body_string_contains("total_bytes=10"))
            .and(body_string_contains("media_category=tweet_video"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"media_id": 710511363345354753u64})))
            .mount(&server)
            .await;

        let id = protocol(&server).init(10).await.unwrap();
        assert_eq!(id.as_deref(), Some("710511363345354753"));
    }

    #[tokio::test]
    async fn append_carries_segment_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("command", "APPEND"))
            .and(query_param("media_id", "m-1"))
            .and(query_param("segment_index", "2"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = opened(&server);
        session.sent_bytes = 8;
        session.chunks_acked = 2;
        let ack = protocol(&server)
            .send_chunk(&session, 8, Bytes::from_static(b"ab").into())
            .await
            .unwrap();
        assert_eq!(ack, ChunkAck::Incomplete { committed: 10 });
    }

    #[tokio::test]
    async fn append_timeout_is_chunk_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("command", "APPEND"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = protocol(&server)
            .send_chunk(&opened(&server), 0, Bytes::from_static(b"abcd").into())
            .await
            .unwrap_err();
        assert_matches!(err, Error::UploadChunk(_));
    }

    #[tokio::test]
    async fn finalize_pending_then_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("command=FINALIZE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"media_id_string": "m-1", "processing_info": {"state": "pending", "check_after_secs": 1}}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("command", "STATUS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"media_id_string": "m-1", "processing_info": {"state": "succeeded"}}),
            ))
            .mount(&server)
            .await;

        let proto = protocol(&server);
        let session = opened(&server);
        assert_eq!(proto.finalize(&session).await.unwrap(), FinalizeOutcome::Pending);
        assert_eq!(
            proto.poll_status(&session).await.unwrap(),
            ProcessingStatus::Succeeded { artifact_id: Some("m-1".into()) }
        );
    }

    #[tokio::test]
    async fn client_error_on_append_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("segment too big"))
            .mount(&server)
            .await;

        let err = protocol(&server)
            .send_chunk(&opened(&server), 0, Bytes::from_static(b"abcd").into())
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
        assert_matches!(err, Error::UploadProtocol { status: Some(400), .. });
    }
}
