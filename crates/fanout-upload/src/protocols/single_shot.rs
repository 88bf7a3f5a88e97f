//! One request per upload: `PUT` the whole payload, or `POST` a source URL
//! for the destination to fetch.

use std::time::Duration;

use async_trait::async_trait;
use fanout_core::{Error, Result};
use reqwest::Client;

use super::http::{build_client, extract_id, json_body, transport_error, unexpected};
use crate::payload::ChunkBody;
use crate::protocol::{ChunkAck, FinalizeOutcome, ProcessingStatus, UploadProtocol};
use crate::session::UploadSession;

#[derive(Debug)]
pub struct SingleShotProtocol {
    client: Client,
    url: String,
    credential: String,
    source_url: Option<String>,
    id_field: String,
}

impl SingleShotProtocol {
    pub fn new(
        url: String,
        credential: String,
        source_url: Option<String>,
        id_field: String,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url,
            credential,
            source_url,
            id_field,
        })
    }

    fn unsupported(&self, op: &str) -> Error {
        Error::Internal(format!("single-shot upload has no {op} step"))
    }
}

#[async_trait]
impl UploadProtocol for SingleShotProtocol {
    fn name(&self) -> &'static str {
        "single_shot"
    }

    fn supports_offset_query(&self) -> bool {
        false
    }

    fn chunk_size(&self, _configured: u64, total_bytes: u64) -> u64 {
        total_bytes.max(1)
    }

    fn needs_payload(&self) -> bool {
        self.source_url.is_none()
    }

    async fn init(&self, _total_bytes: u64) -> Result<Option<String>> {
        Ok(None)
    }

    async fn send_chunk(
        &self,
        _session: &UploadSession,
        _start: u64,
        data: ChunkBody,
    ) -> Result<ChunkAck> {
        let len = data.len();
        let request = match &self.source_url {
            Some(source_url) => self
                .client
                .post(&self.url)
                .bearer_auth(&self.credential)
                .json(&serde_json::json!({ "source_url": source_url })),
            None => self
                .client
                .put(&self.url)
                .bearer_auth(&self.credential)
                .header(reqwest::header::CONTENT_TYPE, "video/mp4")
                .header(reqwest::header::CONTENT_LENGTH, len)
                .body(data.into_body()),
        };

        let resp = request
            .send()
            .await
            .map_err(|e| transport_error("upload", e))?;
        if !resp.status().is_success() {
            return Err(unexpected(resp, "upload", false).await);
        }

        let body = json_body(resp, "upload").await?;
        let artifact_id = extract_id(&body, &self.id_field).ok_or_else(|| {
            Error::upload_protocol(None, format!("response has no '{}' field", self.id_field))
        })?;
        Ok(ChunkAck::Complete {
            artifact_id: Some(artifact_id),
        })
    }

    async fn query_offset(&self, _session: &UploadSession) -> Result<u64> {
        Err(self.unsupported("offset query"))
    }

    async fn finalize(&self, _session: &UploadSession) -> Result<FinalizeOutcome> {
        Err(self.unsupported("finalize"))
    }

    async fn poll_status(&self, _session: &UploadSession) -> Result<ProcessingStatus> {
        Err(self.unsupported("status"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Payload, STREAM_THRESHOLD};
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn protocol(server: &MockServer, source_url: Option<&str>) -> SingleShotProtocol {
        SingleShotProtocol::new(
            format!("{}/videos", server.uri()),
            "tok".into(),
            source_url.map(String::from),
            "data.id".into(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn put_returns_artifact_id() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/videos"))
            .and(header("authorization", "Bearer tok"))
            .and(header("content-type", "video/mp4"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"data": {"id": "v1"}})))
            .expect(1)
            .mount(&server)
            .await;

        let proto = protocol(&server, None);
        let session = UploadSession::new("feed", server.uri(), 5, 5);
        let ack = proto
            .send_chunk(&session, 0, Bytes::from_static(b"hello").into())
            .await
            .unwrap();
        assert_eq!(ack, ChunkAck::Complete { artifact_id: Some("v1".into()) });

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].body, b"hello");
    }

    #[tokio::test]
    async fn large_file_is_streamed_with_its_length() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.mp4");
        let len = STREAM_THRESHOLD + 1;
        let contents: Vec<u8> = (0..=200u8).cycle().take(len as usize).collect();
        std::fs::write(&file, &contents).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/videos"))
            .and(header("content-length", len.to_string().as_str()))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"data": {"id": "big"}})))
            .expect(1)
            .mount(&server)
            .await;

        let payload = Payload::from_file(&file).await.unwrap();
        let body = payload.chunk_body(0, len).await.unwrap();
        assert_matches!(body, ChunkBody::Streamed { .. });

        let proto = protocol(&server, None);
        let session = UploadSession::new("feed", server.uri(), len, proto.chunk_size(10, len));
        let ack = proto.send_chunk(&session, 0, body).await.unwrap();
        assert_eq!(ack, ChunkAck::Complete { artifact_id: Some("big".into()) });

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].body.len() as u64, len);
        assert!(received[0].body == contents);
    }

    #[tokio::test]
    async fn url_pull_posts_source() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/videos"))
            .and(body_json(serde_json::json!({"source_url": "https://cdn/x.mp4"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {"id": 7}})))
            .mount(&server)
            .await;

        let proto = protocol(&server, Some("https://cdn/x.mp4"));
        assert!(!proto.needs_payload());
        let session = UploadSession::new("feed", server.uri(), 0, 1);
        let ack = proto.send_chunk(&session, 0, Bytes::new().into()).await.unwrap();
        assert_eq!(ack, ChunkAck::Complete { artifact_id: Some("7".into()) });
    }

    #[tokio::test]
    async fn rejection_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(413).set_body_string("too large"))
            .mount(&server)
            .await;

        let proto = protocol(&server, None);
        let session = UploadSession::new("feed", server.uri(), 3, 3);
        let err = proto
            .send_chunk(&session, 0, Bytes::from_static(b"abc").into())
            .await
            .unwrap_err();
        assert_matches!(err, Error::UploadProtocol { status: Some(413), .. });
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn missing_id_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let proto = protocol(&server, None);
        let session = UploadSession::new("feed", server.uri(), 1, 1);
        let err = proto.send_chunk(&session, 0, Bytes::from_static(b"a").into()).await.unwrap_err();
        assert_matches!(err, Error::UploadProtocol { .. });
    }
}
