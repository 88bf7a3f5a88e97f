//! Orchestrator runs against a fake media processor and mock destinations.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use bytes::Bytes;
use fanout_av::{
    HlsOptions, JobControl, SoftwareEngine, TranscodeEngine, TranscodeRequest, TrimMethod,
    TrimOutcome, Workspace,
};
use fanout_core::config::{Config, DestinationConfig, EndpointConfig, UploadOverrides};
use fanout_core::events::{progress_channel, ProgressKind, ProgressSender, RunStage};
use fanout_core::{
    DeliveryFormat, DestinationConstraint, Error, Result, SourceMedia, TranscodeProfile,
    TrimWindow, VideoCodec,
};
use fanout_media::{expected_segment_count, HlsBundle};
use fanout_pipeline::{DestinationOutcome, MediaProcessor, Orchestrator, Processing};
use fanout_rules::Resolution;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const MB: u64 = 1024 * 1024;

// -- Fake processor -----------------------------------------------------------

#[derive(Default)]
struct Calls {
    trims: Vec<TrimWindow>,
    transcodes: Vec<TranscodeProfile>,
    packages: usize,
}

/// Stands in for ffmpeg. Outputs are small files whose size is irrelevant;
/// the test asserts on what was requested.
struct FakeProcessor {
    source: SourceMedia,
    calls: Mutex<Calls>,
    crash_on_transcode: bool,
}

impl FakeProcessor {
    fn new(source: SourceMedia) -> Arc<Self> {
        Arc::new(Self {
            source,
            calls: Mutex::new(Calls::default()),
            crash_on_transcode: false,
        })
    }

    fn crashing(source: SourceMedia) -> Arc<Self> {
        Arc::new(Self {
            source,
            calls: Mutex::new(Calls::default()),
            crash_on_transcode: true,
        })
    }
}

#[async_trait]
impl MediaProcessor for FakeProcessor {
    async fn probe(&self, path: &Path) -> Result<SourceMedia> {
        if !path.exists() {
            return Err(Error::Probe(format!("cannot open {}", path.display())));
        }
        Ok(self.source.clone())
    }

    async fn engine(&self) -> Box<dyn TranscodeEngine> {
        Box::new(SoftwareEngine)
    }

    async fn trim(
        &self,
        _source: &SourceMedia,
        window: &TrimWindow,
        _max_file_size_bytes: u64,
        workspace: &Workspace,
        _control: &JobControl,
    ) -> Result<TrimOutcome> {
        self.calls.lock().unwrap().trims.push(*window);
        let path = workspace.temp_file("trimmed.mp4");
        std::fs::write(&path, vec![1u8; 64])?;
        Ok(TrimOutcome::Trimmed {
            path,
            method: TrimMethod::StreamCopy,
        })
    }

    async fn transcode(
        &self,
        _engine: &dyn TranscodeEngine,
        request: TranscodeRequest<'_>,
        workspace: &Workspace,
        control: &JobControl,
    ) -> Result<PathBuf> {
        if control.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.crash_on_transcode {
            panic!("encoder crashed");
        }
        self.calls.lock().unwrap().transcodes.push(request.profile.clone());
        let path = workspace.temp_file("transcoded.mp4");
        std::fs::write(&path, vec![2u8; 96])?;
        Ok(path)
    }

    async fn package_hls(
        &self,
        input: &Path,
        _codec: VideoCodec,
        duration_secs: f64,
        options: &HlsOptions,
        _workspace: &Workspace,
        _control: &JobControl,
    ) -> Result<HlsBundle> {
        self.calls.lock().unwrap().packages += 1;
        let data = std::fs::read(input)?;
        let seg = options.segment_duration_secs as f64;
        let count = expected_segment_count(duration_secs, seg);
        let parts = (0..count)
            .map(|i| {
                let dur = (duration_secs - i as f64 * seg).min(seg);
                (dur, Bytes::from(data.clone()))
            })
            .collect();
        let bundle = HlsBundle::assemble(parts, "payload.ts", Some(Bytes::from_static(b"\xFF\xD8jpeg")))?;
        bundle.verify(duration_secs, seg)?;
        Ok(bundle)
    }
}

// -- Fixtures -----------------------------------------------------------------

struct SourceFile {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

fn source_file(len: usize) -> SourceFile {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("source.mp4");
    std::fs::write(&path, (0..len).map(|i| (i % 256) as u8).collect::<Vec<_>>()).unwrap();
    SourceFile { _dir: dir, path }
}

/// The 400 s, 2160p, 900 MB source.
fn uhd_source(path: &Path) -> SourceMedia {
    SourceMedia {
        path: path.to_path_buf(),
        duration_secs: 400.0,
        width: 3840,
        height: 2160,
        frame_rate: Some(30.0),
        byte_size: 900 * MB,
        video_codec: VideoCodec::H265,
        has_audio: true,
    }
}

fn small_source(path: &Path, duration_secs: f64, byte_size: u64) -> SourceMedia {
    SourceMedia {
        path: path.to_path_buf(),
        duration_secs,
        width: 1280,
        height: 720,
        frame_rate: Some(30.0),
        byte_size,
        video_codec: VideoCodec::H264,
        has_audio: true,
    }
}

fn constraint(max_secs: f64, max_bytes: u64, max_width: u32) -> DestinationConstraint {
    DestinationConstraint {
        min_duration_secs: 3.0,
        max_duration_secs: max_secs,
        max_file_size_bytes: max_bytes,
        max_width,
        max_frame_rate: 60.0,
    }
}

fn destination(name: &str, constraint: DestinationConstraint, endpoint: EndpointConfig) -> DestinationConfig {
    DestinationConfig {
        name: name.into(),
        constraint,
        credential: format!("{name}-token"),
        endpoint,
        delivery: DeliveryFormat::File,
        upload: Some(UploadOverrides {
            chunk_size_bytes: Some(10),
            poll_interval_ms: Some(10),
            max_poll_attempts: Some(5),
            request_timeout_secs: Some(1),
            ..Default::default()
        }),
    }
}

fn single_shot(server: &MockServer, route: &str) -> EndpointConfig {
    EndpointConfig::SingleShot {
        url: format!("{}{route}", server.uri()),
        source_url: None,
        id_field: "id".into(),
    }
}

fn orchestrator(processor: Arc<FakeProcessor>, destinations: Vec<DestinationConfig>) -> Orchestrator {
    let config = Config {
        destinations,
        ..Config::default()
    };
    Orchestrator::new(Arc::new(config), processor)
}

async fn mount_single_shot(server: &MockServer, route: &str, id: &str) {
    Mock::given(method("PUT"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": id })))
        .mount(server)
        .await;
}

/// Byte-range destination that commits whatever chunk it receives.
struct CommitEverything {
    total: u64,
    artifact: &'static str,
}

impl Respond for CommitEverything {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let end: u64 = range
            .trim_start_matches("bytes ")
            .split(['-', '/'])
            .nth(1)
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        if end + 1 == self.total {
            ResponseTemplate::new(201).set_body_json(json!({ "id": self.artifact }))
        } else {
            ResponseTemplate::new(308).insert_header("Range", format!("bytes=0-{end}").as_str())
        }
    }
}

// -- Tests --------------------------------------------------------------------

#[tokio::test]
async fn uhd_source_is_transcoded_within_limits() {
    let server = MockServer::start().await;
    mount_single_shot(&server, "/videos", "v-1").await;

    let file = source_file(32);
    let processor = FakeProcessor::new(uhd_source(&file.path));
    let orch = orchestrator(
        Arc::clone(&processor),
        vec![destination("reels", constraint(180.0, 512 * MB, 1920), single_shot(&server, "/videos"))],
    );

    let report = orch
        .run(&file.path, &ProgressSender::noop(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.delivered(), 1);

    let DestinationOutcome::Delivered(ref delivered) = report.destinations[0] else {
        panic!("expected delivery, got {:?}", report.destinations[0]);
    };
    assert_eq!(delivered.artifact_id.as_deref(), Some("v-1"));
    assert!(delivered.output_duration_secs <= 180.0);
    assert_matches!(delivered.processing, Processing::Transcoded { .. });

    let Resolution::Transcode { ref profile } = delivered.resolution else {
        panic!("expected a transcode, got {:?}", delivered.resolution);
    };
    assert!(profile.width <= 1920 && profile.width % 2 == 0);
    assert_eq!(profile.height % 2, 0);
    assert_eq!((profile.width, profile.height), (1920, 1080));
    assert_eq!(profile.trim, Some(TrimWindow::leading(180.0)));

    // 512 MiB over 180 s leaves well over the floor for video.
    let video_bits = profile.video_bitrate_kbps as f64 * 1024.0 * 180.0;
    let audio_bits = profile.audio_bitrate_bps as f64 * 180.0;
    assert!((video_bits + audio_bits) / 8.0 <= (512 * MB) as f64);

    let calls = processor.calls.lock().unwrap();
    assert_eq!(calls.transcodes.len(), 1);
    assert!(calls.trims.is_empty());
}

#[tokio::test]
async fn long_source_that_fits_after_cutting_is_only_trimmed() {
    let server = MockServer::start().await;
    mount_single_shot(&server, "/clips", "c-7").await;

    let file = source_file(32);
    let processor = FakeProcessor::new(small_source(&file.path, 400.0, 400 * MB));
    let orch = orchestrator(
        Arc::clone(&processor),
        vec![destination("clips", constraint(180.0, 512 * MB, 1920), single_shot(&server, "/clips"))],
    );

    let report = orch
        .run(&file.path, &ProgressSender::noop(), &CancellationToken::new())
        .await
        .unwrap();
    let DestinationOutcome::Delivered(ref delivered) = report.destinations[0] else {
        panic!("expected delivery");
    };
    assert_eq!(
        delivered.processing,
        Processing::Trimmed {
            method: TrimMethod::StreamCopy
        }
    );
    assert_eq!(delivered.output_duration_secs, 180.0);
    assert_eq!(delivered.output_bytes, 64);

    let calls = processor.calls.lock().unwrap();
    assert_eq!(calls.trims, vec![TrimWindow::leading(180.0)]);
    assert!(calls.transcodes.is_empty());
}

#[tokio::test]
async fn rejected_destination_does_not_block_the_others() {
    let server = MockServer::start().await;
    mount_single_shot(&server, "/ok", "ok-1").await;

    let file = source_file(40);
    let processor = FakeProcessor::new(small_source(&file.path, 20.0, 40));
    let mut strict = constraint(600.0, 512 * MB, 1920);
    strict.min_duration_secs = 60.0;
    let orch = orchestrator(
        Arc::clone(&processor),
        vec![
            destination("longform", strict, single_shot(&server, "/never")),
            destination("feed", constraint(600.0, 512 * MB, 1920), single_shot(&server, "/ok")),
        ],
    );

    let report = orch
        .run(&file.path, &ProgressSender::noop(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.destinations[0].destination(), "longform");
    assert_matches!(
        &report.destinations[0],
        DestinationOutcome::Failed(f) if f.stage == RunStage::Resolve
            && matches!(f.error, Error::Rejected(_))
    );
    assert_matches!(&report.destinations[1], DestinationOutcome::Delivered(d) if d.processing == Processing::Original);

    // Rejection happens before any processing.
    let calls = processor.calls.lock().unwrap();
    assert!(calls.trims.is_empty() && calls.transcodes.is_empty());
}

#[tokio::test]
async fn crashed_destination_still_reports_failure() {
    let server = MockServer::start().await;
    mount_single_shot(&server, "/archive", "a-1").await;

    let file = source_file(32);
    let processor = FakeProcessor::crashing(uhd_source(&file.path));
    let orch = orchestrator(
        Arc::clone(&processor),
        vec![
            destination("reels", constraint(180.0, 512 * MB, 1920), single_shot(&server, "/never")),
            destination("archive", constraint(600.0, 2048 * MB, 3840), single_shot(&server, "/archive")),
        ],
    );

    let (tx, mut rx) = progress_channel(256);
    let report = orch
        .run(&file.path, &tx, &CancellationToken::new())
        .await
        .unwrap();
    drop(tx);

    assert_matches!(
        &report.destinations[0],
        DestinationOutcome::Failed(f) if f.stage == RunStage::Transcode
            && matches!(f.error, Error::Internal(_))
    );
    assert_matches!(&report.destinations[1], DestinationOutcome::Delivered(d) if d.processing == Processing::Original);

    let mut terminal = Vec::new();
    while let Some(event) = rx.recv().await {
        if matches!(event.kind, ProgressKind::Failed | ProgressKind::Completed) {
            terminal.push((event.destination, event.kind, event.stage));
        }
    }
    assert!(terminal.contains(&("reels".to_string(), ProgressKind::Failed, RunStage::Transcode)));
    assert_eq!(terminal.iter().filter(|(d, ..)| d == "reels").count(), 1);
    assert_eq!(terminal.iter().filter(|(d, ..)| d == "archive").count(), 1);
}

#[tokio::test]
async fn upload_interrupted_after_forty_percent_completes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).insert_header("Location", "/session/1"))
        .mount(&server)
        .await;
    // Chunk five of ten never answers in time and is not stored.
    Mock::given(method("PUT"))
        .and(header("content-range", "bytes 40-49/100"))
        .respond_with(ResponseTemplate::new(308).set_delay(Duration::from_secs(3)))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(header("content-range", "bytes */100"))
        .respond_with(ResponseTemplate::new(308).insert_header("Range", "bytes=0-39"))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/session/1"))
        .and(header_regex("content-range", r"^bytes \d+-\d+/100$"))
        .respond_with(CommitEverything {
            total: 100,
            artifact: "vid-42",
        })
        .mount(&server)
        .await;

    let file = source_file(100);
    let processor = FakeProcessor::new(small_source(&file.path, 30.0, 100));
    let endpoint = EndpointConfig::Resumable {
        session_url: None,
        initiate_url: Some(format!("{}/upload", server.uri())),
        id_field: "id".into(),
    };
    let orch = orchestrator(
        processor,
        vec![destination("tube", constraint(600.0, 512 * MB, 1920), endpoint)],
    );

    let (tx, mut rx) = progress_channel(256);
    let report = orch
        .run(&file.path, &tx, &CancellationToken::new())
        .await
        .unwrap();

    let DestinationOutcome::Delivered(ref delivered) = report.destinations[0] else {
        panic!("expected delivery, got {:?}", report.destinations[0]);
    };
    assert_eq!(delivered.artifact_id.as_deref(), Some("vid-42"));
    assert_eq!(delivered.upload.resumes, 1);
    assert_eq!(delivered.upload.total_bytes, 100);

    // Bytes 40-49 went out twice (lost, then resent); every other range once.
    let chunk_ranges: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter_map(|r| r.headers.get("content-range")?.to_str().ok().map(str::to_string))
        .filter(|r| !r.contains('*'))
        .collect();
    let expected: Vec<String> = (0..10)
        .flat_map(|i| {
            let range = format!("bytes {}-{}/100", i * 10, i * 10 + 9);
            if i == 4 {
                vec![range.clone(), range]
            } else {
                vec![range]
            }
        })
        .collect();
    assert_eq!(chunk_ranges, expected);

    drop(tx);
    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event);
    }
    let last = last.unwrap();
    assert_eq!(last.kind, ProgressKind::Completed);
    assert_eq!(last.destination, "tube");
}

#[tokio::test]
async fn hls_delivery_uploads_bundle_through_chunked_protocol() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("command=INIT"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"media_id_string": "m-9"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("command", "APPEND"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("command=FINALIZE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"media_id_string": "m-9", "processing_info": {"state": "pending"}}),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("command", "STATUS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"media_id_string": "m-9", "processing_info": {"state": "succeeded"}}),
        ))
        .mount(&server)
        .await;

    let file = source_file(25);
    let processor = FakeProcessor::new(small_source(&file.path, 14.0, 25));
    let mut dest = destination(
        "social",
        constraint(140.0, 512 * MB, 1920),
        EndpointConfig::Chunked {
            url: format!("{}/media/upload", server.uri()),
            media_type: "video/mp2t".into(),
            media_category: "amplify_video".into(),
        },
    );
    dest.delivery = DeliveryFormat::Hls;
    let orch = orchestrator(Arc::clone(&processor), vec![dest]);

    let report = orch
        .run(&file.path, &ProgressSender::noop(), &CancellationToken::new())
        .await
        .unwrap();
    let DestinationOutcome::Delivered(ref delivered) = report.destinations[0] else {
        panic!("expected delivery, got {:?}", report.destinations[0]);
    };
    assert_eq!(delivered.artifact_id.as_deref(), Some("m-9"));
    assert_eq!(delivered.upload.status_polls, 1);

    let hls = delivered.hls.as_ref().unwrap();
    // 14 s at 6 s segments.
    assert_eq!(hls.segment_count, 3);
    assert_eq!(hls.manifest.matches("#EXT-X-BYTERANGE").count(), 3);
    assert!(hls.thumbnail_bytes > 0);
    assert_eq!(delivered.output_bytes, 75);
    assert_eq!(processor.calls.lock().unwrap().packages, 1);
}

#[tokio::test]
async fn cancelled_run_fails_every_destination() {
    let server = MockServer::start().await;
    let file = source_file(16);
    let processor = FakeProcessor::new(uhd_source(&file.path));
    let orch = orchestrator(
        processor,
        vec![
            destination("a", constraint(180.0, 512 * MB, 1920), single_shot(&server, "/a")),
            destination("b", constraint(180.0, 512 * MB, 1280), single_shot(&server, "/b")),
        ],
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = orch
        .run(&file.path, &ProgressSender::noop(), &cancel)
        .await
        .unwrap();

    assert_eq!(report.failed(), 2);
    for outcome in &report.destinations {
        assert_matches!(outcome, DestinationOutcome::Failed(f) if matches!(f.error, Error::Cancelled));
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn unreadable_source_fails_the_whole_run() {
    let processor = FakeProcessor::new(small_source(Path::new("/missing.mp4"), 10.0, 10));
    let orch = orchestrator(
        processor,
        vec![destination(
            "x",
            constraint(60.0, MB, 1920),
            EndpointConfig::SingleShot {
                url: "http://127.0.0.1:9/never".into(),
                source_url: None,
                id_field: "id".into(),
            },
        )],
    );

    let (tx, mut rx) = progress_channel(8);
    let err = orch
        .run(Path::new("/missing.mp4"), &tx, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_matches!(err, Error::Probe(_));

    let event = rx.recv().await.unwrap();
    assert_eq!(event.kind, ProgressKind::Failed);
    assert_eq!(event.stage, RunStage::Probe);
}

#[tokio::test]
async fn plan_resolves_each_destination_without_work() {
    let file = source_file(8);
    let processor = FakeProcessor::new(uhd_source(&file.path));
    let unused = EndpointConfig::SingleShot {
        url: "http://127.0.0.1:9/".into(),
        source_url: None,
        id_field: "id".into(),
    };
    let orch = orchestrator(
        Arc::clone(&processor),
        vec![
            destination("wide", constraint(600.0, 2048 * MB, 3840), unused.clone()),
            destination("narrow", constraint(180.0, 512 * MB, 1280), unused),
        ],
    );

    let media = orch.probe(&file.path).await.unwrap();
    let plans = orch.plan(&media);
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0].plan.resolution, Resolution::NoAction);
    assert_matches!(
        plans[1].plan.resolution,
        Resolution::Transcode { ref profile } if profile.width == 1280 && profile.height == 720
    );
    let calls = processor.calls.lock().unwrap();
    assert!(calls.trims.is_empty() && calls.transcodes.is_empty());
}
