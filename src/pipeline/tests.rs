use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;

use super::*;
use crate::crypto::{signature, LarkCipher, TencentCodec};
use crate::db::{self, MeetingKey, MeetingStore, ProcessingStatus, SqliteMeetingStore};
use crate::events::{Provider, WebhookEnvelope};
use crate::queue::{EnqueueOutcome, JobStatus, JobType, Worker};
use crate::recording::{RecordingApiError, RecordingInfo, TranscriptRequest};

const TOKEN: &str = "callback-token";
const ENCODING_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY";
const MINUTE_TOKEN: &str = "obcnq3b9jl72l83w4f149w9c";

struct FakeRecordings {
    /// Calls answered with "no URL yet" before the URL shows up.
    empty_calls: usize,
    /// Never produce a URL.
    never: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl RecordingApi for FakeRecordings {
    async fn get_recording(&self, _meeting_id: &str) -> Result<RecordingInfo, RecordingApiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.never || call < self.empty_calls {
            return Ok(RecordingInfo { url: None });
        }
        Ok(RecordingInfo {
            url: Some(format!("https://meetings.feishu.cn/minutes/{}", MINUTE_TOKEN)),
        })
    }
}

struct FakeTranscripts {
    result: Result<String, RecordingApiError>,
}

#[async_trait]
impl TranscriptApi for FakeTranscripts {
    async fn fetch_transcript(&self, request: &TranscriptRequest) -> Result<String, RecordingApiError> {
        assert_eq!(request.file_id, MINUTE_TOKEN);
        self.result.clone()
    }
}

struct Harness {
    ingestor: Ingestor,
    worker: Worker,
    store: SqliteMeetingStore,
    queue: JobQueue,
    inflight: InflightRegistry,
    conn: db::SharedConnection,
}

impl Harness {
    fn new(lark: Option<LarkApis>) -> Self {
        let conn = Connection::open_in_memory().unwrap();
        db::migrate(&conn).unwrap();
        let conn = db::shared(conn);

        let store = SqliteMeetingStore::new(conn.clone());
        let queue = JobQueue::new(conn.clone());
        let inflight = InflightRegistry::new(conn.clone(), Duration::from_secs(600));

        let ctx = PipelineContext {
            store: Arc::new(store.clone()),
            queue: queue.clone(),
            inflight: inflight.clone(),
            settings: PipelineSettings {
                transcript_delay: Duration::ZERO,
                poll_max_attempts: 3,
                poll_interval: Duration::ZERO,
            },
            tencent_transcripts: None,
            lark,
        };

        let ingestor = Ingestor::new(
            Some(TencentIngest {
                token: TOKEN.to_string(),
                codec: TencentCodec::from_encoding_key(ENCODING_KEY).unwrap(),
            }),
            Some(LarkIngest {
                cipher: Some(LarkCipher::new("lark-key")),
                verification_token: None,
            }),
            queue.clone(),
        );
        let worker = Worker::new(
            0,
            queue.clone(),
            Arc::new(PipelineProcessor::new(ctx)),
            Duration::from_millis(10),
        );

        Self {
            ingestor,
            worker,
            store,
            queue,
            inflight,
            conn,
        }
    }

    fn tencent_envelope(&self, plaintext: &str) -> WebhookEnvelope {
        let data = TencentCodec::from_encoding_key(ENCODING_KEY)
            .unwrap()
            .encrypt(plaintext);
        let sig = signature::compute_signature(TOKEN, "1700000000", "7", &data);
        WebhookEnvelope::new(Provider::Tencent, "1700000000", "7", sig, data)
    }

    /// Run jobs until the queue has nothing due.
    async fn drain(&self) -> usize {
        let mut ran = 0;
        while self.worker.run_once().await.unwrap() {
            ran += 1;
            assert!(ran < 20, "queue did not drain");
        }
        ran
    }

    fn meeting_count(&self) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM meetings", [], |row| row.get(0))
            .unwrap()
    }
}

const RECORDING_COMPLETED: &str = r#"{
    "event": "recording.completed",
    "trace_id": "t-42",
    "payload": [{
        "operate_time": 1700003700000,
        "meeting_info": {
            "meeting_id": "m-100",
            "meeting_code": "987654321",
            "subject": "Quarterly review",
            "creator": {"userid": "u-7", "user_name": "Morgan"},
            "meeting_type": 0,
            "start_time": 1700000000,
            "end_time": 1700003600
        },
        "recording_files": [{"record_file_id": "rf-100"}]
    }]
}"#;

fn lark_event(cipher: &LarkCipher) -> String {
    let event = r#"{
        "schema": "2.0",
        "header": {"event_id": "e-9", "event_type": "vc.meeting.all_meeting_ended_v1"},
        "event": {"meeting": {"id": "om-9", "topic": "Retro", "start_time": "1700000000", "end_time": "1700001800"}}
    }"#;
    serde_json::json!({ "encrypt": cipher.encrypt(event) }).to_string()
}

#[tokio::test]
async fn test_recording_completed_end_to_end() {
    let h = Harness::new(None);

    let outcome = h
        .ingestor
        .ingest_tencent(h.tencent_envelope(RECORDING_COMPLETED))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Enqueued(EnqueueOutcome::Enqueued(_))));
    assert_eq!(h.drain().await, 1);

    let key = MeetingKey::new(Provider::Tencent, "m-100", None);
    let meeting = h.store.find_by_natural_key(&key).await.unwrap().unwrap();
    assert!(meeting.has_recording);
    assert_eq!(meeting.subject.as_deref(), Some("Quarterly review"));
    assert_eq!(meeting.host_name.as_deref(), Some("Morgan"));
    assert_eq!(meeting.processing_status, ProcessingStatus::Completed);

    let files = h.store.list_recording_files(&key).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_object_id, "rf-100");

    // Redelivery after completion is a no-op.
    let outcome = h
        .ingestor
        .ingest_tencent(h.tencent_envelope(RECORDING_COMPLETED))
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Enqueued(EnqueueOutcome::AlreadyCompleted));
    assert_eq!(h.drain().await, 0);
    assert_eq!(h.meeting_count(), 1);
}

#[tokio::test]
async fn test_recording_completed_schedules_tencent_transcript() {
    let conn = Connection::open_in_memory().unwrap();
    db::migrate(&conn).unwrap();
    let conn = db::shared(conn);
    let queue = JobQueue::new(conn.clone());

    let ctx = PipelineContext {
        store: Arc::new(SqliteMeetingStore::new(conn.clone())),
        queue: queue.clone(),
        inflight: InflightRegistry::new(conn.clone(), Duration::from_secs(60)),
        settings: PipelineSettings::default(),
        tencent_transcripts: Some(Arc::new(FakeTranscripts {
            result: Ok(String::new()),
        })),
        lark: None,
    };
    let event = crate::events::parser::parse(RECORDING_COMPLETED).unwrap();
    let report = handlers::build_dispatcher(ctx)
        .dispatch(event.provider, event.kind.unwrap(), event.payloads)
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    let job = queue
        .find_by_key("tencent:fetch_transcript:m-100:-:rf-100")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.job_type, JobType::TencentFetchTranscript);
    // Delayed, not due yet.
    assert!(job.next_run_at > crate::queue::store::now_millis() + 60_000);
}

#[tokio::test]
async fn test_lark_meeting_resolves_and_fetches_transcript() {
    let recordings = Arc::new(FakeRecordings {
        empty_calls: 1,
        never: false,
        calls: AtomicUsize::new(0),
    });
    let h = Harness::new(Some(LarkApis {
        recordings: recordings.clone(),
        transcripts: Arc::new(FakeTranscripts {
            result: Ok("Speaker 1: hello".to_string()),
        }),
    }));

    let reply = h
        .ingestor
        .ingest_lark(&lark_event(&LarkCipher::new("lark-key")))
        .await
        .unwrap();
    assert!(matches!(reply, LarkReply::Accepted(IngestOutcome::Enqueued(_))));

    // event, resolve, fetch
    assert_eq!(h.drain().await, 3);
    assert_eq!(recordings.calls.load(Ordering::SeqCst), 2);

    let key = MeetingKey::new(Provider::Lark, "om-9", None);
    let meeting = h.store.find_by_natural_key(&key).await.unwrap().unwrap();
    assert_eq!(meeting.processing_status, ProcessingStatus::Completed);
    assert!(meeting.has_recording);
    assert_eq!(meeting.duration_seconds, Some(1800));

    let transcript = h.store.get_transcript(&key, MINUTE_TOKEN).await.unwrap().unwrap();
    assert_eq!(transcript.text, "Speaker 1: hello");
    assert_eq!(h.inflight.owner(MINUTE_TOKEN).await.unwrap(), None);
}

#[tokio::test]
async fn test_lark_meeting_without_recording_completes() {
    let h = Harness::new(Some(LarkApis {
        recordings: Arc::new(FakeRecordings {
            empty_calls: 0,
            never: true,
            calls: AtomicUsize::new(0),
        }),
        transcripts: Arc::new(FakeTranscripts {
            result: Ok(String::new()),
        }),
    }));

    h.ingestor
        .ingest_lark(&lark_event(&LarkCipher::new("lark-key")))
        .await
        .unwrap();
    assert_eq!(h.drain().await, 2);

    let key = MeetingKey::new(Provider::Lark, "om-9", None);
    let meeting = h.store.find_by_natural_key(&key).await.unwrap().unwrap();
    assert_eq!(meeting.processing_status, ProcessingStatus::Completed);
    assert_eq!(meeting.recording_status.as_deref(), Some("unavailable"));
    assert!(!meeting.has_recording);
}

#[tokio::test]
async fn test_fatal_transcript_failure_marks_meeting_failed() {
    let h = Harness::new(Some(LarkApis {
        recordings: Arc::new(FakeRecordings {
            empty_calls: 0,
            never: false,
            calls: AtomicUsize::new(0),
        }),
        transcripts: Arc::new(FakeTranscripts {
            result: Err(RecordingApiError::Unauthorized),
        }),
    }));

    h.ingestor
        .ingest_lark(&lark_event(&LarkCipher::new("lark-key")))
        .await
        .unwrap();
    assert_eq!(h.drain().await, 3);

    let dead = h.queue.list_dead(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_type, JobType::LarkFetchTranscript);
    assert_eq!(dead[0].status, JobStatus::Dead);

    let key = MeetingKey::new(Provider::Lark, "om-9", None);
    let meeting = h.store.find_by_natural_key(&key).await.unwrap().unwrap();
    assert_eq!(meeting.processing_status, ProcessingStatus::Failed);
    assert_eq!(h.inflight.owner(MINUTE_TOKEN).await.unwrap(), None);
}

#[tokio::test]
async fn test_token_held_elsewhere_skips_fetch() {
    let h = Harness::new(Some(LarkApis {
        recordings: Arc::new(FakeRecordings {
            empty_calls: 0,
            never: false,
            calls: AtomicUsize::new(0),
        }),
        transcripts: Arc::new(FakeTranscripts {
            result: Ok("unused".to_string()),
        }),
    }));
    assert!(h.inflight.try_acquire(MINUTE_TOKEN, "other-worker").await.unwrap());

    h.ingestor
        .ingest_lark(&lark_event(&LarkCipher::new("lark-key")))
        .await
        .unwrap();
    // event, resolve; no fetch job
    assert_eq!(h.drain().await, 2);

    let key = MeetingKey::new(Provider::Lark, "om-9", None);
    assert!(h.store.get_transcript(&key, MINUTE_TOKEN).await.unwrap().is_none());
    assert_eq!(
        h.inflight.owner(MINUTE_TOKEN).await.unwrap().as_deref(),
        Some("other-worker")
    );
}
