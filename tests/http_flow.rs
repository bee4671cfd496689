use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tutor_jobs::{
    AsyncJobClient, JobError, ProgressEvent,
    chat::{ChatTurn, ChatTurnSubmitter},
    config::Config,
    ocr::{BlockKind, CaptureSubmitter, ImageUpload},
    poll::ProgressFn,
    transport::{HttpTransport, JobStatus, JobTransport},
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves `responses` in order, then repeats the last one.
struct Sequence {
    responses: Vec<ResponseTemplate>,
    calls: AtomicUsize,
}

impl Sequence {
    fn new(responses: Vec<ResponseTemplate>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Respond for Sequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses[n.min(self.responses.len() - 1)].clone()
    }
}

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": data}))
}

fn config_for(server: &MockServer) -> Config {
    let mut cfg = Config::default();
    cfg.api.base_url = format!("{}/api", server.uri());
    cfg.api.token_env = String::new();
    cfg.ocr.interval_ms = 10;
    cfg.chat.interval_ms = 10;
    cfg
}

fn recorder() -> (ProgressFn, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let f: ProgressFn = Box::new(move |ev: &ProgressEvent| sink.lock().unwrap().push(ev.percent));
    (f, seen)
}

#[tokio::test]
async fn ocr_capture_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ocr/upload"))
        .respond_with(ok(json!({"jobId": "abc"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ocr/job/abc"))
        .respond_with(Sequence::new(vec![
            ok(json!({"status": "waiting", "progress": 10})),
            ok(json!({"status": "active", "progress": 60})),
            ok(json!({"status": "completed", "progress": 100, "result": {
                "blocks": [{"type": "formula", "latex": "x^2 + 2x + 1 = 0", "confidence": 0.94}],
                "markdown": "$$x^2 + 2x + 1 = 0$$"
            }})),
        ]))
        .expect(3)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let client = AsyncJobClient::new(HttpTransport::new(&cfg).unwrap());
    let submitter = CaptureSubmitter::new(client, &cfg);
    let (on_progress, seen) = recorder();

    let jpeg = ImageUpload::new("homework.jpg", "image/jpeg", vec![0xFF; 2 * 1024 * 1024]);
    let capture = submitter
        .capture(jpeg, Some(on_progress), None)
        .await
        .expect("capture succeeds");

    assert_eq!(capture.job_id, "abc");
    assert_eq!(capture.attempts, 3);
    assert_eq!(*seen.lock().unwrap(), vec![10, 60]);
    assert_eq!(capture.result.blocks.len(), 1);
    assert_eq!(capture.result.blocks[0].kind, BlockKind::Formula);
    assert_eq!(
        capture.result.blocks[0].latex.as_deref(),
        Some("x^2 + 2x + 1 = 0")
    );
    assert_eq!(capture.result.quality_score, Some(0.94));
}

#[tokio::test]
async fn rejected_submission_is_typed_and_never_polled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ocr/upload"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(json!({"success": false, "error": {"message": "queue full"}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ok(json!({"status": "completed"})))
        .expect(0)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let submitter = CaptureSubmitter::new(AsyncJobClient::new(HttpTransport::new(&cfg).unwrap()), &cfg);
    let err = submitter
        .capture(ImageUpload::new("a.png", "image/png", vec![1; 64]), None, None)
        .await
        .unwrap_err();

    match err {
        JobError::Submission(msg) => assert!(msg.contains("queue full"), "{msg}"),
        other => panic!("expected submission error, got {other:?}"),
    }
}

#[tokio::test]
async fn success_false_envelope_is_a_submission_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/agent/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "error": {"message": "not enrolled"}})),
        )
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let submitter = ChatTurnSubmitter::new(AsyncJobClient::new(HttpTransport::new(&cfg).unwrap()), &cfg);
    let err = submitter
        .ask(ChatTurn::new("help"), None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Submission(ref m) if m == "not enrolled"));
}

#[tokio::test]
async fn invalid_image_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok(json!({"jobId": "nope"})))
        .expect(0)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let submitter = CaptureSubmitter::new(AsyncJobClient::new(HttpTransport::new(&cfg).unwrap()), &cfg);
    let err = submitter
        .capture(ImageUpload::new("a.gif", "image/gif", vec![1; 64]), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));
}

#[tokio::test]
async fn chat_turn_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/agent/chat"))
        .and(body_partial_json(json!({
            "message": "How do I factor this?",
            "gradeLevel": "8",
            "topic": "quadratics",
            "problem": "x^2 - 5x + 6 = 0",
        })))
        .respond_with(ok(json!({"jobId": "c1", "sessionId": "s1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/agent/chat/c1"))
        .respond_with(Sequence::new(vec![
            ok(json!({"status": "active", "progress": 45})),
            ok(json!({"status": "completed", "result": {
                "reply": "Look for two numbers that multiply to 6 and add to -5.",
                "richContent": [{"type": "math", "latex": "(x-2)(x-3)=0"}, "Then solve each factor."]
            }})),
        ]))
        .expect(2)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let submitter = ChatTurnSubmitter::new(AsyncJobClient::new(HttpTransport::new(&cfg).unwrap()), &cfg);
    let turn = ChatTurn {
        message: "How do I factor this?".into(),
        grade_level: Some("8".into()),
        topic: Some("quadratics".into()),
        problem: Some("x^2 - 5x + 6 = 0".into()),
        session_id: None,
    };
    let exchange = submitter.ask(turn, None, None).await.unwrap();

    assert_eq!(exchange.job_id, "c1");
    assert_eq!(
        exchange.reply.message,
        "Look for two numbers that multiply to 6 and add to -5."
    );
    assert_eq!(exchange.reply.blocks.len(), 2);
    assert_eq!(exchange.reply.blocks[0].kind, "math");
    assert_eq!(exchange.reply.blocks[0].content, "(x-2)(x-3)=0");
    assert_eq!(exchange.reply.blocks[1].kind, "text");
    assert_eq!(exchange.reply.session_id.as_deref(), Some("s1"));
}

#[tokio::test]
async fn chat_that_never_finishes_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/agent/chat"))
        .respond_with(ok(json!({"jobId": "slow"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/agent/chat/slow"))
        .respond_with(ok(json!({"status": "active", "progress": 20})))
        .expect(3)
        .mount(&server)
        .await;

    let mut cfg = config_for(&server);
    cfg.chat.max_attempts = 3;
    let submitter = ChatTurnSubmitter::new(AsyncJobClient::new(HttpTransport::new(&cfg).unwrap()), &cfg);
    let err = submitter
        .ask(ChatTurn::new("still there?"), None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Timeout { attempts: 3, .. }));
    assert_eq!(
        err.user_message().as_deref(),
        Some("This is taking too long. Please try again in a moment.")
    );
}

#[tokio::test]
async fn server_errors_while_polling_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ocr/job/j9"))
        .respond_with(Sequence::new(vec![
            ResponseTemplate::new(502),
            ResponseTemplate::new(200).set_body_string("<html>gateway</html>"),
            ok(json!({"status": "completed", "result": "plain text result"})),
        ]))
        .expect(3)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let submitter = CaptureSubmitter::new(AsyncJobClient::new(HttpTransport::new(&cfg).unwrap()), &cfg);
    let capture = submitter.watch("j9", None, None).await.unwrap();

    assert_eq!(capture.attempts, 3);
    assert_eq!(capture.result.text, "plain text result");
}

#[tokio::test]
async fn status_fetch_sends_bearer_token_and_decodes_error_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ocr/job/j1"))
        .and(header("authorization", "Bearer sekret"))
        .respond_with(ok(json!({"status": "failed", "error": "bad image"})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::with_options(
        &format!("{}/api/", server.uri()),
        Some("sekret".into()),
        Duration::from_secs(5),
        "tutor-jobs-test",
    )
    .unwrap();
    let snap = transport.fetch_status("/ocr/job/", "j1").await.unwrap();

    assert_eq!(snap.status, JobStatus::Failed);
    assert_eq!(snap.error.as_deref(), Some("bad image"));
}
