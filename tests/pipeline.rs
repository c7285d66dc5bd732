//! Offline pipeline tests.
//!
//! A scripted [`ModelBackend`] stands in for the vision model, so these run
//! in CI without API keys. Each test scripts the replies per stage and page,
//! then checks both the result and the exact sequence of calls made.

use async_trait::async_trait;
use mathscribe::{
    analyze_sync, AnalysisConfig, AnalysisError, AnalysisProgressCallback, AnalysisRequest,
    BackendError, CancelToken, ConfidencePolicy, ErrorKind, ImageLoadError, ImageRef,
    ImageSource, MathExercise, MathExerciseAnalyzer, ModelBackend, ModelReply, ModelRequest,
    Stage,
};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// One call seen by the scripted backend.
#[derive(Debug, Clone)]
struct Call {
    stage: Stage,
    page: Option<usize>,
    user: String,
    has_image: bool,
    session_id: String,
}

type Script = dyn Fn(&ModelRequest) -> Result<String, BackendError> + Send + Sync;

struct ScriptedBackend {
    script: Box<Script>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    fn new(script: impl Fn(&ModelRequest) -> Result<String, BackendError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            delay: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn slow(
        delay: Duration,
        script: impl Fn(&ModelRequest) -> Result<String, BackendError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            delay: Some(delay),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn trace(&self) -> Vec<(Stage, Option<usize>)> {
        self.calls().into_iter().map(|c| (c.stage, c.page)).collect()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelReply, BackendError> {
        self.calls.lock().unwrap().push(Call {
            stage: request.stage,
            page: request.page,
            user: request.user.clone(),
            has_image: request.image.is_some(),
            session_id: request.session_id.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = (self.script)(request)?;
        Ok(ModelReply {
            content,
            input_tokens: 100,
            output_tokens: 10,
        })
    }
}

/// A tiny valid PNG.
fn png() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        4,
        4,
        image::Rgb([255, 255, 255]),
    ));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn pages(n: usize) -> Vec<ImageRef> {
    (1..=n)
        .map(|i| ImageRef::bytes(format!("page{i}.png"), png()))
        .collect()
}

fn page_json(page: usize) -> String {
    serde_json::json!({
        "title": format!("Exercise part {page}"),
        "statement": format!("Statement from page {page}"),
        "response": format!("Work on page {page}"),
        "domain": "Algebra",
        "level": "High School",
        "confidenceScore": 0.5 + page as f64 / 10.0,
        "isContinuation": page > 1,
    })
    .to_string()
}

/// Well-behaved model: free text per page, page JSON, merged JSON.
fn happy(request: &ModelRequest) -> Result<String, BackendError> {
    let page = request.page.unwrap_or(0);
    Ok(match request.stage {
        Stage::Analyze => format!("Handwritten analysis of page {page}"),
        Stage::Structure => format!("```json\n{}\n```", page_json(page)),
        Stage::Combine => serde_json::json!({
            "title": "Quadratic equation",
            "statement": "Statement from page 1",
            "response": "Work on page 1\n\nWork on page 2",
            "domain": "Algebra",
            "level": "High School",
            "confidenceScore": 0.99,
        })
        .to_string(),
    })
}

fn analyzer(backend: Arc<ScriptedBackend>) -> MathExerciseAnalyzer {
    MathExerciseAnalyzer::with_backend(backend, AnalysisConfig::default())
}

fn analyzer_with(backend: Arc<ScriptedBackend>, config: AnalysisConfig) -> MathExerciseAnalyzer {
    MathExerciseAnalyzer::with_backend(backend, config)
}

// ── Call sequencing ──────────────────────────────────────────────────────────

#[tokio::test]
async fn pages_are_analysed_and_structured_in_order_before_one_merge() {
    let backend = ScriptedBackend::new(happy);
    let output = analyzer(backend.clone())
        .analyze_detailed(AnalysisRequest::new(pages(3)), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(
        backend.trace(),
        vec![
            (Stage::Analyze, Some(1)),
            (Stage::Structure, Some(1)),
            (Stage::Analyze, Some(2)),
            (Stage::Structure, Some(2)),
            (Stage::Analyze, Some(3)),
            (Stage::Structure, Some(3)),
            (Stage::Combine, None),
        ]
    );
    assert_eq!(output.raw_analyses.len(), 3);
    assert_eq!(output.pages.len(), 3);
    assert_eq!(output.stats.model_calls, 7);
    assert_eq!(output.stats.total_input_tokens, 700);
    assert_eq!(output.stats.total_output_tokens, 70);
}

#[tokio::test]
async fn only_vision_calls_carry_an_image() {
    let backend = ScriptedBackend::new(happy);
    analyzer(backend.clone()).analyze(&pages(2), None).await.unwrap();

    for call in backend.calls() {
        assert_eq!(call.has_image, call.stage == Stage::Analyze, "{call:?}");
    }
}

#[tokio::test]
async fn vision_prompt_names_page_and_total() {
    let backend = ScriptedBackend::new(happy);
    analyzer(backend.clone()).analyze(&pages(2), None).await.unwrap();

    let calls = backend.calls();
    assert!(calls[0].user.contains("page 1 of 2"));
    assert!(calls[2].user.contains("page 2 of 2"));
    assert!(calls[1].user.contains("Handwritten analysis of page 1"));
}

#[tokio::test]
async fn merge_call_carries_every_page_in_order() {
    let backend = ScriptedBackend::new(happy);
    analyzer(backend.clone()).analyze(&pages(3), None).await.unwrap();

    let combine = backend
        .calls()
        .into_iter()
        .find(|c| c.stage == Stage::Combine)
        .unwrap();
    let p1 = combine.user.find("Statement from page 1").unwrap();
    let p2 = combine.user.find("Statement from page 2").unwrap();
    let p3 = combine.user.find("Statement from page 3").unwrap();
    assert!(p1 < p2 && p2 < p3);
}

#[tokio::test]
async fn session_id_reaches_every_call() {
    let backend = ScriptedBackend::new(happy);
    let output = analyzer(backend.clone())
        .analyze_detailed(
            AnalysisRequest::new(pages(2)).with_session_id("hw-42"),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.session_id, "hw-42");
    assert!(backend.calls().iter().all(|c| c.session_id == "hw-42"));
}

#[tokio::test]
async fn missing_session_id_is_generated() {
    let backend = ScriptedBackend::new(happy);
    let output = analyzer(backend.clone())
        .analyze_detailed(AnalysisRequest::new(pages(1)), &CancelToken::new())
        .await
        .unwrap();

    assert!(!output.session_id.is_empty());
    assert!(backend.calls().iter().all(|c| c.session_id == output.session_id));
}

// ── Single page ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_image_succeeds_without_merge_call() {
    let backend = ScriptedBackend::new(happy);
    let output = analyzer(backend.clone())
        .analyze_detailed(AnalysisRequest::new(pages(1)), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(
        backend.trace(),
        vec![(Stage::Analyze, Some(1)), (Stage::Structure, Some(1))]
    );
    assert_eq!(output.combined, output.pages[0]);

    let ex = output.exercise;
    assert_eq!(ex.image_paths, vec!["page1.png"]);
    assert_eq!(ex.title, "Exercise part 1");
    assert!((0.0..=1.0).contains(&ex.confidence_score));
    assert!((ex.confidence_score - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn analyze_single_matches_one_element_analyze() {
    let a = analyzer(ScriptedBackend::new(happy))
        .analyze_single(ImageRef::bytes("only.png", png()), Some("s"))
        .await
        .unwrap();
    let b = analyzer(ScriptedBackend::new(happy))
        .analyze(&[ImageRef::bytes("only.png", png())], Some("s"))
        .await
        .unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn missing_title_and_confidence_are_defaulted() {
    let backend = ScriptedBackend::new(|req: &ModelRequest| {
        Ok(match req.stage {
            Stage::Structure => serde_json::json!({
                "statement": "Compute the derivative of sin(x)",
                "response": "cos(x)",
                "domain": "Calculus",
                "level": "College",
                "isContinuation": false,
            })
            .to_string(),
            _ => "free text".to_string(),
        })
    });
    let ex = analyzer(backend).analyze(&pages(1), None).await.unwrap();

    assert_eq!(ex.title, "Calculus Exercise");
    assert_eq!(ex.confidence_score, 0.0);
    assert_eq!(ex.statement, "Compute the derivative of sin(x)");
}

// ── Multi page ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn continuation_pages_merge_into_one_exercise() {
    let backend = ScriptedBackend::new(happy);
    let output = analyzer(backend)
        .analyze_detailed(AnalysisRequest::new(pages(2)), &CancelToken::new())
        .await
        .unwrap();

    assert!(output.pages[1].is_continuation);
    let ex = output.exercise;
    assert_eq!(ex.statement, "Statement from page 1");
    assert!(ex.response.contains("Work on page 1"));
    assert!(ex.response.contains("Work on page 2"));
    assert_eq!(ex.image_paths, vec!["page1.png", "page2.png"]);
}

#[tokio::test]
async fn merged_confidence_follows_policy_not_model() {
    // Page scores are 0.6 and 0.7; the merge reply claims 0.99.
    let mean = analyzer(ScriptedBackend::new(happy))
        .analyze(&pages(2), None)
        .await
        .unwrap();
    assert!((mean.confidence_score - 0.65).abs() < 1e-9);

    let config = AnalysisConfig::builder()
        .confidence_policy(ConfidencePolicy::Minimum)
        .build()
        .unwrap();
    let min = analyzer_with(ScriptedBackend::new(happy), config)
        .analyze(&pages(2), None)
        .await
        .unwrap();
    assert!((min.confidence_score - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn sparse_merge_reply_is_completed_from_pages() {
    let backend = ScriptedBackend::new(|req: &ModelRequest| match req.stage {
        Stage::Combine => Ok(r#"{"title": "Two-part proof"}"#.to_string()),
        _ => happy(req),
    });
    let ex = analyzer(backend).analyze(&pages(2), None).await.unwrap();

    assert_eq!(ex.title, "Two-part proof");
    assert_eq!(ex.statement, "Statement from page 1");
    assert_eq!(ex.response, "Work on page 1\n\nWork on page 2");
    assert_eq!(ex.domain, "Algebra");
    assert_eq!(ex.level, "High School");
}

#[tokio::test]
async fn repeated_runs_give_identical_exercises() {
    let a = analyzer(ScriptedBackend::new(happy))
        .analyze(&pages(3), Some("x"))
        .await
        .unwrap();
    let b = analyzer(ScriptedBackend::new(happy))
        .analyze(&pages(3), Some("x"))
        .await
        .unwrap();
    assert_eq!(a, b);
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_input_fails_without_backend_calls() {
    let backend = ScriptedBackend::new(happy);
    let err = analyzer(backend.clone()).analyze(&[], None).await.unwrap_err();

    assert!(matches!(err, AnalysisError::EmptyInput));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn vision_failure_stops_the_pipeline_at_that_page() {
    let backend = ScriptedBackend::new(|req: &ModelRequest| {
        if req.stage == Stage::Analyze && req.page == Some(2) {
            Err(BackendError::Transport("connection reset".into()))
        } else {
            happy(req)
        }
    });
    let err = analyzer(backend.clone())
        .analyze(&pages(3), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::ModelCall { page: 2, .. }), "{err}");
    assert_eq!(err.page(), Some(2));
    assert_eq!(
        backend.trace(),
        vec![
            (Stage::Analyze, Some(1)),
            (Stage::Structure, Some(1)),
            (Stage::Analyze, Some(2)),
        ]
    );
}

#[tokio::test]
async fn json_wrapped_in_latex_prose_is_accepted() {
    let backend = ScriptedBackend::new(|req: &ModelRequest| match req.stage {
        Stage::Structure => Ok(format!(
            "Reading $\\frac{{1}}{{2}}x^{{2}}$ on the page:\n{}\n\nNote: the exponent $x^{{2}}$ is faint.",
            page_json(req.page.unwrap_or(0))
        )),
        Stage::Combine => Ok(format!(
            "Merged $x^{{2}}$: {}",
            r#"{"statement": "Statement from page 1", "domain": "Algebra"}"#
        )),
        _ => happy(req),
    });
    let ex = analyzer(backend).analyze(&pages(2), None).await.unwrap();

    assert_eq!(ex.statement, "Statement from page 1");
    assert_eq!(ex.level, "High School");
}

#[tokio::test]
async fn empty_vision_reply_is_a_model_call_error() {
    let backend = ScriptedBackend::new(|req: &ModelRequest| match req.stage {
        Stage::Analyze => Ok("   ".to_string()),
        _ => happy(req),
    });
    let err = analyzer(backend).analyze(&pages(1), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelCall);
}

#[tokio::test]
async fn malformed_page_json_is_a_structure_error() {
    let backend = ScriptedBackend::new(|req: &ModelRequest| match req.stage {
        Stage::Structure if req.page == Some(2) => Ok("I could not read this page.".to_string()),
        _ => happy(req),
    });
    let err = analyzer(backend.clone())
        .analyze(&pages(2), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::Structure { page: 2, .. }), "{err}");
    assert!(backend.trace().iter().all(|(s, _)| *s != Stage::Combine));
}

#[tokio::test]
async fn page_json_missing_required_field_is_rejected() {
    let backend = ScriptedBackend::new(|req: &ModelRequest| match req.stage {
        Stage::Structure => Ok(serde_json::json!({
            "statement": "s",
            "response": "r",
            "level": "l",
            "isContinuation": false,
        })
        .to_string()),
        _ => happy(req),
    });
    let err = analyzer(backend).analyze(&pages(1), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structure);
}

#[tokio::test]
async fn merge_failure_is_a_combine_error() {
    let backend = ScriptedBackend::new(|req: &ModelRequest| match req.stage {
        Stage::Combine => Err(BackendError::Transport("HTTP 500".into())),
        _ => happy(req),
    });
    let err = analyzer(backend).analyze(&pages(2), None).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Combine { .. }), "{err}");
}

#[tokio::test]
async fn unreadable_file_fails_load_before_any_call() {
    let backend = ScriptedBackend::new(happy);
    let images = vec![
        ImageRef::bytes("good.png", png()),
        ImageRef::parse("/definitely/not/here/page2.jpg"),
    ];
    let err = analyzer(backend.clone())
        .analyze(&images, None)
        .await
        .unwrap_err();

    match err {
        AnalysisError::Load {
            index, reference, ..
        } => {
            assert_eq!(index, 2);
            assert_eq!(reference, "/definitely/not/here/page2.jpg");
        }
        other => panic!("expected Load, got {other:?}"),
    }
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn unsupported_bytes_fail_load() {
    let backend = ScriptedBackend::new(happy);
    let images = vec![ImageRef::bytes("notes.txt", b"just some text".to_vec())];
    let err = analyzer(backend.clone())
        .analyze(&images, None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn oversized_image_fails_load() {
    let config = AnalysisConfig::builder().max_image_bytes(16).build().unwrap();
    let err = analyzer_with(ScriptedBackend::new(happy), config)
        .analyze(&pages(1), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
}

#[tokio::test]
async fn image_files_on_disk_are_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.png");
    std::fs::write(&path, png()).unwrap();

    let ex = analyzer(ScriptedBackend::new(happy))
        .analyze(&[ImageRef::from(path.clone())], None)
        .await
        .unwrap();
    assert_eq!(ex.image_paths, vec![path.to_string_lossy().into_owned()]);
}

// ── Cancellation & timeouts ──────────────────────────────────────────────────

#[tokio::test]
async fn pre_cancelled_token_makes_no_calls() {
    let backend = ScriptedBackend::new(happy);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = analyzer(backend.clone())
        .analyze_detailed(AnalysisRequest::new(pages(2)), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn cancel_between_stages_stops_before_next_call() {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let backend = ScriptedBackend::new(move |req: &ModelRequest| {
        if req.stage == Stage::Analyze {
            trigger.cancel();
        }
        happy(req)
    });

    let err = analyzer(backend.clone())
        .analyze_detailed(AnalysisRequest::new(pages(2)), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::Cancelled { .. }), "{err}");
    assert_eq!(backend.trace(), vec![(Stage::Analyze, Some(1))]);
}

#[tokio::test(start_paused = true)]
async fn deadline_interrupts_a_slow_call() {
    let backend = ScriptedBackend::slow(Duration::from_secs(30), happy);
    let cancel = CancelToken::with_timeout(Duration::from_secs(5));

    let err = analyzer(backend.clone())
        .analyze_detailed(AnalysisRequest::new(pages(1)), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::Cancelled { .. }), "{err}");
    assert_eq!(backend.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn per_call_timeout_is_a_stage_error() {
    let backend = ScriptedBackend::slow(Duration::from_secs(30), happy);
    let config = AnalysisConfig::builder().api_timeout_secs(2).build().unwrap();

    let err = analyzer_with(backend, config)
        .analyze(&pages(1), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::ModelCall { page: 1, .. }), "{err}");
    assert!(err.to_string().contains("timed out"), "{err}");
}

/// Image source that never answers within a test's deadline.
struct StalledSource;

#[async_trait]
impl ImageSource for StalledSource {
    async fn fetch(&self, _image: &ImageRef) -> Result<Vec<u8>, ImageLoadError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(ImageLoadError::DownloadTimeout { secs: 60 })
    }
}

#[tokio::test(start_paused = true)]
async fn deadline_interrupts_a_slow_download() {
    let backend = ScriptedBackend::new(happy);
    let config = AnalysisConfig::builder()
        .image_source(Arc::new(StalledSource))
        .build()
        .unwrap();
    let cancel = CancelToken::with_timeout(Duration::from_secs(5));

    let started = tokio::time::Instant::now();
    let err = analyzer_with(backend.clone(), config)
        .analyze_detailed(
            AnalysisRequest::new(["https://example.test/page1.jpg"]),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::Cancelled { .. }), "{err}");
    assert!(err.to_string().contains("loading of image 1"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(60));
    assert!(backend.calls().is_empty());
}

// ── Batch ────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn batch_results_keep_request_order() {
    // Earlier sessions answer slower, so completion order is reversed.
    let backend = ScriptedBackend::new(|req: &ModelRequest| match req.stage {
        Stage::Structure => Ok(serde_json::json!({
            "statement": "s",
            "response": "r",
            "domain": req.session_id.clone(),
            "level": "l",
            "isContinuation": false,
        })
        .to_string()),
        _ => Ok("text".into()),
    });
    let slow = Arc::new(DelayBySession(backend.clone()));
    let analyzer = MathExerciseAnalyzer::with_backend(slow, AnalysisConfig::default());

    let requests = (0..4)
        .map(|i| AnalysisRequest::new(pages(1)).with_session_id(format!("s{i}")))
        .collect();
    let results = analyzer
        .analyze_batch(requests, 4, &CancelToken::new())
        .await;

    let domains: Vec<String> = results.into_iter().map(|r| r.unwrap().domain).collect();
    assert_eq!(domains, vec!["s0", "s1", "s2", "s3"]);
}

/// Sleeps `(4 - n)` seconds for session `sN` before delegating.
struct DelayBySession(Arc<ScriptedBackend>);

#[async_trait]
impl ModelBackend for DelayBySession {
    fn name(&self) -> &str {
        "delayed"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelReply, BackendError> {
        let n: u64 = request.session_id.trim_start_matches('s').parse().unwrap_or(0);
        tokio::time::sleep(Duration::from_secs(4 - n.min(4))).await;
        self.0.generate(request).await
    }
}

#[tokio::test]
async fn batch_failures_stay_with_their_request() {
    let analyzer = analyzer(ScriptedBackend::new(happy));
    let requests = vec![
        AnalysisRequest::new(pages(1)),
        AnalysisRequest::new(Vec::<ImageRef>::new()),
        AnalysisRequest::new(pages(2)),
    ];
    let results = analyzer
        .analyze_batch(requests, 2, &CancelToken::new())
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(AnalysisError::EmptyInput)));
    assert_eq!(results[2].as_ref().unwrap().image_paths.len(), 2);
}

// ── Output & progress ────────────────────────────────────────────────────────

#[tokio::test]
async fn analyze_to_file_writes_camel_case_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("exercise.json");

    let ex = analyzer(ScriptedBackend::new(happy))
        .analyze_to_file(&pages(2), &path)
        .await
        .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"confidenceScore\""));
    assert!(text.contains("\"imagePaths\""));
    let back: MathExercise = serde_json::from_str(&text).unwrap();
    assert_eq!(back, ex);
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl AnalysisProgressCallback for Recorder {
    fn on_analysis_start(&self, total: usize) {
        self.0.lock().unwrap().push(format!("start {total}"));
    }
    fn on_page_start(&self, page: usize, total: usize) {
        self.0.lock().unwrap().push(format!("page {page}/{total}"));
    }
    fn on_page_complete(&self, page: usize, _total: usize, confidence: Option<f64>) {
        self.0
            .lock()
            .unwrap()
            .push(format!("done {page} {:.1}", confidence.unwrap_or(-1.0)));
    }
    fn on_combine_start(&self, total: usize) {
        self.0.lock().unwrap().push(format!("combine {total}"));
    }
    fn on_analysis_error(&self, _error: &str) {
        self.0.lock().unwrap().push("error".into());
    }
    fn on_analysis_complete(&self, confidence: f64) {
        self.0.lock().unwrap().push(format!("complete {confidence:.2}"));
    }
}

#[tokio::test]
async fn progress_events_follow_the_pipeline() {
    let recorder = Arc::new(Recorder::default());
    let config = AnalysisConfig::builder()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    analyzer_with(ScriptedBackend::new(happy), config)
        .analyze(&pages(2), None)
        .await
        .unwrap();

    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec![
            "start 2",
            "page 1/2",
            "done 1 0.6",
            "page 2/2",
            "done 2 0.7",
            "combine 2",
            "complete 0.65",
        ]
    );
}

#[tokio::test]
async fn progress_reports_failure_once() {
    let recorder = Arc::new(Recorder::default());
    let config = AnalysisConfig::builder()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let backend = ScriptedBackend::new(|_: &ModelRequest| Err(BackendError::Transport("down".into())));
    analyzer_with(backend, config)
        .analyze(&pages(1), None)
        .await
        .unwrap_err();

    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec!["start 1", "page 1/1", "error"]
    );
}

#[test]
fn analyze_sync_runs_without_a_runtime() {
    let config = AnalysisConfig::builder()
        .backend(ScriptedBackend::new(happy))
        .build()
        .unwrap();
    let ex = analyze_sync(&pages(2), &config).unwrap();

    assert_eq!(ex.statement, "Statement from page 1");
    assert_eq!(ex.image_paths, vec!["page1.png", "page2.png"]);
    assert!((ex.confidence_score - 0.65).abs() < 1e-9);
}
