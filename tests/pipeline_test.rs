//! End-to-end batch contract tests
//!
//! Drives `AnalysisPipeline::run_batch` over temp-dir repositories served by
//! `LocalDirectory`, with scripted in-process model clients instead of
//! network calls.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use bugsweep::ai::{AiError, AiResult, ModelClient};
use bugsweep::config::AppConfig;
use bugsweep::models::{AnalysisUnit, ErrorType, Severity};
use bugsweep::pipeline::{AnalysisPipeline, BatchRequest, PipelineError};
use bugsweep::repo::LocalDirectory;
use bugsweep::status::{InMemorySessionStore, SessionStatus, SessionStore};

/// What a scripted model does for one unit
enum Reply {
    Text(String),
    Fail(AiError),
    /// Never answers; only a timeout or cancellation ends the call
    Hang,
}

type Script = Box<dyn Fn(&AnalysisUnit) -> Reply + Send + Sync>;

struct ScriptedModel {
    script: Script,
    calls: AtomicUsize,
    units: Mutex<Vec<(String, u32, u32)>>,
}

impl ScriptedModel {
    fn new(script: impl Fn(&AnalysisUnit) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            units: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(start, end)` of every unit sent for `path`, sorted
    fn ranges_for(&self, path: &str) -> Vec<(u32, u32)> {
        let mut ranges: Vec<_> = self
            .units
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _, _)| p == path)
            .map(|(_, s, e)| (*s, *e))
            .collect();
        ranges.sort();
        ranges
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, unit: &AnalysisUnit) -> AiResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.units
            .lock()
            .unwrap()
            .push((unit.path.clone(), unit.start_line, unit.end_line));
        match (self.script)(unit) {
            Reply::Text(text) => Ok(text),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> String {
        "scripted".into()
    }
}

/// One unified-shape issue at unit-relative `line`
fn issue_at(line: u32) -> Reply {
    Reply::Text(format!(
        r#"{{"issues": [{{"start_line": {line}, "end_line": {line}, "error_type": "Runtime", "severity": "high", "issue": "problem"}}]}}"#
    ))
}

fn lines(n: usize) -> String {
    (1..=n).map(|i| format!("value_{i} = {i}\n")).collect()
}

fn write_repo(files: &[(&str, String)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
    dir
}

fn pipeline(
    dir: &TempDir,
    model: Arc<ScriptedModel>,
) -> (AnalysisPipeline, Arc<InMemorySessionStore>) {
    let sessions = Arc::new(InMemorySessionStore::new());
    let pipeline = AnalysisPipeline::new(
        AppConfig::default(),
        Arc::new(LocalDirectory::single(dir.path())),
        model,
        sessions.clone(),
    );
    (pipeline, sessions)
}

fn request(batch_index: usize, batch_size: usize) -> BatchRequest {
    BatchRequest::new("octo", "hello", batch_index).with_batch_size(batch_size)
}

fn small_repo(n: usize) -> TempDir {
    let files: Vec<(String, String)> = (0..n)
        .map(|i| (format!("mod_{i:02}.py"), format!("x = {i}\n")))
        .collect();
    let refs: Vec<(&str, String)> = files.iter().map(|(p, c)| (p.as_str(), c.clone())).collect();
    write_repo(&refs)
}

#[tokio::test]
async fn test_two_files_fit_in_one_page() {
    let dir = write_repo(&[("a.py", lines(10)), ("b.js", lines(12))]);
    let model = ScriptedModel::new(|_| issue_at(1));
    let (pipeline, sessions) = pipeline(&dir, model.clone());

    let response = pipeline
        .run_batch(request(0, 4), &CancellationToken::new())
        .await
        .unwrap();

    assert!(response.success);
    assert!(!response.has_more_batches);
    assert_eq!(response.next_batch_index, None);
    assert_eq!(response.total_files_in_repo, 2);
    assert_eq!((response.batch_start_index, response.batch_end_index), (0, 2));
    assert_eq!(response.results.len(), 2);
    assert_eq!(model.calls(), 2);
    assert_eq!(response.http_status(), 200);

    let session = sessions.get(&response.analysis_id).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.progress, 100.0);
    assert_eq!(session.repository.as_deref(), Some("octo/hello"));
}

#[tokio::test]
async fn test_first_page_of_ten() {
    let dir = small_repo(10);
    let model = ScriptedModel::new(|_| issue_at(1));
    let (pipeline, sessions) = pipeline(&dir, model.clone());

    let response = pipeline
        .run_batch(request(0, 4), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!((response.batch_start_index, response.batch_end_index), (0, 4));
    assert!(response.has_more_batches);
    assert_eq!(response.next_batch_index, Some(1));
    assert_eq!(response.results.len(), 4);
    assert_eq!(model.calls(), 4);
    assert_eq!(response.progress.files_processed, 4);
    assert_eq!(response.progress.total_files, 10);

    let session = sessions.get(&response.analysis_id).unwrap();
    assert_eq!(session.status, SessionStatus::Analyzing);
    assert_eq!(session.total_files, 10);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_file_does_not_sink_its_micro_batch() {
    let dir = write_repo(&[
        ("a.py", lines(5)),
        ("b.py", lines(5)),
        ("slow.py", lines(120)),
    ]);
    let model = ScriptedModel::new(|unit| {
        if unit.path == "slow.py" {
            Reply::Hang
        } else {
            issue_at(1)
        }
    });
    let (pipeline, sessions) = pipeline(&dir, model);

    let response = pipeline
        .run_batch(request(0, 4), &CancellationToken::new())
        .await
        .unwrap();

    let files: BTreeSet<&str> = response.results.iter().map(|r| r.file.as_str()).collect();
    assert_eq!(files, BTreeSet::from(["a.py", "b.py"]));
    assert!(response.success);
    assert!(response.is_partial());
    assert_eq!(response.files_failed, Some(1));
    assert_eq!(response.files_attempted, Some(3));
    assert_eq!(response.files_analyzed, Some(2));
    assert_eq!(response.http_status(), 200);

    let session = sessions.get(&response.analysis_id).unwrap();
    assert!(session.errors.iter().any(|e| e.starts_with("slow.py")));
}

#[tokio::test]
async fn test_legacy_and_unified_shapes_normalize_alike() {
    let dir = write_repo(&[("legacy.py", lines(20)), ("unified.js", lines(20))]);
    let model = ScriptedModel::new(|unit| {
        if unit.path == "legacy.py" {
            Reply::Text(
                r#"```json
{"bugs": [{"line": 3, "description": "off by one", "severity": "HIGH"}],
 "securityIssues": [{"line": 7, "description": "sql built from input", "severity": "critical"}]}
```"#
                    .into(),
            )
        } else {
            Reply::Text(
                r#"{"issues": [{"start_line": 4, "end_line": 5, "error_type": "Security", "severity": "Critical", "issue": "eval of input"}]}"#
                    .into(),
            )
        }
    });
    let (pipeline, _) = pipeline(&dir, model);

    let response = pipeline
        .run_batch(request(0, 4), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.results.len(), 2);

    let legacy = response.results.iter().find(|r| r.file == "legacy.py").unwrap();
    let unified = response.results.iter().find(|r| r.file == "unified.js").unwrap();

    assert_eq!(legacy.issues.len(), 2);
    assert!(legacy
        .issues
        .iter()
        .any(|i| i.error_type == ErrorType::Runtime && i.severity == Severity::High && i.start_line == 3));
    assert!(legacy
        .issues
        .iter()
        .any(|i| i.error_type == ErrorType::Security && i.severity == Severity::Critical));
    assert_eq!(unified.issues[0].error_type, ErrorType::Security);
    assert_eq!(unified.issues[0].severity, Severity::Critical);

    // Both serialize with the same keys
    let a = serde_json::to_value(legacy).unwrap();
    let b = serde_json::to_value(unified).unwrap();
    let keys = |v: &serde_json::Value| v.as_object().unwrap().keys().cloned().collect::<Vec<_>>();
    assert_eq!(keys(&a), keys(&b));
    assert_eq!(a["securityIssues"].as_array().unwrap().len(), 1);
    assert_eq!(b["securityIssues"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_fifth_window_is_offset_by_four_windows() {
    let dir = write_repo(&[("big.py", lines(800))]);
    let model = ScriptedModel::new(|_| issue_at(3));
    let (pipeline, _) = pipeline(&dir, model.clone());

    let response = pipeline
        .run_batch(request(0, 4), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(model.calls(), 5);
    let starts: Vec<u32> = response.results[0].issues.iter().map(|i| i.start_line).collect();
    assert_eq!(starts, vec![3, 178, 353, 528, 703]);
    assert_eq!(starts[4], 4 * 175 + 3);
}

#[tokio::test]
async fn test_one_call_below_the_line_threshold() {
    let dir = write_repo(&[("under.py", lines(199)), ("at.py", lines(200))]);
    let model = ScriptedModel::new(|_| issue_at(1));
    let (pipeline, _) = pipeline(&dir, model.clone());

    pipeline
        .run_batch(request(0, 4), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(model.ranges_for("under.py"), vec![(1, 199)]);
    assert_eq!(model.ranges_for("at.py"), vec![(1, 175), (176, 200)]);
}

#[tokio::test]
async fn test_windows_cover_the_file_exactly_once() {
    let dir = write_repo(&[("long.py", lines(523))]);
    let model = ScriptedModel::new(|_| Reply::Text(r#"{"issues": []}"#.into()));
    let (pipeline, _) = pipeline(&dir, model.clone());

    pipeline
        .run_batch(request(0, 4), &CancellationToken::new())
        .await
        .unwrap();

    let ranges = model.ranges_for("long.py");
    assert_eq!(ranges.len(), 523_usize.div_ceil(175));
    let mut next = 1;
    for (start, end) in ranges {
        assert_eq!(start, next);
        assert!(end >= start);
        next = end + 1;
    }
    assert_eq!(next, 524);
}

#[tokio::test]
async fn test_bisected_halves_report_original_coordinates() {
    let dir = write_repo(&[("flaky.py", lines(100))]);
    let model = ScriptedModel::new(|unit| {
        if unit.end_line - unit.start_line + 1 > 50 {
            Reply::Fail(AiError::ApiError {
                status: 502,
                message: "bad gateway".into(),
            })
        } else {
            issue_at(2)
        }
    });
    let (pipeline, _) = pipeline(&dir, model.clone());

    let response = pipeline
        .run_batch(request(0, 4), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(model.calls(), 3);
    let starts: Vec<u32> = response.results[0].issues.iter().map(|i| i.start_line).collect();
    assert_eq!(starts, vec![2, 52]);
    assert!(response.success);
    assert!(!response.is_partial());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_triggers_second_chance_sweep() {
    let dir = write_repo(&[("a.py", lines(5)), ("b.py", lines(5)), ("c.py", lines(5))]);
    let limited = Arc::new(AtomicBool::new(false));
    let flag = limited.clone();
    let model = ScriptedModel::new(move |unit| {
        if unit.path == "b.py" && !flag.swap(true, Ordering::SeqCst) {
            Reply::Fail(AiError::RateLimited { retry_after: None })
        } else {
            issue_at(1)
        }
    });
    let (pipeline, sessions) = pipeline(&dir, model);

    let response = pipeline
        .run_batch(request(0, 4), &CancellationToken::new())
        .await
        .unwrap();

    assert!(limited.load(Ordering::SeqCst));
    let files: BTreeSet<&str> = response.results.iter().map(|r| r.file.as_str()).collect();
    assert_eq!(files, BTreeSet::from(["a.py", "b.py", "c.py"]));
    assert!(response.success);
    assert!(!response.is_partial());

    let session = sessions.get(&response.analysis_id).unwrap();
    assert!(!session.errors.is_empty());
    let mut session_files: Vec<&str> = session.results.iter().map(|r| r.file.as_str()).collect();
    session_files.sort();
    assert_eq!(session_files, vec!["a.py", "b.py", "c.py"]);
}

#[tokio::test]
async fn test_same_page_is_reproducible() {
    let dir = small_repo(7);
    let model = ScriptedModel::new(|_| issue_at(1));
    let (pipeline, _) = pipeline(&dir, model);

    let first = pipeline
        .run_batch(request(1, 3), &CancellationToken::new())
        .await
        .unwrap();
    let second = pipeline
        .run_batch(request(1, 3), &CancellationToken::new())
        .await
        .unwrap();

    assert_ne!(first.analysis_id, second.analysis_id);
    assert_eq!(
        (first.batch_start_index, first.batch_end_index),
        (second.batch_start_index, second.batch_end_index)
    );
    let files = |r: &bugsweep::pipeline::BatchResponse| {
        r.results.iter().map(|x| x.file.clone()).collect::<BTreeSet<_>>()
    };
    assert_eq!(files(&first), files(&second));
    assert_eq!(files(&first).len(), 3);
}

#[tokio::test]
async fn test_progress_never_decreases_across_pages() {
    let dir = small_repo(10);
    let model = ScriptedModel::new(|_| issue_at(1));
    let (pipeline, sessions) = pipeline(&dir, model);
    let analysis_id = "progress-check";

    let mut readings = Vec::new();
    let mut batch_index = 0;
    loop {
        let response = pipeline
            .run_batch(
                request(batch_index, 3).with_analysis_id(analysis_id),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        readings.push(sessions.get(analysis_id).unwrap().progress);
        match response.next_batch_index {
            Some(next) => batch_index = next,
            None => break,
        }
    }

    assert_eq!(readings.len(), 4);
    assert!(readings.windows(2).all(|w| w[0] <= w[1]));
    let session = sessions.get(analysis_id).unwrap();
    assert_eq!(session.progress, 100.0);
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.results.len(), 10);
    assert_eq!(session.files_analyzed, 10);
}

#[tokio::test]
async fn test_page_past_the_end_is_empty() {
    let dir = small_repo(2);
    let model = ScriptedModel::new(|_| issue_at(1));
    let (pipeline, _) = pipeline(&dir, model.clone());

    let response = pipeline
        .run_batch(request(5, 4), &CancellationToken::new())
        .await
        .unwrap();
    assert!(response.success);
    assert!(response.results.is_empty());
    assert!(!response.has_more_batches);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_page_without_any_result_is_a_failure() {
    let dir = write_repo(&[("a.py", lines(5)), ("b.py", lines(5))]);
    let model = ScriptedModel::new(|unit| {
        if unit.path == "a.py" {
            Reply::Text("sorry, I cannot help with that".into())
        } else {
            Reply::Fail(AiError::ApiError {
                status: 500,
                message: "internal error".into(),
            })
        }
    });
    let (pipeline, sessions) = pipeline(&dir, model);

    let response = pipeline
        .run_batch(request(0, 4), &CancellationToken::new())
        .await
        .unwrap();

    assert!(response.results.is_empty());
    assert!(!response.success);
    assert!(response.is_partial());
    assert_eq!(response.files_failed, Some(1));
    assert_eq!(response.http_status(), 500);

    let session = sessions.get(&response.analysis_id).unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.errors.iter().any(|e| e.starts_with("b.py")));
}

#[tokio::test]
async fn test_missing_repository_fails_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    let sessions = Arc::new(InMemorySessionStore::new());
    let pipeline = AnalysisPipeline::new(
        AppConfig::default(),
        Arc::new(LocalDirectory::single(&missing)),
        ScriptedModel::new(|_| issue_at(1)),
        sessions.clone(),
    );

    let err = pipeline
        .run_batch(
            request(0, 4).with_analysis_id("gone"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Materialize(_)));
    assert_eq!(err.kind(), "not_found");

    let session = sessions.get("gone").unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.errors.len(), 1);
}

#[tokio::test]
async fn test_zero_batch_size_is_rejected() {
    let dir = small_repo(2);
    let (pipeline, _) = pipeline(&dir, ScriptedModel::new(|_| issue_at(1)));
    let err = pipeline
        .run_batch(request(0, 0), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_request");
}
