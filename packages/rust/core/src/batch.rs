//! Batch driver: a bounded pool of workers preparing independent documents.
//!
//! Each document is processed on a blocking worker under a wall-clock budget.
//! A failure or overrun is recorded for that document only; the rest of the
//! queue keeps going.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, instrument, warn};

use filingprep_artifacts::{write_bundle, BundleInput, SourceDescriptor};
use filingprep_shared::{PrepConfig, PrepError, Result};

use crate::pipeline::prepare_document;

// Worker lifecycle: the driver may cancel only a running worker, and a
// worker may publish its bundle only if it was not cancelled.
const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const COMMITTING: u8 = 2;

/// One queued document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentJob {
    pub source_id: String,
    pub path: PathBuf,
}

impl DocumentJob {
    /// Job whose source id is the file stem of `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let source_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { source_id, path }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    Succeeded {
        bundle_dir: PathBuf,
        anchors: usize,
        fallback_tables: usize,
    },
    Failed {
        /// Whether running the same job again may succeed (I/O trouble, budget overrun).
        retryable: bool,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct DocumentResult {
    pub source_id: String,
    pub outcome: DocumentOutcome,
    pub elapsed: Duration,
}

impl DocumentResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DocumentOutcome::Succeeded { .. })
    }
}

/// Per-document results in job order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<DocumentResult>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Progress callback for reporting batch status.
pub trait ProgressReporter: Send + Sync {
    /// Called once before any document starts.
    fn started(&self, total: usize);
    /// Called as each document finishes, in job order.
    fn document_done(&self, result: &DocumentResult, done: usize, total: usize);
    /// Called when the batch completes.
    fn finished(&self, report: &BatchReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn started(&self, _total: usize) {}
    fn document_done(&self, _result: &DocumentResult, _done: usize, _total: usize) {}
    fn finished(&self, _report: &BatchReport) {}
}

/// Directory name for a source id: anything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn bundle_dir_name(source_id: &str) -> String {
    let name: String = source_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        name
    }
}

/// Prepare every job and write one bundle per successful document under `out_root`.
#[instrument(skip_all, fields(jobs = jobs.len(), workers = config.batch.workers))]
pub async fn run_batch(
    jobs: Vec<DocumentJob>,
    out_root: &Path,
    config: Arc<PrepConfig>,
    progress: &dyn ProgressReporter,
) -> BatchReport {
    let budget = Duration::from_secs(config.batch.document_timeout_secs);
    run_jobs(jobs, out_root, config, budget, progress).await
}

async fn run_jobs(
    jobs: Vec<DocumentJob>,
    out_root: &Path,
    config: Arc<PrepConfig>,
    budget: Duration,
    progress: &dyn ProgressReporter,
) -> BatchReport {
    let start = Instant::now();
    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(config.batch.workers.max(1)));

    info!(total, workers = config.batch.workers, budget_secs = budget.as_secs(), "starting batch");
    progress.started(total);

    let mut seen = HashSet::new();
    let mut handles = Vec::with_capacity(total);
    for job in jobs {
        let source_id = job.source_id.clone();
        if !seen.insert(bundle_dir_name(&source_id)) {
            handles.push((source_id, None));
            continue;
        }
        let sem = semaphore.clone();
        let config = config.clone();
        let bundle_dir = out_root.join(bundle_dir_name(&job.source_id));
        let handle = tokio::spawn(async move {
            let Ok(permit) = sem.acquire_owned().await else {
                let outcome = DocumentOutcome::Failed {
                    retryable: true,
                    reason: "worker pool closed".into(),
                };
                return (outcome, Duration::ZERO);
            };
            let started = Instant::now();
            let outcome = run_one(job, bundle_dir, config, budget, permit).await;
            (outcome, started.elapsed())
        });
        handles.push((source_id, Some(handle)));
    }

    let mut report = BatchReport::default();
    for (done, (source_id, handle)) in handles.into_iter().enumerate() {
        let (outcome, elapsed) = match handle {
            None => {
                let outcome = DocumentOutcome::Failed {
                    retryable: false,
                    reason: "duplicate source id in batch".into(),
                };
                (outcome, Duration::ZERO)
            }
            Some(handle) => handle.await.unwrap_or_else(|e| {
                let outcome = DocumentOutcome::Failed {
                    retryable: false,
                    reason: format!("worker task failed: {e}"),
                };
                (outcome, Duration::ZERO)
            }),
        };
        if let DocumentOutcome::Failed { retryable, reason } = &outcome {
            warn!(%source_id, retryable, %reason, "document failed");
        }
        let result = DocumentResult {
            source_id,
            outcome,
            elapsed,
        };
        progress.document_done(&result, done + 1, total);
        report.results.push(result);
    }

    report.elapsed = start.elapsed();
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        elapsed_ms = report.elapsed.as_millis(),
        "batch completed"
    );
    progress.finished(&report);
    report
}

async fn run_one(
    job: DocumentJob,
    bundle_dir: PathBuf,
    config: Arc<PrepConfig>,
    budget: Duration,
    permit: OwnedSemaphorePermit,
) -> DocumentOutcome {
    let state = Arc::new(AtomicU8::new(RUNNING));
    let worker_state = state.clone();
    // The permit lives on the blocking worker, so an overrun keeps its slot
    // until the work actually stops.
    let mut worker = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        process(&job, &bundle_dir, &config, &worker_state)
    });

    match tokio::time::timeout(budget, &mut worker).await {
        Ok(joined) => outcome_of(joined),
        Err(_) => {
            let cancelled = state
                .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if cancelled {
                DocumentOutcome::Failed {
                    retryable: true,
                    reason: format!("exceeded wall-clock budget of {}s", budget.as_secs()),
                }
            } else {
                // Already committing the bundle; let it land.
                outcome_of(worker.await)
            }
        }
    }
}

type Processed = Result<(PathBuf, usize, usize)>;

fn outcome_of(joined: std::result::Result<Processed, tokio::task::JoinError>) -> DocumentOutcome {
    match joined {
        Ok(Ok((bundle_dir, anchors, fallback_tables))) => DocumentOutcome::Succeeded {
            bundle_dir,
            anchors,
            fallback_tables,
        },
        Ok(Err(e)) => DocumentOutcome::Failed {
            retryable: matches!(e, PrepError::Io { .. }),
            reason: e.to_string(),
        },
        Err(e) => DocumentOutcome::Failed {
            retryable: false,
            reason: format!("worker panicked: {e}"),
        },
    }
}

fn cancelled_error() -> PrepError {
    PrepError::validation("cancelled after budget overrun")
}

/// Prepare one document and publish its bundle.
///
/// The bundle is written into a staging directory under the output root and
/// renamed into place only after `state` moves from running to committing,
/// so a cancelled document never leaves a bundle behind.
fn process(job: &DocumentJob, bundle_dir: &Path, config: &PrepConfig, state: &AtomicU8) -> Processed {
    let raw = std::fs::read(&job.path).map_err(|e| PrepError::io(&job.path, e))?;
    let prepared = prepare_document(&raw, &job.source_id, config)?;

    if state.load(Ordering::SeqCst) == CANCELLED {
        return Err(cancelled_error());
    }

    let out_root = bundle_dir.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(out_root).map_err(|e| PrepError::io(out_root, e))?;
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(out_root)
        .map_err(|e| PrepError::io(out_root, e))?;

    let source = SourceDescriptor::from_bytes(&job.source_id, Some(&job.path), &raw);
    let input = BundleInput {
        source: &source,
        document: &prepared.document,
        anchors: &prepared.anchors.anchors,
        paragraph_coverage: prepared.anchors.paragraph_coverage,
        context_window: config.anchors.context_window,
    };
    write_bundle(staging.path(), input, &config.output)?;

    if state
        .compare_exchange(RUNNING, COMMITTING, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        // Dropping `staging` removes the partial bundle.
        return Err(cancelled_error());
    }

    if bundle_dir.exists() {
        std::fs::remove_dir_all(bundle_dir).map_err(|e| PrepError::io(bundle_dir, e))?;
    }
    std::fs::rename(staging.path(), bundle_dir).map_err(|e| PrepError::io(bundle_dir, e))?;

    Ok((
        bundle_dir.to_path_buf(),
        prepared.anchors.anchors.len(),
        prepared.report.fallback_tables.len(),
    ))
}
