//! Job orchestration: one invocation per source object.
//!
//! An invocation walks a fixed sequence of [`JobState`]s:
//!
//! ```text
//! Staged ─▶ Converting ─▶ Publishing(1..=N) ─▶ Archiving ─▶ SourceDeleting ─▶ Cleanup ─▶ Done
//!    └──────────┴──────────────┴──────────────────┴─────────────┴──▶ Cleanup ─▶ Failed
//! ```
//!
//! Every step is awaited before the next starts. The first error aborts the
//! remaining steps; scratch cleanup still runs, then the error is returned to
//! the caller unchanged. Nothing is retried here: redelivery is the invoking
//! platform's business, and a rerun starts again from `Staged`.
//!
//! The source is only deleted after every page is published and the archive
//! copy is confirmed, so any failure before `SourceDeleting` leaves it in the
//! input location for the next attempt.

use crate::config::JobConfig;
use crate::error::JobError;
use crate::output::{JobReport, SourceRef};
use crate::pipeline::archive::{archive_source, delete_source};
use crate::pipeline::publish::publish_page;
use crate::pipeline::render::{check_pdf_header, Rasterizer};
use crate::pipeline::workspace::Workspace;
use crate::progress::JobProgressCallback;
use crate::storage::BlobStorage;
use crate::stream::PageStream;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Where an invocation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Source downloaded into the workspace.
    Staged,
    /// Document opened for rendering.
    Converting,
    /// Page `n` (1-based) rendered and being uploaded.
    Publishing(usize),
    /// Copying the source into the archive location.
    Archiving,
    /// Deleting the source from the input location.
    SourceDeleting,
    /// Removing scratch files.
    Cleanup,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed,
}

impl JobState {
    /// Whether no further transitions follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Staged => f.write_str("staged"),
            JobState::Converting => f.write_str("converting"),
            JobState::Publishing(n) => write!(f, "publishing({n})"),
            JobState::Archiving => f.write_str("archiving"),
            JobState::SourceDeleting => f.write_str("source_deleting"),
            JobState::Cleanup => f.write_str("cleanup"),
            JobState::Done => f.write_str("done"),
            JobState::Failed => f.write_str("failed"),
        }
    }
}

/// Logs transitions and forwards them to the configured callback.
struct Transitions<'a> {
    source: &'a str,
    callback: Option<&'a dyn JobProgressCallback>,
}

impl Transitions<'_> {
    fn enter(&self, state: JobState) {
        match state {
            JobState::Publishing(_) => debug!(state = %state, "State transition"),
            _ => info!(state = %state, "State transition"),
        }
        if let Some(cb) = self.callback {
            cb.on_state_change(self.source, &state);
        }
    }
}

/// What a partially-completed invocation has done so far.
#[derive(Default)]
struct Progress {
    source_bytes: u64,
    outputs: Vec<String>,
    render: Duration,
    publish: Duration,
}

/// Run one invocation for `source`.
///
/// On success the source has been archived and removed from the input
/// location, and every page is published. On failure the returned error
/// names the step that failed; see [`JobError::source_preserved`] for
/// whether the source is still in place.
pub async fn run_job(
    storage: Arc<dyn BlobStorage>,
    rasterizer: Arc<dyn Rasterizer>,
    config: &JobConfig,
    source: SourceRef,
) -> Result<JobReport, JobError> {
    let invocation = Uuid::new_v4();
    let span = info_span!("job", invocation = %invocation, source = %source.name);
    run_invocation(storage, rasterizer, config, source, invocation)
        .instrument(span)
        .await
}

async fn run_invocation(
    storage: Arc<dyn BlobStorage>,
    rasterizer: Arc<dyn Rasterizer>,
    config: &JobConfig,
    source: SourceRef,
    invocation: Uuid,
) -> Result<JobReport, JobError> {
    let started = Instant::now();
    let transitions = Transitions {
        source: &source.name,
        callback: config.progress_callback.as_deref(),
    };
    info!(length = ?source.length, "Invocation started");

    let workspace = match Workspace::create(config.scratch_root.as_deref(), invocation) {
        Ok(ws) => ws,
        Err(e) => return Err(fail(&transitions, &source, e)),
    };

    let mut progress = Progress::default();
    let steps = execute(
        storage.as_ref(),
        rasterizer,
        config,
        &source,
        &workspace,
        &transitions,
        &mut progress,
    );
    let outcome = match config.timeout {
        Some(limit) => match tokio::time::timeout(limit, steps).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = limit.as_millis() as u64, "Invocation timed out");
                Err(JobError::Timeout {
                    secs: limit.as_secs_f64().ceil() as u64,
                })
            }
        },
        None => steps.await,
    };

    transitions.enter(JobState::Cleanup);
    let cleanup = tokio::task::spawn_blocking(move || workspace.cleanup());
    let scratch_files_removed = match cleanup.await {
        Ok(removed) => removed,
        Err(e) => {
            warn!(error = %e, "Scratch cleanup task failed");
            0
        }
    };

    match outcome {
        Ok(archive) => {
            transitions.enter(JobState::Done);
            let report = JobReport {
                invocation_id: invocation,
                source: source.name.clone(),
                source_bytes: progress.source_bytes,
                outputs: progress.outputs,
                archive,
                scratch_files_removed,
                total_duration_ms: started.elapsed().as_millis() as u64,
                render_duration_ms: progress.render.as_millis() as u64,
                publish_duration_ms: progress.publish.as_millis() as u64,
            };
            info!(
                pages = report.page_count(),
                archive = %report.archive,
                duration_ms = report.total_duration_ms,
                "Invocation complete"
            );
            if let Some(cb) = transitions.callback {
                cb.on_job_complete(&report);
            }
            Ok(report)
        }
        Err(e) => {
            if !progress.outputs.is_empty() {
                warn!(
                    published = progress.outputs.len(),
                    "Pages published before the failure are left in place"
                );
            }
            Err(fail(&transitions, &source, e))
        }
    }
}

fn fail(transitions: &Transitions<'_>, source: &SourceRef, e: JobError) -> JobError {
    error!(
        kind = ?e.kind(),
        source_preserved = e.source_preserved(),
        error = %e,
        "Invocation failed"
    );
    transitions.enter(JobState::Failed);
    if let Some(cb) = transitions.callback {
        cb.on_job_failed(&source.name, &e);
    }
    e
}

/// The strictly sequential body of an invocation. Returns the archive key.
async fn execute(
    storage: &dyn BlobStorage,
    rasterizer: Arc<dyn Rasterizer>,
    config: &JobConfig,
    source: &SourceRef,
    workspace: &Workspace,
    transitions: &Transitions<'_>,
    progress: &mut Progress,
) -> Result<String, JobError> {
    // ── Stage ────────────────────────────────────────────────────────────
    let input = config.locations.input.object(&source.name);
    let data = storage
        .get(&input)
        .await
        .map_err(|e| JobError::StagingError {
            name: source.name.clone(),
            source: e,
        })?;
    if let Some(expected) = source.length {
        if expected != data.len() as u64 {
            warn!(
                expected,
                actual = data.len(),
                "Source length differs from the trigger's"
            );
        }
    }
    progress.source_bytes = data.len() as u64;
    let pdf_path = workspace.stage_source(&data).await?;
    transitions.enter(JobState::Staged);

    check_pdf_header(&data).map_err(|detail| JobError::InvalidDocument {
        name: source.name.clone(),
        detail,
    })?;
    drop(data);

    // ── Convert + publish, one page at a time ────────────────────────────
    transitions.enter(JobState::Converting);
    let opened = Instant::now();
    let mut pages = PageStream::open(
        rasterizer,
        pdf_path,
        source.name.clone(),
        config.dpi,
        workspace.allocator(),
    )
    .await?;
    progress.render += opened.elapsed();

    loop {
        let rendering = Instant::now();
        let Some(page) = pages.next().await else {
            break;
        };
        progress.render += rendering.elapsed();
        let page = page?;

        transitions.enter(JobState::Publishing(page.index));
        let publishing = Instant::now();
        let key = publish_page(storage, &config.locations.output, source, &page).await?;
        progress.publish += publishing.elapsed();

        if let Some(cb) = transitions.callback {
            cb.on_page_published(&source.name, page.index, &key);
        }
        progress.outputs.push(key);
    }
    info!(pages = progress.outputs.len(), "All pages published");

    // ── Relocate ─────────────────────────────────────────────────────────
    transitions.enter(JobState::Archiving);
    let archive = archive_source(storage, &config.locations, source).await?;

    transitions.enter(JobState::SourceDeleting);
    delete_source(storage, &config.locations, source).await?;

    Ok(archive)
}

/// Runs invocations for many sources against shared storage and pdfium.
///
/// Each source gets its own invocation, workspace and outcome; a failure for
/// one source does not affect the others.
#[derive(Clone)]
pub struct JobRunner {
    storage: Arc<dyn BlobStorage>,
    rasterizer: Arc<dyn Rasterizer>,
    config: JobConfig,
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    pub fn new(
        storage: Arc<dyn BlobStorage>,
        rasterizer: Arc<dyn Rasterizer>,
        config: JobConfig,
    ) -> Self {
        Self {
            storage,
            rasterizer,
            config,
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Run a single invocation.
    pub async fn run(&self, source: SourceRef) -> Result<JobReport, JobError> {
        run_job(
            Arc::clone(&self.storage),
            Arc::clone(&self.rasterizer),
            &self.config,
            source,
        )
        .await
    }

    /// Run one invocation per source, at most `config.concurrency` at a time.
    ///
    /// Results are returned in input order.
    pub async fn run_batch(
        &self,
        sources: Vec<SourceRef>,
    ) -> Vec<(SourceRef, Result<JobReport, JobError>)> {
        let concurrency = self.config.concurrency.max(1);
        info!(sources = sources.len(), concurrency, "Batch started");

        let mut results: Vec<(usize, SourceRef, Result<JobReport, JobError>)> =
            stream::iter(sources.into_iter().enumerate())
                .map(|(i, source)| async move {
                    let result = self.run(source.clone()).await;
                    (i, source, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        results.sort_by_key(|(i, _, _)| *i);
        let failed = results.iter().filter(|(_, _, r)| r.is_err()).count();
        info!(total = results.len(), failed, "Batch finished");
        results.into_iter().map(|(_, s, r)| (s, r)).collect()
    }
}
