//! Orchestrator integration tests.
//!
//! These drive full invocations against in-memory blob storage and a scripted
//! rasterizer, so they need neither pdfium nor network access. The scripted
//! rasterizer reads directives from the staged "PDF":
//!
//! ```text
//! %PDF-1.7
//! %pages=3      page count (default 1)
//! %fail=2       page 2 fails to render
//! %corrupt      the document cannot be opened
//! ```
//!
//! Every scripted page is 7.2 × 14.4 pt, i.e. 30 × 60 px at 300 DPI. Like
//! pdfium's FFI calls, scripted renders are serialised process-wide.

use async_trait::async_trait;
use bytes::Bytes;
use image::{GenericImageView, ImageFormat, Rgba, RgbaImage};
use pdf2tiff::storage::StorageResult;
use pdf2tiff::{
    run_job, BlobStorage, JobConfig, JobError, JobProgressCallback, JobReport, JobRunner,
    JobState, Location, Locations, ObjectRef, ObjectStoreStorage, RasterDocument, RasterError,
    Rasterizer, SourceRef, StorageError,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ── Scripted rasterizer ──────────────────────────────────────────────────────

struct ScriptedRasterizer;

static RENDER_LOCK: Mutex<()> = Mutex::new(());

struct Script {
    pages: usize,
    fail_at: Option<usize>,
}

impl Script {
    fn parse(bytes: &[u8]) -> Result<Self, RasterError> {
        let text = String::from_utf8_lossy(bytes);
        if text.contains("%corrupt") {
            return Err(RasterError::new("FormatError: xref table damaged"));
        }
        let mut script = Script {
            pages: 1,
            fail_at: None,
        };
        for line in text.lines() {
            if let Some(v) = line.strip_prefix("%pages=") {
                script.pages = v.trim().parse().map_err(|_| RasterError::new("bad %pages"))?;
            }
            if let Some(v) = line.strip_prefix("%fail=") {
                script.fail_at = Some(v.trim().parse().map_err(|_| RasterError::new("bad %fail"))?);
            }
        }
        Ok(script)
    }
}

impl RasterDocument for Script {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn page_size(&self, _index: usize) -> Result<(f64, f64), RasterError> {
        Ok((7.2, 14.4))
    }

    fn render_page(&self, index: usize, width: u32, height: u32) -> Result<RgbaImage, RasterError> {
        let _render = RENDER_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.fail_at == Some(index + 1) {
            return Err(RasterError::new("scripted render failure"));
        }
        Ok(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([index as u8, x as u8, y as u8, 255])
        }))
    }
}

impl Rasterizer for ScriptedRasterizer {
    fn with_document(
        &self,
        pdf_path: &Path,
        visit: &mut dyn FnMut(&dyn RasterDocument),
    ) -> Result<(), RasterError> {
        let bytes = std::fs::read(pdf_path).map_err(|e| RasterError::new(e.to_string()))?;
        let script = Script::parse(&bytes)?;
        visit(&script);
        Ok(())
    }
}

fn pdf(pages: usize) -> Bytes {
    Bytes::from(format!("%PDF-1.7\n%pages={pages}\n"))
}

// ── Storage with injected faults ─────────────────────────────────────────────

#[derive(Default)]
struct Faults {
    /// Fail `put` for this key.
    put_key: Option<String>,
    /// Delay every `put`.
    put_delay: Option<Duration>,
    copy: bool,
    /// `copy` reports success without writing anything.
    copy_noop: bool,
    delete: bool,
}

struct FaultyStorage {
    inner: ObjectStoreStorage,
    faults: Faults,
}

#[async_trait]
impl BlobStorage for FaultyStorage {
    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    async fn get(&self, object: &ObjectRef) -> StorageResult<Bytes> {
        self.inner.get(object).await
    }

    async fn put(&self, object: &ObjectRef, data: Bytes, ct: Option<&str>) -> StorageResult<()> {
        if let Some(delay) = self.faults.put_delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.put_key.as_deref() == Some(object.key.as_str()) {
            return Err(StorageError::PermissionDenied(object.to_string()));
        }
        self.inner.put(object, data, ct).await
    }

    async fn copy(&self, from: &ObjectRef, to: &ObjectRef) -> StorageResult<()> {
        if self.faults.copy {
            return Err(StorageError::other("copy status: failed"));
        }
        if self.faults.copy_noop {
            return Ok(());
        }
        self.inner.copy(from, to).await
    }

    async fn delete(&self, object: &ObjectRef) -> StorageResult<()> {
        if self.faults.delete {
            return Err(StorageError::other("lease held by another client"));
        }
        self.inner.delete(object).await
    }

    async fn exists(&self, object: &ObjectRef) -> StorageResult<bool> {
        self.inner.exists(object).await
    }

    async fn list(&self, container: &str, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(container, prefix).await
    }
}

// ── Progress recorder ────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<(String, JobState)>>,
    published: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
}

impl Recorder {
    fn states_for(&self, source: &str) -> Vec<JobState> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == source)
            .map(|(_, st)| *st)
            .collect()
    }
}

impl JobProgressCallback for Recorder {
    fn on_state_change(&self, source: &str, state: &JobState) {
        self.states.lock().unwrap().push((source.to_string(), *state));
    }

    fn on_page_published(&self, _source: &str, _index: usize, object: &str) {
        self.published.lock().unwrap().push(object.to_string());
    }

    fn on_job_complete(&self, report: &JobReport) {
        self.completed.lock().unwrap().push(report.source.clone());
    }

    fn on_job_failed(&self, source: &str, _error: &JobError) {
        self.failed.lock().unwrap().push(source.to_string());
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    storage: ObjectStoreStorage,
    scratch: TempDir,
    recorder: Arc<Recorder>,
}

impl Harness {
    fn new() -> Self {
        Self {
            storage: ObjectStoreStorage::in_memory(["in", "out", "archive"]),
            scratch: tempfile::tempdir().unwrap(),
            recorder: Arc::new(Recorder::default()),
        }
    }

    fn config(&self) -> JobConfig {
        JobConfig::builder()
            .locations(Locations {
                input: Location::new("in"),
                output: Location::new("out"),
                archive: Location::new("archive"),
            })
            .scratch_root(self.scratch.path())
            .progress_callback(self.recorder.clone())
            .build()
            .unwrap()
    }

    async fn upload(&self, name: &str, data: Bytes) {
        self.storage
            .put(&ObjectRef::new("in", name), data, Some("application/pdf"))
            .await
            .unwrap();
    }

    async fn run(&self, name: &str) -> Result<JobReport, JobError> {
        self.run_with(Arc::new(self.storage.clone()), name).await
    }

    async fn run_faulty(&self, name: &str, faults: Faults) -> Result<JobReport, JobError> {
        let storage = FaultyStorage {
            inner: self.storage.clone(),
            faults,
        };
        self.run_with(Arc::new(storage), name).await
    }

    async fn run_with(
        &self,
        storage: Arc<dyn BlobStorage>,
        name: &str,
    ) -> Result<JobReport, JobError> {
        run_job(
            storage,
            Arc::new(ScriptedRasterizer),
            &self.config(),
            SourceRef::new(name),
        )
        .await
    }

    async fn list(&self, container: &str) -> Vec<String> {
        self.storage.list(container, "").await.unwrap()
    }

    fn runner(&self, storage: Arc<dyn BlobStorage>, concurrency: usize) -> JobRunner {
        JobRunner::new(
            storage,
            Arc::new(ScriptedRasterizer),
            JobConfig {
                concurrency,
                ..self.config()
            },
        )
    }

    fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch.path()).unwrap().count()
    }
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn invoice_is_published_archived_and_removed() {
    let h = Harness::new();
    h.upload("invoice.pdf", pdf(3)).await;

    let report = h.run("invoice.pdf").await.expect("job should succeed");

    assert_eq!(
        report.outputs,
        vec!["invoice_page_1.tiff", "invoice_page_2.tiff", "invoice_page_3.tiff"]
    );
    assert_eq!(report.archive, "invoice.pdf");
    assert_eq!(report.page_count(), 3);
    assert_eq!(report.source_bytes, pdf(3).len() as u64);
    // source.pdf plus one file per page
    assert_eq!(report.scratch_files_removed, 4);

    assert_eq!(h.list("out").await, report.outputs);
    assert_eq!(h.list("archive").await, vec!["invoice.pdf"]);
    assert!(h.list("in").await.is_empty());
    assert_eq!(h.scratch_entries(), 0, "scratch directory must be removed");

    assert_eq!(
        h.recorder.states_for("invoice.pdf"),
        vec![
            JobState::Staged,
            JobState::Converting,
            JobState::Publishing(1),
            JobState::Publishing(2),
            JobState::Publishing(3),
            JobState::Archiving,
            JobState::SourceDeleting,
            JobState::Cleanup,
            JobState::Done,
        ]
    );
    assert_eq!(*h.recorder.published.lock().unwrap(), report.outputs);
    assert_eq!(*h.recorder.completed.lock().unwrap(), vec!["invoice.pdf"]);
}

#[tokio::test]
async fn published_pages_are_300_dpi_tiffs() {
    let h = Harness::new();
    h.upload("scan.pdf", pdf(2)).await;
    h.run("scan.pdf").await.unwrap();

    let data = h
        .storage
        .get(&ObjectRef::new("out", "scan_page_2.tiff"))
        .await
        .unwrap();
    let img = image::load_from_memory_with_format(&data, ImageFormat::Tiff).unwrap();
    // 7.2 pt × 300/72 = 30 px, 14.4 pt → 60 px
    assert_eq!(img.dimensions(), (30, 60));
    let px = img.to_rgba8();
    assert_eq!(px.get_pixel(4, 9), &Rgba([1, 4, 9, 255]));
}

#[tokio::test]
async fn nested_names_keep_their_directories() {
    let h = Harness::new();
    h.upload("2024/q1/report.v2.pdf", pdf(1)).await;
    let report = h.run("2024/q1/report.v2.pdf").await.unwrap();

    assert_eq!(report.outputs, vec!["2024/q1/report.v2_page_1.tiff"]);
    assert_eq!(h.list("archive").await, vec!["2024/q1/report.v2.pdf"]);
}

// ── Invalid documents ────────────────────────────────────────────────────────

#[tokio::test]
async fn bad_pdf_is_rejected_without_side_effects() {
    let h = Harness::new();
    h.upload("bad.pdf", Bytes::from_static(b"<html>not a pdf</html>")).await;

    let err = h.run("bad.pdf").await.unwrap_err();
    assert!(matches!(err, JobError::InvalidDocument { ref name, .. } if name == "bad.pdf"));
    assert!(err.source_preserved());

    assert!(h.list("out").await.is_empty());
    assert!(h.list("archive").await.is_empty());
    assert_eq!(h.list("in").await, vec!["bad.pdf"]);
    assert_eq!(h.scratch_entries(), 0);
    assert_eq!(
        h.recorder.states_for("bad.pdf"),
        vec![JobState::Staged, JobState::Cleanup, JobState::Failed]
    );
    assert_eq!(*h.recorder.failed.lock().unwrap(), vec!["bad.pdf"]);
}

#[tokio::test]
async fn corrupt_body_is_invalid_document() {
    let h = Harness::new();
    h.upload("broken.pdf", Bytes::from_static(b"%PDF-1.4\n%corrupt\n")).await;

    let err = h.run("broken.pdf").await.unwrap_err();
    match err {
        JobError::InvalidDocument { detail, .. } => assert!(detail.contains("xref")),
        other => panic!("expected InvalidDocument, got {other:?}"),
    }
    assert!(h.list("out").await.is_empty());
    assert_eq!(h.list("in").await, vec!["broken.pdf"]);
}

#[tokio::test]
async fn zero_page_document_is_invalid() {
    let h = Harness::new();
    h.upload("empty.pdf", pdf(0)).await;

    let err = h.run("empty.pdf").await.unwrap_err();
    assert!(matches!(err, JobError::InvalidDocument { .. }));
    assert!(h.list("archive").await.is_empty());
    assert_eq!(h.list("in").await, vec!["empty.pdf"]);
}

// ── Mid-pipeline failures ────────────────────────────────────────────────────

#[tokio::test]
async fn page_render_failure_keeps_earlier_pages_and_source() {
    let h = Harness::new();
    h.upload("doc.pdf", Bytes::from("%PDF-1.7\n%pages=4\n%fail=3\n")).await;

    let err = h.run("doc.pdf").await.unwrap_err();
    assert!(matches!(err, JobError::PageRenderError { index: 3, .. }));

    assert_eq!(h.list("out").await, vec!["doc_page_1.tiff", "doc_page_2.tiff"]);
    assert!(h.list("archive").await.is_empty());
    assert_eq!(h.list("in").await, vec!["doc.pdf"]);
    assert_eq!(h.scratch_entries(), 0);

    let states = h.recorder.states_for("doc.pdf");
    assert!(!states.contains(&JobState::Publishing(3)));
    assert!(!states.contains(&JobState::Archiving));
    assert_eq!(states.last(), Some(&JobState::Failed));
}

#[tokio::test]
async fn upload_failure_stops_before_archiving() {
    let h = Harness::new();
    h.upload("doc.pdf", pdf(3)).await;

    let err = h
        .run_faulty(
            "doc.pdf",
            Faults {
                put_key: Some("doc_page_2.tiff".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, JobError::UploadError { ref object, .. } if object == "out/doc_page_2.tiff")
    );
    assert_eq!(h.list("out").await, vec!["doc_page_1.tiff"]);
    assert!(h.list("archive").await.is_empty());
    assert_eq!(h.list("in").await, vec!["doc.pdf"]);
}

#[tokio::test]
async fn archive_copy_failure_never_deletes_source() {
    let h = Harness::new();
    h.upload("doc.pdf", pdf(2)).await;

    let err = h
        .run_faulty(
            "doc.pdf",
            Faults {
                copy: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::ArchiveCopyError { .. }));
    assert!(err.source_preserved());
    assert_eq!(h.list("out").await.len(), 2, "pages are published before archiving");
    assert!(h.list("archive").await.is_empty());
    assert_eq!(h.list("in").await, vec!["doc.pdf"]);
    assert!(!h.recorder.states_for("doc.pdf").contains(&JobState::SourceDeleting));
}

#[tokio::test]
async fn archive_missing_after_reported_copy_never_deletes_source() {
    let h = Harness::new();
    h.upload("doc.pdf", pdf(2)).await;

    let err = h
        .run_faulty(
            "doc.pdf",
            Faults {
                copy_noop: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    match &err {
        JobError::ArchiveCopyError { name, source } => {
            assert_eq!(name, "doc.pdf");
            assert!(source.is_not_found(), "got: {source}");
        }
        other => panic!("expected ArchiveCopyError, got {other:?}"),
    }
    assert!(err.source_preserved());
    assert!(h.list("archive").await.is_empty());
    assert_eq!(h.list("in").await, vec!["doc.pdf"]);
    assert_eq!(h.scratch_entries(), 0);

    let states = h.recorder.states_for("doc.pdf");
    assert!(states.contains(&JobState::Archiving));
    assert!(!states.contains(&JobState::SourceDeleting));
    assert_eq!(states.last(), Some(&JobState::Failed));
}

#[tokio::test]
async fn delete_failure_leaves_object_in_both_locations() {
    let h = Harness::new();
    h.upload("doc.pdf", pdf(1)).await;

    let err = h
        .run_faulty(
            "doc.pdf",
            Faults {
                delete: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::SourceCleanupError { .. }));
    assert!(err.to_string().contains("both the input and archive"));
    assert!(err.source_preserved());
    assert_eq!(h.list("archive").await, vec!["doc.pdf"]);
    assert_eq!(h.list("in").await, vec!["doc.pdf"]);
    assert_eq!(h.scratch_entries(), 0);
}

// ── Redelivery ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn rerun_overwrites_outputs_and_archive() {
    let h = Harness::new();
    h.upload("invoice.pdf", pdf(3)).await;
    let first = h.run("invoice.pdf").await.unwrap();

    // The same object arrives again.
    h.upload("invoice.pdf", pdf(3)).await;
    let second = h.run("invoice.pdf").await.unwrap();

    assert_eq!(first.outputs, second.outputs);
    assert_ne!(first.invocation_id, second.invocation_id);
    assert_eq!(h.list("out").await.len(), 3);
    assert_eq!(h.list("archive").await, vec!["invoice.pdf"]);
    assert!(h.list("in").await.is_empty());
}

#[tokio::test]
async fn redelivery_after_success_fails_staging() {
    let h = Harness::new();
    h.upload("invoice.pdf", pdf(1)).await;
    tokio_test::assert_ok!(h.run("invoice.pdf").await);

    let err = tokio_test::assert_err!(h.run("invoice.pdf").await);
    match err {
        JobError::StagingError { source, .. } => assert!(source.is_not_found()),
        other => panic!("expected StagingError, got {other:?}"),
    }
    assert_eq!(h.list("archive").await, vec!["invoice.pdf"]);
    assert!(h.list("in").await.is_empty());
}

// ── Concurrency and time budget ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invocations_do_not_share_scratch() {
    let h = Harness::new();
    let names: Vec<String> = (0..6).map(|i| format!("batch_{i}.pdf")).collect();
    for (i, name) in names.iter().enumerate() {
        h.upload(name, pdf(i % 3 + 1)).await;
    }

    let results = h
        .runner(Arc::new(h.storage.clone()), 3)
        .run_batch(names.iter().map(SourceRef::new).collect())
        .await;

    assert_eq!(results.len(), 6);
    for ((source, result), name) in results.iter().zip(&names) {
        assert_eq!(&source.name, name, "results come back in input order");
        let report = result.as_ref().expect("every invocation succeeds");
        assert_eq!(report.scratch_files_removed, report.page_count() + 1);

        let states = h.recorder.states_for(name);
        let archiving = states.iter().position(|s| *s == JobState::Archiving).unwrap();
        assert!(states[archiving..]
            .iter()
            .all(|s| !matches!(s, JobState::Publishing(_))));
    }

    assert_eq!(h.list("out").await.len(), 1 + 2 + 3 + 1 + 2 + 3);
    assert_eq!(h.list("archive").await.len(), 6);
    assert!(h.list("in").await.is_empty());
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_uploads_of_concurrent_invocations_overlap() {
    let h = Harness::new();
    let names: Vec<String> = (0..4).map(|i| format!("slow_{i}.pdf")).collect();
    for name in &names {
        h.upload(name, pdf(3)).await;
    }

    let upload = Duration::from_millis(200);
    let storage = FaultyStorage {
        inner: h.storage.clone(),
        faults: Faults {
            put_delay: Some(upload),
            ..Default::default()
        },
    };

    let started = Instant::now();
    let results = h
        .runner(Arc::new(storage), 4)
        .run_batch(names.iter().map(SourceRef::new).collect())
        .await;
    let elapsed = started.elapsed();

    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(h.list("out").await.len(), 12);
    // 12 uploads one after another take 2.4 s; four invocations side by side
    // take about three uploads' worth.
    let serial = upload * 12;
    assert!(
        elapsed < serial * 5 / 8,
        "uploads were serialised across invocations: {elapsed:?} (serial {serial:?})"
    );
}

#[tokio::test]
async fn timeout_still_cleans_up_and_keeps_source() {
    let h = Harness::new();
    h.upload("slow.pdf", pdf(2)).await;

    let storage = FaultyStorage {
        inner: h.storage.clone(),
        faults: Faults {
            put_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        },
    };
    let config = JobConfig {
        timeout: Some(Duration::from_millis(100)),
        ..h.config()
    };

    let err = run_job(
        Arc::new(storage),
        Arc::new(ScriptedRasterizer),
        &config,
        SourceRef::new("slow.pdf"),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, JobError::Timeout { .. }));
    assert!(!err.source_preserved());
    assert_eq!(h.scratch_entries(), 0);
    assert!(h.list("out").await.is_empty());
    assert_eq!(h.list("in").await, vec!["slow.pdf"]);

    let states = h.recorder.states_for("slow.pdf");
    assert_eq!(
        &states[states.len() - 2..],
        &[JobState::Cleanup, JobState::Failed]
    );
}
