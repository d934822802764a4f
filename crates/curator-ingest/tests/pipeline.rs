//! End-to-end tests for the ingest pipeline.
//!
//! Each test builds its own in-memory repository, search index, lane queue
//! and working directory, submits through the actor where that is the point
//! of the test, and drains the lane with a worker.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use curator_core::config::IngestConfig;
use curator_core::store::{RepositoryStore, VersionStore};
use curator_core::types::{
    Actor, BinaryRef, DocumentKind, FileSet, IngestEntry, IngestOptions, IngestionRequest, Job,
    ParentWork, ORIGINAL_FILE, RESTORED_FILE, THUMBNAIL,
};
use curator_ingest::{
    CharacterizationError, Characterizer, Collaborators, DerivativeError, DerivativeRecipe, EntryStatus, FileActor, FileCharacterizer,
    IngestOrchestrator, IngestSource, JobQueue, LaneQueue, LocalFile, RecipeGenerator, Rendition,
    UploadedFile, Worker, WorkingStore,
};
use curator_storage::{MemoryRepository, MemorySearchIndex};

// =============================================================================
// Helpers
// =============================================================================

/// Thumbnail recipe that counts renders instead of shelling out.
struct CountingThumbnail {
    renders: Arc<AtomicUsize>,
}

#[async_trait]
impl DerivativeRecipe for CountingThumbnail {
    fn name(&self) -> &str {
        "thumbnail"
    }

    fn relation(&self) -> &str {
        THUMBNAIL
    }

    fn accepts(&self, mime_type: &str) -> bool {
        mime_type.starts_with("image/") || mime_type.starts_with("video/")
    }

    async fn render(&self, source: &Path, _scratch: &Path) -> Result<Rendition, DerivativeError> {
        assert!(source.exists(), "derivatives must read the canonical path");
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(Rendition {
            content: b"thumb".to_vec(),
            mime_type: "image/jpeg".to_string(),
            file_name: "thumbnail.jpg".to_string(),
        })
    }
}

/// Holds the first characterization until released and records the bytes
/// every call read from its working copy.
struct GatedCharacterizer {
    hold_first: AtomicBool,
    entered: Notify,
    release: Notify,
    seen: Mutex<Vec<Vec<u8>>>,
}

impl GatedCharacterizer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            hold_first: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Characterizer for GatedCharacterizer {
    async fn characterize(
        &self,
        file_set: &mut FileSet,
        binary: &BinaryRef,
        path: &Path,
    ) -> Result<(), CharacterizationError> {
        if self.hold_first.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        let bytes = std::fs::read(path).map_err(|source| CharacterizationError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        self.seen.lock().unwrap().push(bytes);
        FileCharacterizer.characterize(file_set, binary, path).await
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    working: WorkingStore,
    repo: Arc<MemoryRepository>,
    index: Arc<MemorySearchIndex>,
    queue: Arc<LaneQueue>,
    orchestrator: Arc<IngestOrchestrator>,
    worker: Worker,
    renders: Arc<AtomicUsize>,
    config: IngestConfig,
}

impl Harness {
    fn new(enable_transcode: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let working = WorkingStore::new(dir.path().join("working"));
        let repo = Arc::new(MemoryRepository::new());
        let index = Arc::new(MemorySearchIndex::new());
        let queue = Arc::new(LaneQueue::new());
        let renders = Arc::new(AtomicUsize::new(0));
        let config = IngestConfig {
            queue_name: "ingest".to_string(),
            enable_transcode,
            max_attempts: 2,
            ..IngestConfig::default()
        };

        let generator = RecipeGenerator::new(repo.clone()).with_recipe(Box::new(CountingThumbnail {
            renders: renders.clone(),
        }));
        let orchestrator = Arc::new(IngestOrchestrator::new(
            repo.clone(),
            repo.clone(),
            index.clone(),
            Arc::new(FileCharacterizer),
            Arc::new(generator),
            working.clone(),
            config.clone(),
        ));
        let worker = Worker::new(
            queue.clone(),
            &config.queue_name,
            orchestrator.clone(),
            config.max_attempts,
        )
        .unwrap();

        Self {
            _dir: dir,
            working,
            repo,
            index,
            queue,
            orchestrator,
            worker,
            renders,
            config,
        }
    }

    fn actor(&self, file_set_id: &str) -> FileActor {
        FileActor::new(
            file_set_id,
            Actor::new("alice"),
            Collaborators {
                store: self.repo.clone(),
                versions: self.repo.clone(),
                queue: self.queue.clone(),
                working: self.working.clone(),
                config: self.config.clone(),
            },
        )
    }

    fn add_file_set(&self, file_set: FileSet) {
        self.repo.insert_file_set(file_set).unwrap();
    }

    fn working_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(path);
                }
            }
        }
        let mut out = Vec::new();
        walk(self.working.root(), &mut out);
        out
    }
}

fn upload(bytes: Vec<u8>, mime: &str, name: &str) -> Box<dyn IngestSource> {
    Box::new(
        UploadedFile::new(bytes)
            .with_content_type(mime)
            .with_filename(name),
    )
}

/// Baseline JPEG with an APP0 segment and a SOF0 frame header.
fn jpeg(width: u16, height: u16) -> Vec<u8> {
    let mut b = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    b.extend_from_slice(b"JFIF\0");
    b.extend_from_slice(&[1, 1, 0, 0, 1, 0, 1, 0, 0]);
    b.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
    b.extend_from_slice(&height.to_be_bytes());
    b.extend_from_slice(&width.to_be_bytes());
    b.extend_from_slice(&[3, 1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1, 0xFF, 0xD9]);
    b
}

fn mp4() -> Vec<u8> {
    let mut b = 24u32.to_be_bytes().to_vec();
    b.extend_from_slice(b"ftypisom");
    b.extend_from_slice(&[0, 0, 2, 0]);
    b.extend_from_slice(b"isomavc1");
    b
}

fn entry(file_set_id: &str, working_file: PathBuf, relation: &str) -> IngestEntry {
    IngestEntry {
        file_set_id: file_set_id.to_string(),
        user: Actor::new("alice"),
        working_file,
        options: IngestOptions {
            relation: relation.to_string(),
            ..IngestOptions::default()
        },
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_image_end_to_end() {
    let h = Harness::new(false);
    h.add_file_set(FileSet::new("fs1"));

    let files = vec![(
        "original".to_string(),
        upload(jpeg(800, 600), "image/jpeg", "photo.jpg"),
    )];
    assert!(h.actor("fs1").submit(files).unwrap());

    let stats = h.worker.drain().await;
    assert_eq!(stats.completed, 1);

    let fs = h.repo.find("fs1").await.unwrap();
    let original = fs.binary("original").unwrap();
    assert_eq!(original.original_name, "photo.jpg");
    assert_eq!(original.mime_type.as_deref(), Some("image/jpeg"));
    assert_eq!(h.repo.version_count(&original.id), 1);

    let c = &fs.characteristics;
    assert_eq!(c.mime_type.as_deref(), Some("image/jpeg"));
    assert_eq!((c.width, c.height), (Some(800), Some(600)));
    assert!(c.checksum.is_some());

    assert!(fs.binary(THUMBNAIL).is_some());
    assert_eq!(h.renders.load(Ordering::SeqCst), 1);

    // Characterize and derive each publish the file set once; no ancestors.
    assert_eq!(
        h.index.published_ids(),
        vec![
            (DocumentKind::FileSet, "fs1".to_string()),
            (DocumentKind::FileSet, "fs1".to_string()),
        ]
    );
    let last = h.index.published().pop().unwrap();
    assert_eq!(last.fields["has_thumbnail"], true);

    assert!(h.working_files().is_empty());
}

#[tokio::test]
async fn test_disabled_transcode_video_skips_derive() {
    let h = Harness::new(false);
    h.add_file_set(FileSet::new("fs1"));

    let files = vec![(
        "restored".to_string(),
        upload(mp4(), "video/mp4", "clip.mp4"),
    )];
    h.actor("fs1").submit(files).unwrap();
    h.worker.drain().await;

    let fs = h.repo.find("fs1").await.unwrap();
    assert_eq!(fs.characteristics.mime_type.as_deref(), Some("video/mp4"));
    assert!(fs.binary(THUMBNAIL).is_none());
    assert_eq!(h.renders.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.index.published_ids(),
        vec![(DocumentKind::FileSet, "fs1".to_string())]
    );
}

#[tokio::test]
async fn test_enabled_transcode_video_derives() {
    let h = Harness::new(true);
    h.add_file_set(FileSet::new("fs1"));

    let files = vec![("restored".to_string(), upload(mp4(), "video/mp4", "clip.mp4"))];
    h.actor("fs1").submit(files).unwrap();
    h.worker.drain().await;

    assert_eq!(h.renders.load(Ordering::SeqCst), 1);
    assert_eq!(h.index.publish_count(DocumentKind::FileSet, "fs1"), 2);
}

#[tokio::test]
async fn test_reindex_cascade_reaches_collections_and_thumbnail_parent() {
    let h = Harness::new(false);
    h.repo
        .register_work(ParentWork {
            id: "w1".to_string(),
            thumbnail_id: Some("fs1".to_string()),
            collection_ids: vec!["c1".to_string(), "c2".to_string()],
        })
        .unwrap();
    h.add_file_set(FileSet::new("fs1").with_parent("w1"));
    h.add_file_set(FileSet::new("fs2").with_parent("w1"));

    let thumb = vec![(ORIGINAL_FILE.to_string(), upload(jpeg(10, 10), "image/jpeg", "a.jpg"))];
    h.actor("fs1").submit(thumb).unwrap();
    h.worker.drain().await;

    assert_eq!(
        h.index.published_ids(),
        vec![
            (DocumentKind::FileSet, "fs1".to_string()),
            (DocumentKind::Collection, "c1".to_string()),
            (DocumentKind::Collection, "c2".to_string()),
            (DocumentKind::FileSet, "fs1".to_string()),
            (DocumentKind::Work, "w1".to_string()),
        ]
    );

    // fs2 is not the work's thumbnail: collections yes, parent work no.
    h.index.clear();
    let other = vec![(ORIGINAL_FILE.to_string(), upload(jpeg(10, 10), "image/jpeg", "b.jpg"))];
    h.actor("fs2").submit(other).unwrap();
    h.worker.drain().await;

    assert_eq!(h.index.publish_count(DocumentKind::Collection, "c1"), 1);
    assert_eq!(h.index.publish_count(DocumentKind::Collection, "c2"), 1);
    assert_eq!(h.index.publish_count(DocumentKind::Work, "w1"), 0);
    assert_eq!(h.index.publish_count(DocumentKind::FileSet, "fs2"), 2);
}

#[tokio::test]
async fn test_failed_entry_is_isolated_and_cleaned_up() {
    let h = Harness::new(false);
    h.add_file_set(FileSet::new("fs1"));

    let files = vec![
        // Empty content cannot be characterized.
        (ORIGINAL_FILE.to_string(), upload(Vec::new(), "image/jpeg", "empty.jpg")),
        (RESTORED_FILE.to_string(), upload(jpeg(4, 4), "image/jpeg", "ok.jpg")),
    ];
    h.actor("fs1").submit(files).unwrap();
    assert_eq!(h.working_files().len(), 2);

    let stats = h.worker.drain().await;
    // Entry failures do not fail the job, so nothing is redelivered.
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.redelivered, 0);
    assert!(h.working_files().is_empty());

    let fs = h.repo.find("fs1").await.unwrap();
    assert!(fs.binary(RESTORED_FILE).is_some());
    assert_eq!(fs.characteristics.width, Some(4));
}

#[tokio::test]
async fn test_report_lists_each_entry_in_order() {
    let h = Harness::new(false);
    h.add_file_set(FileSet::new("fs1"));
    let outside = tempfile::tempdir().unwrap();
    let good = outside.path().join("good.jpg");
    std::fs::write(&good, jpeg(2, 2)).unwrap();

    let request = IngestionRequest {
        entries: vec![
            entry("fs1", outside.path().join("missing.jpg"), ORIGINAL_FILE),
            entry("fs1", good, ORIGINAL_FILE),
        ],
    };
    let report = h.orchestrator.perform(&request).await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.completed(), 1);
    assert!(matches!(report.outcomes[0].status, EntryStatus::Failed { .. }));
    match &report.outcomes[1].status {
        EntryStatus::Completed {
            version,
            derivatives,
            derivatives_skipped,
        } => {
            assert_eq!(version.actor, Actor::new("alice"));
            assert_eq!(derivatives.created, vec![THUMBNAIL.to_string()]);
            assert!(!derivatives_skipped);
        }
        other => panic!("unexpected status: {:?}", other),
    }
}

#[tokio::test]
async fn test_persist_failure_aborts_only_that_entry() {
    let h = Harness::new(false);
    h.add_file_set(FileSet::new("fs1"));
    let outside = tempfile::tempdir().unwrap();
    let a = outside.path().join("a.jpg");
    let b = outside.path().join("b.jpg");
    std::fs::write(&a, jpeg(1, 1)).unwrap();
    std::fs::write(&b, jpeg(2, 2)).unwrap();

    h.repo.fail_next_persists(1);
    let report = h
        .orchestrator
        .perform(&IngestionRequest {
            entries: vec![entry("fs1", a, "first"), entry("fs1", b, "second")],
        })
        .await;

    match &report.outcomes[0].status {
        EntryStatus::Failed { error } => assert!(error.starts_with("Persistence failure")),
        other => panic!("unexpected status: {:?}", other),
    }
    assert!(matches!(report.outcomes[1].status, EntryStatus::Completed { .. }));
    assert_eq!(h.repo.total_versions(), 1);
    assert_eq!(h.renders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_durable_input_is_referenced_and_kept() {
    let h = Harness::new(false);
    h.add_file_set(FileSet::new("fs1"));
    let outside = tempfile::tempdir().unwrap();
    let path = outside.path().join("scan.jpg");
    std::fs::write(&path, jpeg(3, 3)).unwrap();

    let files: Vec<(String, Box<dyn IngestSource>)> =
        vec![(ORIGINAL_FILE.to_string(), Box::new(LocalFile::new(&path)))];
    h.actor("fs1").submit(files).unwrap();
    assert!(h.working_files().is_empty());

    h.worker.drain().await;
    assert!(path.exists());
    assert!(h.working_files().is_empty());

    let fs = h.repo.find("fs1").await.unwrap();
    assert_eq!(fs.binary(ORIGINAL_FILE).unwrap().original_name, "scan.jpg");
}

#[tokio::test]
async fn test_rerun_is_idempotent_with_growing_history() {
    let h = Harness::new(false);
    h.add_file_set(FileSet::new("fs1"));
    let outside = tempfile::tempdir().unwrap();
    let path = outside.path().join("photo.jpg");
    std::fs::write(&path, jpeg(64, 48)).unwrap();
    let request = IngestionRequest {
        entries: vec![entry("fs1", path, ORIGINAL_FILE)],
    };

    assert!(h.orchestrator.perform(&request).await.is_success());
    let first = h.repo.find("fs1").await.unwrap();
    let binary_id = first.binary(ORIGINAL_FILE).unwrap().id.clone();
    let versions_after_first = h.repo.version_count(&binary_id);

    assert!(h.orchestrator.perform(&request).await.is_success());
    let second = h.repo.find("fs1").await.unwrap();

    assert_eq!(second.binary(ORIGINAL_FILE), first.binary(ORIGINAL_FILE));
    let (_, content) = h.repo.read_binary(&binary_id).await.unwrap();
    assert_eq!(content, jpeg(64, 48));

    let (a, b) = (&first.characteristics, &second.characteristics);
    assert_eq!(a.mime_type, b.mime_type);
    assert_eq!(a.checksum, b.checksum);
    assert_eq!((a.width, a.height), (b.width, b.height));
    assert_eq!(a.file_size, b.file_size);

    assert!(versions_after_first >= 1);
    assert!(h.repo.version_count(&binary_id) > versions_after_first);
}

#[tokio::test]
async fn test_revert_then_characterize_without_derivatives() {
    let h = Harness::new(false);
    h.add_file_set(FileSet::new("fs1"));

    let first = vec![(ORIGINAL_FILE.to_string(), upload(jpeg(100, 50), "image/jpeg", "a.jpg"))];
    h.actor("fs1").submit(first).unwrap();
    h.worker.drain().await;

    let binary_id = h
        .repo
        .find("fs1")
        .await
        .unwrap()
        .binary(ORIGINAL_FILE)
        .unwrap()
        .id
        .clone();
    let v1 = h.repo.versions(&binary_id).await.unwrap().remove(0);

    let second = vec![(ORIGINAL_FILE.to_string(), upload(jpeg(20, 10), "image/jpeg", "a.jpg"))];
    h.actor("fs1").submit(second).unwrap();
    h.worker.drain().await;
    assert_eq!(h.repo.find("fs1").await.unwrap().characteristics.width, Some(20));
    assert_eq!(h.renders.load(Ordering::SeqCst), 2);
    h.index.clear();

    assert!(h.actor("fs1").revert_to(ORIGINAL_FILE, &v1.id).await.unwrap());
    assert_eq!(h.repo.version_count(&binary_id), 3);

    let stats = h.worker.drain().await;
    assert_eq!(stats.completed, 1);

    let fs = h.repo.find("fs1").await.unwrap();
    assert_eq!(fs.characteristics.width, Some(100));
    assert_eq!(h.renders.load(Ordering::SeqCst), 2);
    assert_eq!(
        h.index.published_ids(),
        vec![(DocumentKind::FileSet, "fs1".to_string())]
    );
    assert!(h.working_files().is_empty());
}

#[tokio::test]
async fn test_characterize_job_failure_is_redelivered() {
    let h = Harness::new(false);
    h.add_file_set(FileSet::new("fs1"));
    let outside = tempfile::tempdir().unwrap();
    let path = outside.path().join("a.jpg");
    std::fs::write(&path, jpeg(5, 5)).unwrap();
    h.orchestrator
        .perform(&IngestionRequest {
            entries: vec![entry("fs1", path, ORIGINAL_FILE)],
        })
        .await;

    // Both delivery attempts fail to persist.
    h.repo.fail_next_persists(2);
    h.queue
        .enqueue(
            "ingest",
            Job::Characterize {
                file_set_id: "fs1".to_string(),
                relation: ORIGINAL_FILE.to_string(),
            },
        )
        .unwrap();

    let stats = h.worker.drain().await;
    assert_eq!(stats.redelivered, 1);
    assert_eq!(stats.abandoned, 1);
    assert!(h.working_files().is_empty());
}

#[tokio::test]
async fn test_concurrent_entries_on_one_relation_use_their_own_copies() {
    let h = Harness::new(false);
    h.add_file_set(FileSet::new("fs1"));
    let gate = GatedCharacterizer::new();
    let orchestrator = IngestOrchestrator::new(
        h.repo.clone(),
        h.repo.clone(),
        h.index.clone(),
        gate.clone(),
        Arc::new(RecipeGenerator::new(h.repo.clone())),
        h.working.clone(),
        h.config.clone(),
    );

    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    let first = first_dir.path().join("a.txt");
    let second = second_dir.path().join("a.txt");
    std::fs::write(&first, b"AAAA first upload").unwrap();
    std::fs::write(&second, b"BBBB second upload").unwrap();
    let first_request = IngestionRequest {
        entries: vec![entry("fs1", first, ORIGINAL_FILE)],
    };
    let second_request = IngestionRequest {
        entries: vec![entry("fs1", second, ORIGINAL_FILE)],
    };

    // The second entry attaches, characterizes and cleans up while the first
    // is held inside characterization.
    let (first_report, second_report) = tokio::join!(
        orchestrator.perform(&first_request),
        async {
            gate.entered.notified().await;
            let report = orchestrator.perform(&second_request).await;
            gate.release.notify_one();
            report
        }
    );

    assert!(second_report.is_success(), "{:?}", second_report);
    assert!(first_report.is_success(), "{:?}", first_report);
    assert_eq!(
        *gate.seen.lock().unwrap(),
        vec![b"BBBB second upload".to_vec(), b"AAAA first upload".to_vec()]
    );

    let fs = h.repo.find("fs1").await.unwrap();
    let binary_id = &fs.binary(ORIGINAL_FILE).unwrap().id;
    assert_eq!(h.repo.version_count(binary_id), 2);
    assert!(h.working_files().is_empty());
}
