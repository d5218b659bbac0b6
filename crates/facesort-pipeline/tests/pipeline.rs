//! End-to-end runs over real temporary input/output trees.

use facesort_core::{
    BackendError, BoundingBox, Embedding, FaceBackend, FaceDetection, JsonRegistry, KnownFace,
    ReferenceRegistry,
};
use facesort_pipeline::{
    ExecutionMode, Pipeline, PipelineConfig, PipelineError, RunReport, SilentReporter,
    StrategyPreference,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use walkdir::WalkDir;

const RED: [u8; 3] = [255, 0, 0];
const GREEN: [u8; 3] = [0, 255, 0];
const BLUE: [u8; 3] = [0, 0, 255];
const BLACK: [u8; 3] = [0, 0, 0];

/// One face per image, embedded as the normalized colour of the top-left
/// pixel. Black images have no face.
#[derive(Default)]
struct ColourBackend {
    calls: AtomicUsize,
}

impl ColourBackend {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceBackend for ColourBackend {
    fn id(&self) -> String {
        "colour".into()
    }

    fn detect_and_encode(&self, image: &Path) -> Result<Vec<FaceDetection>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let img = image::open(image)
            .map_err(|e| BackendError::DetectionFailed(e.to_string()))?
            .to_rgb8();
        let [r, g, b] = img.get_pixel(0, 0).0;
        if [r, g, b] == BLACK {
            return Ok(Vec::new());
        }
        Ok(vec![FaceDetection {
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 100.0, height: 100.0, confidence: 0.99 },
            embedding: Embedding::new(vec![r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]),
        }])
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
    backend: Arc<ColourBackend>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir_all(&input).unwrap();
        Self { dir, input, output, backend: Arc::new(ColourBackend::default()) }
    }

    fn parent(&self) -> &Path {
        self.dir.path()
    }

    /// Write a `side`x`side` PNG. Different sides give different file sizes.
    fn photo(&self, relative: &str, colour: [u8; 3], side: u32) -> PathBuf {
        let path = self.input.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::from_pixel(side, side, image::Rgb(colour)).save(&path).unwrap();
        path
    }

    fn pipeline(&self, config: PipelineConfig, registry: &JsonRegistry) -> Pipeline {
        Pipeline::new(config, self.backend.clone(), registry)
    }

    fn run(&self, config: PipelineConfig, registry: &JsonRegistry) -> Result<RunReport, PipelineError> {
        self.pipeline(config, registry).run(&self.input, &self.output, &SilentReporter)
    }

    fn listing(&self) -> Vec<String> {
        listing(&self.output)
    }
}

/// Sorted output files, excluding the state area.
fn listing(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".facesort")
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
        .collect();
    files.sort();
    files
}

fn registry() -> JsonRegistry {
    JsonRegistry::from_faces(vec![
        KnownFace { name: "Ann".into(), embedding: Embedding::new(vec![1.0, 0.0, 0.0]) },
        KnownFace { name: "Ben".into(), embedding: Embedding::new(vec![0.0, 1.0, 0.0]) },
    ])
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.parallel.enabled = false;
    config
}

/// Two dates: Ann, two look-alike strangers and a faceless photo on the
/// 21st, Ben on the 22nd.
fn seed(fx: &Fixture) {
    fx.photo("2025-12-21/ann.png", RED, 2);
    fx.photo("2025-12-21/stranger1.png", BLUE, 2);
    fx.photo("2025-12-21/stranger2.png", BLUE, 3);
    fx.photo("2025-12-21/wall.png", BLACK, 2);
    fx.photo("2025-12-22/ben.png", GREEN, 2);
}

#[test]
fn test_first_run_files_every_outcome() {
    let fx = Fixture::new();
    seed(&fx);

    let report = fx.run(config(), &registry()).unwrap();

    assert_eq!(
        fx.listing(),
        vec![
            "Ann/2025-12-21/ann.png",
            "Ben/2025-12-22/ben.png",
            "Unmatched/2025-12-21/wall.png",
            "Unmatched/UnknownPerson_1/2025-12-21/stranger1.png",
            "Unmatched/UnknownPerson_1/2025-12-21/stranger2.png",
        ]
    );
    assert_eq!(report.scanned_files, 5);
    assert_eq!(report.recognized, 5);
    assert_eq!(report.cache_hits, 0);
    assert_eq!((report.matched, report.unmatched, report.no_face, report.errors), (2, 2, 1, 0));
    assert_eq!(report.clusters, 1);
    assert_eq!(report.files_written, 5);
    assert_eq!(report.mode, Some(ExecutionMode::Serial));
    assert!(fx.output.join(".facesort/snapshot.json").is_file());
    assert!(fx.output.join(".facesort/cache/2025-12-21.json").is_file());
}

#[test]
fn test_second_run_on_unchanged_input_is_a_noop() {
    let fx = Fixture::new();
    seed(&fx);
    fx.run(config(), &registry()).unwrap();
    let before = fx.listing();
    let calls = fx.backend.calls();

    let report = fx.run(config(), &registry()).unwrap();

    assert!(report.is_noop());
    assert_eq!(report.files_written, 0);
    assert_eq!(fx.backend.calls(), calls);
    assert_eq!(fx.listing(), before);
}

#[test]
fn test_only_the_changed_date_is_reprocessed() {
    let fx = Fixture::new();
    seed(&fx);
    fx.run(config(), &registry()).unwrap();
    let ben_output = fx.output.join("Ben/2025-12-22/ben.png");
    let ben_modified = fs::metadata(&ben_output).unwrap().modified().unwrap();
    let calls = fx.backend.calls();

    fx.photo("2025-12-21/ann2.png", RED, 4);
    let report = fx.run(config(), &registry()).unwrap();

    assert_eq!(report.changed_dates.iter().collect::<Vec<_>>(), vec!["2025-12-21"]);
    assert!(report.deleted_dates.is_empty());
    assert_eq!(report.cache_hits, 4);
    assert_eq!(report.recognized, 1);
    assert_eq!(fx.backend.calls(), calls + 1);
    assert_eq!(fs::metadata(&ben_output).unwrap().modified().unwrap(), ben_modified);
    assert!(fx.output.join("Ann/2025-12-21/ann2.png").is_file());

    // Same tree as a from-scratch run.
    let fresh = fx.parent().join("fresh");
    fx.pipeline(config(), &registry()).run(&fx.input, &fresh, &SilentReporter).unwrap();
    assert_eq!(fx.listing(), listing(&fresh));
}

#[test]
fn test_modified_file_invalidates_only_its_entry() {
    let fx = Fixture::new();
    seed(&fx);
    fx.run(config(), &registry()).unwrap();
    let calls = fx.backend.calls();

    // Same name, new content and size: now Ben.
    fx.photo("2025-12-21/ann.png", GREEN, 5);
    let report = fx.run(config(), &registry()).unwrap();

    assert_eq!(report.recognized, 1);
    assert_eq!(report.cache_hits, 3);
    assert_eq!(fx.backend.calls(), calls + 1);
    assert!(fx.output.join("Ben/2025-12-21/ann.png").is_file());
    assert!(!fx.output.join("Ann").exists());
}

fn all_dates() -> Vec<&'static str> {
    vec!["2025-12-21", "2025-12-22"]
}

#[test]
fn test_tolerance_change_alone_reprocesses_every_date() {
    let fx = Fixture::new();
    seed(&fx);
    fx.run(config(), &registry()).unwrap();
    let before = fx.listing();
    let calls = fx.backend.calls();

    let mut stricter = config();
    stricter.recognition.tolerance = 0.5;
    let report = fx.run(stricter, &registry()).unwrap();

    assert_eq!(report.changed_dates.iter().collect::<Vec<_>>(), all_dates());
    assert_eq!(report.cache_hits, 0);
    assert_eq!(report.recognized, 5);
    assert_eq!(report.files_written, 5);
    assert_eq!(fx.backend.calls(), calls + 5);
    assert_eq!(fx.listing(), before);

    // Settled again under the new parameters.
    let mut stricter = config();
    stricter.recognition.tolerance = 0.5;
    assert!(fx.run(stricter, &registry()).unwrap().is_noop());
}

#[test]
fn test_min_face_size_change_alone_refiles_output() {
    let fx = Fixture::new();
    seed(&fx);
    fx.run(config(), &registry()).unwrap();

    let mut picky = config();
    picky.recognition.min_face_size = 200;
    let report = fx.run(picky, &registry()).unwrap();

    assert_eq!(report.no_face, 5);
    assert_eq!(
        fx.listing(),
        vec![
            "Unmatched/2025-12-21/ann.png",
            "Unmatched/2025-12-21/stranger1.png",
            "Unmatched/2025-12-21/stranger2.png",
            "Unmatched/2025-12-21/wall.png",
            "Unmatched/2025-12-22/ben.png",
        ]
    );
}

#[test]
fn test_reference_change_alone_reclassifies_unchanged_input() {
    let fx = Fixture::new();
    seed(&fx);
    fx.run(config(), &registry()).unwrap();
    assert!(fx.output.join("Unmatched/UnknownPerson_1/2025-12-21/stranger1.png").is_file());

    let mut faces = registry().known_faces();
    faces.push(KnownFace { name: "Cleo".into(), embedding: Embedding::new(vec![0.0, 0.0, 1.0]) });
    let with_cleo = JsonRegistry::from_faces(faces);
    let report = fx.run(config(), &with_cleo).unwrap();

    assert_eq!(report.changed_dates.iter().collect::<Vec<_>>(), all_dates());
    assert_eq!(report.cache_hits, 0);
    assert_eq!(report.recognized, 5);
    assert!(fx.output.join("Cleo/2025-12-21/stranger1.png").is_file());
    assert!(fx.output.join("Cleo/2025-12-21/stranger2.png").is_file());
    assert!(!fx.output.join("Unmatched/UnknownPerson_1").exists());

    let fresh = fx.parent().join("fresh");
    fx.pipeline(config(), &with_cleo).run(&fx.input, &fresh, &SilentReporter).unwrap();
    assert_eq!(fx.listing(), listing(&fresh));
}

#[test]
fn test_deleted_date_is_removed_everywhere() {
    let fx = Fixture::new();
    seed(&fx);
    fx.run(config(), &registry()).unwrap();
    assert!(fx.output.join(".facesort/cache/2025-12-22.json").is_file());

    fs::remove_dir_all(fx.input.join("2025-12-22")).unwrap();
    let report = fx.run(config(), &registry()).unwrap();

    assert_eq!(report.deleted_dates.iter().collect::<Vec<_>>(), vec!["2025-12-22"]);
    assert!(report.changed_dates.is_empty());
    assert_eq!(report.recognized, 0);
    assert!(!fx.output.join("Ben").exists());
    assert!(!fx.output.join(".facesort/cache/2025-12-22.json").exists());
    assert!(fx.output.join("Ann/2025-12-21/ann.png").is_file());
}

#[test]
fn test_name_collision_gets_suffix() {
    let fx = Fixture::new();
    let nested = fx.photo("2025-12-21/a/x.png", RED, 2);
    let flat = fx.photo("2025-12-21/a_x.png", RED, 3);

    fx.run(config(), &registry()).unwrap();

    let day = fx.output.join("Ann/2025-12-21");
    assert_eq!(fs::read(day.join("a_x.png")).unwrap(), fs::read(nested).unwrap());
    assert_eq!(fs::read(day.join("a_x_1.png")).unwrap(), fs::read(flat).unwrap());
}

#[test]
fn test_differently_spelled_folders_merge_into_one_date() {
    let fx = Fixture::new();
    fx.photo("2025-12-21/a.png", RED, 2);
    fx.photo("21.12.2025/a.png", RED, 3);

    let report = fx.run(config(), &registry()).unwrap();

    assert_eq!(report.changed_dates.len(), 1);
    assert_eq!(
        fx.listing(),
        vec!["Ann/2025-12-21/21.12.2025_a.png", "Ann/2025-12-21/a.png"]
    );
}

#[test]
fn test_subfolder_named_like_other_spelling_is_not_dropped() {
    let fx = Fixture::new();
    fx.photo("2025-12-21/21.12.2025/a.png", RED, 2);
    fx.photo("21.12.2025/a.png", RED, 3);

    let report = fx.run(config(), &registry()).unwrap();

    assert_eq!(report.scanned_files, 2);
    assert_eq!(report.files_written, 2);
    assert_eq!(
        fx.listing(),
        vec!["Ann/2025-12-21/21.12.2025_a.png", "Ann/2025-12-21/21.12.2025~1_a.png"]
    );
}

#[test]
fn test_traversal_identity_aborts_without_escaping() {
    let fx = Fixture::new();
    seed(&fx);
    let hostile = JsonRegistry::from_faces(vec![KnownFace {
        name: "../../x".into(),
        embedding: Embedding::new(vec![1.0, 0.0, 0.0]),
    }]);

    let result = fx.run(config(), &hostile);

    assert!(matches!(result, Err(PipelineError::PathSafety(_))));
    assert!(!fx.parent().join("x").exists());
    assert!(fx.listing().is_empty(), "partial copies are rolled back");
    assert!(!fx.output.join(".facesort/snapshot.json").exists());
}

#[test]
fn test_state_dir_identity_is_rejected() {
    let fx = Fixture::new();
    seed(&fx);
    let hostile = JsonRegistry::from_faces(vec![KnownFace {
        name: ".facesort".into(),
        embedding: Embedding::new(vec![1.0, 0.0, 0.0]),
    }]);

    assert!(matches!(fx.run(config(), &hostile), Err(PipelineError::PathSafety(_))));
}

#[test]
fn test_clustering_disabled_uses_plain_bucket() {
    let fx = Fixture::new();
    seed(&fx);
    let mut no_clusters = config();
    no_clusters.clustering.enabled = false;

    let report = fx.run(no_clusters, &registry()).unwrap();

    assert_eq!(report.clusters, 0);
    assert!(fx.output.join("Unmatched/2025-12-21/stranger1.png").is_file());
    assert!(fx.output.join("Unmatched/2025-12-21/stranger2.png").is_file());
}

#[test]
fn test_unreadable_image_is_an_error_outcome() {
    let fx = Fixture::new();
    seed(&fx);
    fs::write(fx.input.join("2025-12-21/broken.png"), b"not a png").unwrap();

    let report = fx.run(config(), &registry()).unwrap();

    assert_eq!(report.errors, 1);
    assert!(fx.output.join("Unmatched/2025-12-21/broken.png").is_file());
}

#[test]
fn test_corrupt_cache_is_treated_as_empty() {
    let fx = Fixture::new();
    seed(&fx);
    fx.run(config(), &registry()).unwrap();
    fs::write(fx.output.join(".facesort/cache/2025-12-21.json"), b"{ torn").unwrap();

    fx.photo("2025-12-21/extra.png", BLACK, 3);
    let report = fx.run(config(), &registry()).unwrap();

    assert_eq!(report.cache_hits, 0);
    assert_eq!(report.recognized, 5);
    let reloaded = fs::read_to_string(fx.output.join(".facesort/cache/2025-12-21.json")).unwrap();
    assert!(reloaded.contains("extra.png"));
}

#[test]
fn test_thread_pool_matches_serial_output() {
    let fx = Fixture::new();
    seed(&fx);
    for i in 0..6 {
        fx.photo(&format!("2025-12-23/ann{i}.png"), RED, 2 + i);
    }
    let mut threaded = config();
    threaded.parallel.enabled = true;
    threaded.parallel.workers = 4;
    threaded.parallel.min_files = 2;
    threaded.parallel.batch_size = 3;
    threaded.parallel.strategy = StrategyPreference::Threads;

    let report = fx.run(threaded, &registry()).unwrap();
    assert_eq!(report.recognized, 11);
    assert!(!report.fallback_used);

    let serial = fx.parent().join("serial");
    fx.pipeline(config(), &registry()).run(&fx.input, &serial, &SilentReporter).unwrap();
    assert_eq!(fx.listing(), listing(&serial));
}

#[test]
fn test_plan_preview_writes_nothing() {
    let fx = Fixture::new();
    seed(&fx);

    let preview = fx.pipeline(config(), &registry()).plan(&fx.input, &fx.output).unwrap();

    assert_eq!(preview.plan.changed_dates.len(), 2);
    assert_eq!(preview.to_recognize, 5);
    assert_eq!(preview.cache_hits, 0);
    assert_eq!(fx.backend.calls(), 0);
    assert!(!fx.output.exists());
}
