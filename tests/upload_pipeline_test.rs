use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use photo_uplink::config::RetryPolicy;
use photo_uplink::photo::codec::{encode_to_path, write_orientation};
use photo_uplink::storage::mock::ScriptedStorage;
use photo_uplink::{
    ClientFactory, EncodingFormat, ImageSpec, ServiceConfig, TransferId, UploadListener,
    UploadOrchestrator, UploadOutcome, UploadRequest, WatermarkLine,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

#[derive(Default)]
struct Events {
    log: Mutex<Vec<String>>,
}

impl Events {
    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl UploadListener for Events {
    fn show_progress(&self) {
        self.log.lock().unwrap().push("show".to_string());
    }

    fn on_progress_changed(&self, _id: TransferId, current: f32, total: f32) {
        self.log
            .lock()
            .unwrap()
            .push(format!("progress {} {}", current, total));
    }

    fn on_success(&self, url: &str) {
        self.log.lock().unwrap().push(format!("success {}", url));
    }

    fn on_error(&self, message: &str, _request: &UploadRequest) {
        self.log.lock().unwrap().push(format!("error {}", message));
    }

    fn on_state_changed(&self, label: &str) {
        self.log.lock().unwrap().push(format!("state {}", label));
    }
}

fn service() -> ServiceConfig {
    ServiceConfig::builder("field-photos")
        .identity_pool_id("ap-southeast-1:pool")
        .region("ap-southeast-1")
        .base_url("https://field-photos.s3.ap-southeast-1.amazonaws.com/")
        .build()
        .unwrap()
}

/// Landscape JPEG: red left half, blue right half
fn write_camera_jpeg(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb([255, 0, 0])
        } else {
            Rgb([0, 0, 255])
        }
    });
    encode_to_path(
        &DynamicImage::ImageRgb8(img),
        path,
        EncodingFormat::Jpeg { quality: 90 },
    )
    .unwrap();
}

fn orchestrator(storage: &ScriptedStorage) -> UploadOrchestrator {
    let factory = Arc::new(ClientFactory::with_client(Arc::new(storage.clone())));
    UploadOrchestrator::new(factory).with_retry_policy(RetryPolicy::immediate())
}

#[tokio::test]
async fn test_rotated_watermarked_photo_uploaded_after_retries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("IMG_0001.jpg");
    write_camera_jpeg(&path, 1600, 1200);
    write_orientation(&path, 6).unwrap();

    let storage = ScriptedStorage::new()
        .then_events(ScriptedStorage::failed_events(1_000, 40_000))
        .then_events(ScriptedStorage::failed_events(20_000, 40_000))
        .then_events(ScriptedStorage::completed_events(40_000));
    let events = Events::default();

    let spec = ImageSpec::new(&path)
        .with_bounds(800, 600)
        .with_watermark(vec![
            WatermarkLine::new("Outlet name", "Corner Shop"),
            WatermarkLine::new("Verified by", "Field team"),
        ]);
    let request = UploadRequest::new(service(), spec, "test/outlet_profile");

    let mut delivered = None;
    let outcome = orchestrator(&storage)
        .begin_upload(request, &events, |url| delivered = Some(url))
        .await
        .unwrap();

    let expected =
        "https://field-photos.s3.ap-southeast-1.amazonaws.com/test/outlet_profile/IMG_0001.jpg";
    assert_eq!(
        outcome,
        UploadOutcome::Completed {
            url: expected.to_string()
        }
    );
    assert_eq!(delivered.as_deref(), Some(expected));
    assert_eq!(storage.resume_count(), 2);

    let log = events.entries();
    assert_eq!(log.first().map(String::as_str), Some("show"));
    assert_eq!(log.last().cloned(), Some(format!("success {}", expected)));
    assert!(!log.iter().any(|e| e.starts_with("state ")));

    // Uploaded file is upright and bounded
    let uploaded = ImageReader::open(&path).unwrap().decode().unwrap().to_rgb8();
    assert!(uploaded.width() <= 800 && uploaded.height() <= 600);
    assert!(uploaded.height() > uploaded.width());
    let top = uploaded.get_pixel(uploaded.width() / 2, uploaded.height() / 10);
    assert!(top[0] > 150 && top[2] < 100, "top should be red, got {:?}", top);

    let put = &storage.puts()[0];
    assert_eq!(put.bucket, "field-photos");
    assert_eq!(put.key, "test/outlet_profile/IMG_0001.jpg");
}

#[tokio::test]
async fn test_persistent_failure_reports_failed_state_once() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shelf.jpg");
    write_camera_jpeg(&path, 200, 100);

    let mut storage = ScriptedStorage::new();
    for _ in 0..5 {
        storage = storage.then_events(ScriptedStorage::failed_events(10, 100));
    }
    let events = Events::default();

    let outcome = orchestrator(&storage)
        .begin_upload(
            UploadRequest::new(service(), ImageSpec::new(&path), "audits"),
            &events,
            |_| {},
        )
        .await
        .unwrap();

    assert_eq!(outcome, UploadOutcome::Failed);
    assert_eq!(storage.resume_count(), 2);
    let states: Vec<_> = events
        .entries()
        .into_iter()
        .filter(|e| e.starts_with("state ") || e.starts_with("success") || e.starts_with("error"))
        .collect();
    assert_eq!(states, vec!["state FAILED".to_string()]);
}

#[tokio::test]
async fn test_progress_stream_is_monotonic_and_bounded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("aisle.jpg");
    write_camera_jpeg(&path, 300, 200);

    let storage = ScriptedStorage::new()
        .then_events(ScriptedStorage::failed_events(900, 1000))
        .then_events(vec![
            photo_uplink::TransferEvent::Progress {
                current: 0,
                total: 1000,
            },
            photo_uplink::TransferEvent::Progress {
                current: 1500,
                total: 1000,
            },
            photo_uplink::TransferEvent::StateChanged(photo_uplink::TransferState::Completed),
        ]);
    let events = Events::default();

    orchestrator(&storage)
        .begin_upload(
            UploadRequest::new(service(), ImageSpec::new(&path), "audits"),
            &events,
            |_| {},
        )
        .await
        .unwrap();

    let progress: Vec<(f32, f32)> = events
        .entries()
        .iter()
        .filter_map(|e| e.strip_prefix("progress "))
        .map(|rest| {
            let (current, total) = rest.split_once(' ').unwrap();
            (current.parse().unwrap(), total.parse().unwrap())
        })
        .collect();

    assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0));
    assert!(progress.iter().all(|(c, t)| c <= t));
    assert_eq!(progress.last(), Some(&(1000.0, 1000.0)));
}

#[tokio::test]
async fn test_shared_factory_builds_one_client() {
    let dir = tempdir().unwrap();
    let storage = ScriptedStorage::new();
    let builds = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&builds);
    let client = storage.clone();
    let factory = Arc::new(ClientFactory::with_builder(move |_config| {
        *counter.lock().unwrap() += 1;
        let client = client.clone();
        async move {
            Ok::<Arc<dyn photo_uplink::StorageClient>, photo_uplink::UplinkError>(Arc::new(client))
        }
    }));
    let orchestrator = UploadOrchestrator::new(Arc::clone(&factory))
        .with_retry_policy(RetryPolicy::immediate());

    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        let path = dir.path().join(name);
        write_camera_jpeg(&path, 64, 64);
        let request = UploadRequest::new(service(), ImageSpec::new(&path), "batch");
        let outcome = orchestrator
            .begin_upload(request, &Events::default(), |_| {})
            .await
            .unwrap();
        assert!(matches!(outcome, UploadOutcome::Completed { .. }));
    }

    assert_eq!(*builds.lock().unwrap(), 1);
    assert_eq!(storage.puts().len(), 3);
}
