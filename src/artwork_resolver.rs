//! Artwork resolution off the coordinator thread.
//!
//! A bounded worker pool turns artwork references into decoded RGBA bytes
//! and posts the result back to the coordinator stamped with the generation
//! it was requested under. The coordinator compares that stamp against the
//! current generation on arrival, so an in-flight fetch never needs explicit
//! cancellation: its result is simply discarded if the track changed.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use log::{debug, warn};
use tokio::sync::mpsc::UnboundedSender;
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

use crate::error::ResolveError;
use crate::options::ArtworkPolicy;
use crate::protocol::CoordinatorMessage;
use crate::session_state::{ArtworkSource, ImageBytes};

/// Raw artwork bytes by source kind.
///
/// The resolver decodes and scales; the catalog only produces encoded bytes.
/// Splitting here keeps network and filesystem access behind one seam.
pub trait ArtworkCatalog: Send + Sync {
    fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, ResolveError>;
    fn read_local(&self, path: &Path) -> Result<Vec<u8>, ResolveError>;
    fn bundled(&self, name: &str) -> Result<Vec<u8>, ResolveError>;
}

/// Catalog backed by HTTP for remote sources, the filesystem for local
/// paths, and a caller-registered byte map for bundled names.
pub struct HttpArtworkCatalog {
    http_client: ureq::Agent,
    bundled: HashMap<String, Vec<u8>>,
}

impl HttpArtworkCatalog {
    pub fn new(policy: &ArtworkPolicy) -> Self {
        Self::with_bundled(policy, HashMap::new())
    }

    /// Registers named artwork blobs resolvable as `BundledName` sources.
    pub fn with_bundled(policy: &ArtworkPolicy, bundled: HashMap<String, Vec<u8>>) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(u64::from(policy.connect_timeout_secs)))
            .timeout_read(Duration::from_secs(u64::from(policy.read_timeout_secs)))
            .timeout_write(Duration::from_secs(u64::from(policy.read_timeout_secs)))
            .build();
        Self {
            http_client,
            bundled,
        }
    }
}

impl ArtworkCatalog for HttpArtworkCatalog {
    fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        let response = self.http_client.get(url).call().map_err(|error| match error {
            ureq::Error::Status(status, _) => ResolveError::Http { status },
            ureq::Error::Transport(transport) => ResolveError::Network(transport.to_string()),
        })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|error| ResolveError::Network(error.to_string()))?;
        Ok(bytes)
    }

    fn read_local(&self, path: &Path) -> Result<Vec<u8>, ResolveError> {
        fs::read(path).map_err(|_| ResolveError::Unreadable(path.display().to_string()))
    }

    fn bundled(&self, name: &str) -> Result<Vec<u8>, ResolveError> {
        self.bundled
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::MissingResource(name.to_string()))
    }
}

struct ResolveJob {
    source: ArtworkSource,
    generation: u64,
}

/// Bounded worker pool resolving artwork references.
pub struct ArtworkResolver {
    job_sender: Option<Sender<ResolveJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl ArtworkResolver {
    pub fn new(
        catalog: Arc<dyn ArtworkCatalog>,
        policy: &ArtworkPolicy,
        mailbox: UnboundedSender<CoordinatorMessage>,
    ) -> Self {
        let (job_sender, job_receiver) = channel::<ResolveJob>();
        let job_receiver = Arc::new(Mutex::new(job_receiver));
        let max_edge_px = policy.max_edge_px;

        let workers = (0..policy.worker_threads.max(1))
            .map(|index| {
                let catalog = Arc::clone(&catalog);
                let job_receiver = Arc::clone(&job_receiver);
                let mailbox = mailbox.clone();
                thread::Builder::new()
                    .name(format!("artwork-resolver-{index}"))
                    .spawn(move || {
                        worker_loop(catalog, job_receiver, mailbox, max_edge_px);
                    })
                    .unwrap_or_else(|error| {
                        panic!("failed to spawn artwork resolver worker: {error}")
                    })
            })
            .collect();

        Self {
            job_sender: Some(job_sender),
            workers,
        }
    }

    /// Queues one resolution stamped with `generation`. The result arrives
    /// as `ArtworkResolved`; a stamp older than the current generation at
    /// arrival time means the result must be dropped.
    pub fn resolve(&self, source: ArtworkSource, generation: u64) {
        if let Some(sender) = &self.job_sender {
            let _ = sender.send(ResolveJob { source, generation });
        }
    }

    /// Stops accepting jobs and joins the workers. In-flight jobs finish;
    /// their results land in the mailbox and are discarded there if stale.
    pub fn shutdown(&mut self) {
        self.job_sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ArtworkResolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    catalog: Arc<dyn ArtworkCatalog>,
    job_receiver: Arc<Mutex<Receiver<ResolveJob>>>,
    mailbox: UnboundedSender<CoordinatorMessage>,
    max_edge_px: u32,
) {
    loop {
        let job = {
            let receiver = match job_receiver.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            receiver.recv()
        };
        let Ok(job) = job else {
            // All senders dropped; the resolver is shutting down.
            return;
        };

        let result = resolve_one(catalog.as_ref(), &job.source, max_edge_px);
        if let Err(error) = &result {
            debug!(
                "ArtworkResolver: resolution failed for generation {}: {}",
                job.generation, error
            );
        }
        if mailbox
            .send(CoordinatorMessage::ArtworkResolved {
                generation: job.generation,
                result,
            })
            .is_err()
        {
            return;
        }
    }
}

fn resolve_one(
    catalog: &dyn ArtworkCatalog,
    source: &ArtworkSource,
    max_edge_px: u32,
) -> Result<ImageBytes, ResolveError> {
    let encoded = match source {
        ArtworkSource::RemoteUrl(url) => catalog.fetch_remote(url)?,
        ArtworkSource::LocalPath(path) => catalog.read_local(path)?,
        ArtworkSource::BundledName(name) => catalog.bundled(name)?,
    };
    let decoded = decode_with_fallback(&encoded)?;
    Ok(scale_to_max_edge(decoded, max_edge_px))
}

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

fn decode_jpeg_non_strict(bytes: &[u8]) -> Option<DynamicImage> {
    if !looks_like_jpeg(bytes) {
        return None;
    }
    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = image::RgbaImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgba8(image))
}

/// Primary decoder covers PNG/WebP/GIF/BMP/etc; the non-strict JPEG path
/// recovers files with truncated or garbage trailers that strict decoding
/// rejects.
fn decode_with_fallback(bytes: &[u8]) -> Result<DynamicImage, ResolveError> {
    match image::load_from_memory(bytes) {
        Ok(decoded) => Ok(decoded),
        Err(primary_error) => decode_jpeg_non_strict(bytes).ok_or_else(|| {
            warn!("ArtworkResolver: decode failed: {}", primary_error);
            ResolveError::Decode(primary_error.to_string())
        }),
    }
}

fn fit_to_max_edge(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }
    let clamped = max_edge.max(1);
    if width.max(height) <= clamped {
        return (width, height);
    }
    if width >= height {
        let scaled_height =
            ((u64::from(height) * u64::from(clamped)) + (u64::from(width) / 2)) / u64::from(width);
        (clamped, scaled_height.max(1) as u32)
    } else {
        let scaled_width =
            ((u64::from(width) * u64::from(clamped)) + (u64::from(height) / 2)) / u64::from(height);
        (scaled_width.max(1) as u32, clamped)
    }
}

fn scale_to_max_edge(decoded: DynamicImage, max_edge_px: u32) -> ImageBytes {
    let (source_width, source_height) = decoded.dimensions();
    let (target_width, target_height) = fit_to_max_edge(source_width, source_height, max_edge_px);
    let scaled = if target_width == source_width && target_height == source_height {
        decoded
    } else {
        decoded.resize(target_width, target_height, FilterType::Lanczos3)
    };
    let rgba = scaled.to_rgba8();
    ImageBytes {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{codecs::jpeg::JpegEncoder, ImageBuffer, ImageFormat, Rgb, RgbImage, Rgba};
    use std::io::Cursor;
    use tokio::sync::mpsc;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let source = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            width,
            height,
            Rgba([8, 16, 24, 255]),
        ));
        let mut cursor = Cursor::new(Vec::<u8>::new());
        source
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("png encoding should succeed");
        cursor.into_inner()
    }

    struct MapCatalog {
        remote: HashMap<String, Vec<u8>>,
    }

    impl ArtworkCatalog for MapCatalog {
        fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
            self.remote
                .get(url)
                .cloned()
                .ok_or(ResolveError::Http { status: 404 })
        }

        fn read_local(&self, path: &Path) -> Result<Vec<u8>, ResolveError> {
            fs::read(path).map_err(|_| ResolveError::Unreadable(path.display().to_string()))
        }

        fn bundled(&self, name: &str) -> Result<Vec<u8>, ResolveError> {
            Err(ResolveError::MissingResource(name.to_string()))
        }
    }

    fn wait_for_resolved(
        rx: &mut mpsc::UnboundedReceiver<CoordinatorMessage>,
    ) -> (u64, Result<ImageBytes, ResolveError>) {
        for _ in 0..400 {
            if let Ok(message) = rx.try_recv() {
                match message {
                    CoordinatorMessage::ArtworkResolved { generation, result } => {
                        return (generation, result)
                    }
                    other => panic!("unexpected message {:?}", other),
                }
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no resolution arrived");
    }

    #[test]
    fn test_decode_with_fallback_recovers_jpeg_with_trailing_garbage() {
        let rgb = RgbImage::from_pixel(12, 9, Rgb([90, 140, 210]));
        let mut encoded = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut encoded, 85);
            encoder
                .encode_image(&DynamicImage::ImageRgb8(rgb))
                .expect("jpeg encoding should succeed");
        }
        encoded.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let decoded = decode_with_fallback(&encoded).expect("fallback should decode jpeg bytes");
        assert_eq!(decoded.dimensions(), (12, 9));
    }

    #[test]
    fn test_decode_with_fallback_rejects_non_image_bytes() {
        assert!(matches!(
            decode_with_fallback(b"definitely-not-an-image"),
            Err(ResolveError::Decode(_))
        ));
    }

    #[test]
    fn test_fit_to_max_edge_preserves_aspect_ratio() {
        assert_eq!(fit_to_max_edge(2000, 1000, 320), (320, 160));
        assert_eq!(fit_to_max_edge(1000, 2000, 320), (160, 320));
        assert_eq!(fit_to_max_edge(128, 64, 320), (128, 64));
    }

    #[test]
    fn test_oversized_artwork_is_downscaled() {
        let scaled = scale_to_max_edge(
            DynamicImage::ImageRgba8(ImageBuffer::from_pixel(512, 256, Rgba([1, 2, 3, 255]))),
            128,
        );
        assert_eq!((scaled.width, scaled.height), (128, 64));
        assert_eq!(scaled.rgba.len(), 128 * 64 * 4);
    }

    #[test]
    fn test_resolver_posts_result_with_requested_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut remote = HashMap::new();
        remote.insert("https://art.example/cover.png".to_string(), png_bytes(6, 4));
        let resolver = ArtworkResolver::new(
            Arc::new(MapCatalog { remote }),
            &ArtworkPolicy::default(),
            tx,
        );

        resolver.resolve(
            ArtworkSource::RemoteUrl("https://art.example/cover.png".to_string()),
            7,
        );
        let (generation, result) = wait_for_resolved(&mut rx);
        assert_eq!(generation, 7);
        let image = result.expect("resolution should succeed");
        assert_eq!((image.width, image.height), (6, 4));
    }

    #[test]
    fn test_missing_remote_artwork_yields_http_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver = ArtworkResolver::new(
            Arc::new(MapCatalog {
                remote: HashMap::new(),
            }),
            &ArtworkPolicy::default(),
            tx,
        );

        resolver.resolve(ArtworkSource::RemoteUrl("https://art.example/nope".to_string()), 1);
        let (_, result) = wait_for_resolved(&mut rx);
        assert_eq!(result, Err(ResolveError::Http { status: 404 }));
    }

    #[test]
    fn test_local_artwork_resolves_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir should be creatable");
        let path = dir.path().join("cover.png");
        fs::write(&path, png_bytes(5, 5)).expect("artwork file should be writable");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver = ArtworkResolver::new(
            Arc::new(MapCatalog {
                remote: HashMap::new(),
            }),
            &ArtworkPolicy::default(),
            tx,
        );

        resolver.resolve(ArtworkSource::LocalPath(path), 3);
        let (generation, result) = wait_for_resolved(&mut rx);
        assert_eq!(generation, 3);
        assert!(result.is_ok());
    }

    #[test]
    fn test_unknown_bundled_name_yields_missing_resource() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver = ArtworkResolver::new(
            Arc::new(MapCatalog {
                remote: HashMap::new(),
            }),
            &ArtworkPolicy::default(),
            tx,
        );

        resolver.resolve(ArtworkSource::BundledName("ic_missing".to_string()), 2);
        let (_, result) = wait_for_resolved(&mut rx);
        assert_eq!(
            result,
            Err(ResolveError::MissingResource("ic_missing".to_string()))
        );
        drop(resolver);
    }

    #[test]
    fn test_shutdown_joins_workers() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut resolver = ArtworkResolver::new(
            Arc::new(MapCatalog {
                remote: HashMap::new(),
            }),
            &ArtworkPolicy::default(),
            tx,
        );
        resolver.shutdown();
        assert!(resolver.workers.is_empty());
    }
}
