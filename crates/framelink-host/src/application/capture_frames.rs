//! Frame Capture Adapter: turns render ticks into published frame packets.
//!
//! Each configured camera is a [`CameraCapture`].  On every host tick it
//! decides whether to publish (enabled, every-Nth-tick cadence, minimum
//! interval), pulls the current frame, encodes it, numbers it, and hands it
//! to its publisher endpoint with a non-blocking send.
//!
//! # Never blocking
//!
//! A full send queue (`WouldBlock`) drops the frame and bumps the drop
//! counter; the next tick carries on.  The sequence number of a dropped frame
//! is not reused, so consumers see a gap rather than a repeat:
//!
//! ```text
//! tick:      1    2    3        4    5
//! outcome:   P#0  P#1  D#2      P#3  P#4      (P = published, D = dropped)
//! ```
//!
//! Sequence numbers belong to the publisher, not the camera: cameras sharing
//! one endpoint draw from one counter, so a consumer of that publisher sees
//! a single increasing sequence across every topic.
//!
//! Runtime settings live in a shared [`CaptureControl`] so command handlers
//! can change them between ticks without touching the adapter.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use framelink_core::protocol::{now_ms, Envelope, SequenceCounter};
use framelink_core::{encode_frame, FramePacket};
use framelink_session::session::SessionManager;
use framelink_session::transport::{Endpoint, TransportError};
use tracing::{debug, trace, warn};

use crate::application::stats::SessionStats;
use crate::infrastructure::frame_source::FrameSource;
use crate::infrastructure::image_encoding::{ImageEncoder, OutputFormat};
use crate::infrastructure::storage::config::CameraConfig;

// ── Runtime control ───────────────────────────────────────────────────────────

/// Capture settings that commands may change at runtime.
#[derive(Debug)]
pub struct CaptureControl {
    enabled: AtomicBool,
    every_n_ticks: AtomicU32,
    min_interval_ms: AtomicU64,
    format: AtomicU8,
    width: AtomicU32,
    height: AtomicU32,
}

fn format_to_u8(format: OutputFormat) -> u8 {
    match format {
        OutputFormat::Color => 0,
        OutputFormat::Grayscale => 1,
        OutputFormat::Jpeg => 2,
        OutputFormat::Png => 3,
        OutputFormat::GrayscaleJpeg => 4,
    }
}

fn format_from_u8(value: u8) -> OutputFormat {
    match value {
        1 => OutputFormat::Grayscale,
        2 => OutputFormat::Jpeg,
        3 => OutputFormat::Png,
        4 => OutputFormat::GrayscaleJpeg,
        _ => OutputFormat::Color,
    }
}

impl CaptureControl {
    pub fn from_config(camera: &CameraConfig) -> Self {
        Self {
            enabled: AtomicBool::new(camera.enabled),
            every_n_ticks: AtomicU32::new(camera.every_n_ticks.max(1)),
            min_interval_ms: AtomicU64::new(camera.min_interval_ms),
            format: AtomicU8::new(format_to_u8(camera.format)),
            width: AtomicU32::new(camera.width),
            height: AtomicU32::new(camera.height),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn every_n_ticks(&self) -> u32 {
        self.every_n_ticks.load(Ordering::Relaxed)
    }

    /// Values below 1 are stored as 1.
    pub fn set_every_n_ticks(&self, n: u32) {
        self.every_n_ticks.store(n.max(1), Ordering::Relaxed);
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms.load(Ordering::Relaxed))
    }

    pub fn set_min_interval(&self, interval: Duration) {
        let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.min_interval_ms.store(ms, Ordering::Relaxed);
    }

    pub fn format(&self) -> OutputFormat {
        format_from_u8(self.format.load(Ordering::Relaxed))
    }

    pub fn set_format(&self, format: OutputFormat) {
        self.format.store(format_to_u8(format), Ordering::Relaxed);
    }

    pub fn resolution(&self) -> (u32, u32) {
        (
            self.width.load(Ordering::Relaxed),
            self.height.load(Ordering::Relaxed),
        )
    }

    pub fn set_resolution(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::Relaxed);
        self.height.store(height, Ordering::Relaxed);
    }
}

/// Camera id → control lookup shared with command handlers.
#[derive(Debug, Default)]
pub struct CameraRegistry {
    controls: BTreeMap<String, Arc<CaptureControl>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, control: Arc<CaptureControl>) {
        self.controls.insert(id.into(), control);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<CaptureControl>> {
        self.controls.get(id)
    }

    /// Every camera when `id` is `None` or empty, otherwise the one named.
    /// Returns an empty list for an unknown id.
    pub fn select(&self, id: Option<&str>) -> Vec<(&str, &Arc<CaptureControl>)> {
        match id {
            None | Some("") => self.controls.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            Some(id) => self
                .controls
                .get_key_value(id)
                .map(|(k, v)| (k.as_str(), v))
                .into_iter()
                .collect(),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.controls.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

// ── Per-camera capture ────────────────────────────────────────────────────────

/// What one camera did on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not this camera's turn (cadence or minimum interval).
    Skipped,
    /// Capture is switched off.
    Disabled,
    /// The publisher endpoint is down.
    Offline,
    /// The source had no frame (or failed to produce one).
    NoFrame,
    /// Encoding failed; nothing was numbered or sent.
    EncodeFailed,
    Published { sequence: u64 },
    /// Numbered but not sent.
    Dropped { sequence: u64 },
}

pub struct CameraCapture {
    id: String,
    endpoint_name: String,
    control: Arc<CaptureControl>,
    source: Box<dyn FrameSource>,
    encoder: Arc<dyn ImageEncoder>,
    luma: [f32; 3],
    stats: Arc<SessionStats>,
    sequence: Arc<SequenceCounter>,
    ticks: u64,
    last_published: Option<Instant>,
    applied_resolution: Option<(u32, u32)>,
}

impl CameraCapture {
    pub fn new(
        camera: &CameraConfig,
        source: Box<dyn FrameSource>,
        encoder: Arc<dyn ImageEncoder>,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            id: camera.id.clone(),
            endpoint_name: camera.endpoint.clone(),
            control: Arc::new(CaptureControl::from_config(camera)),
            source,
            encoder,
            luma: camera.grayscale_coefficients,
            stats,
            sequence: Arc::new(SequenceCounter::new()),
            ticks: 0,
            last_published: None,
            applied_resolution: None,
        }
    }

    /// Numbers this camera's frames from `sequence`.  Cameras on one
    /// publisher share a counter so the publisher's sequence never repeats.
    pub fn with_sequence(mut self, sequence: Arc<SequenceCounter>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    pub fn control(&self) -> &Arc<CaptureControl> {
        &self.control
    }

    /// The sequence number the next built frame will get.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.current()
    }

    fn due(&self, now: Instant) -> bool {
        let every = u64::from(self.control.every_n_ticks().max(1));
        if (self.ticks - 1) % every != 0 {
            return false;
        }
        let interval = self.control.min_interval();
        match self.last_published {
            Some(last) if !interval.is_zero() => now.saturating_duration_since(last) >= interval,
            _ => true,
        }
    }

    fn apply_resolution(&mut self) {
        let wanted = self.control.resolution();
        if self.applied_resolution == Some(wanted) {
            return;
        }
        match self.source.resize(wanted.0, wanted.1) {
            Ok(()) => {
                debug!(camera = %self.id, width = wanted.0, height = wanted.1, "capture resolution applied");
                self.applied_resolution = Some(wanted);
            }
            Err(e) => {
                warn!(camera = %self.id, "resize rejected: {e}");
                match self.applied_resolution {
                    Some((w, h)) => self.control.set_resolution(w, h),
                    // Nothing applied yet: keep the source's own size.
                    None => self.applied_resolution = Some(wanted),
                }
            }
        }
    }

    /// Runs one tick against `endpoint` (`None` when it is down).
    pub fn tick(&mut self, now: Instant, endpoint: Option<&dyn Endpoint>) -> TickOutcome {
        self.ticks += 1;

        if !self.control.is_enabled() {
            return TickOutcome::Disabled;
        }
        if !self.due(now) {
            return TickOutcome::Skipped;
        }
        let Some(endpoint) = endpoint else {
            return TickOutcome::Offline;
        };

        self.apply_resolution();

        let frame = match self.source.current_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::NoFrame,
            Err(e) => {
                warn!(camera = %self.id, "frame capture failed: {e}");
                self.stats.record_capture_failure();
                return TickOutcome::NoFrame;
            }
        };

        let image = match self.encoder.encode(&frame, self.control.format(), self.luma) {
            Ok(image) => image,
            Err(e) => {
                warn!(camera = %self.id, "frame encode failed: {e}");
                self.stats.record_encode_failure();
                return TickOutcome::EncodeFailed;
            }
        };

        let packet = FramePacket {
            sequence: self.sequence.next(),
            timestamp_ms: now_ms(),
            width: image.width,
            height: image.height,
            pixel_format: image.format,
            payload: image.data,
        };
        let sequence = packet.sequence;
        let body = match encode_frame(&packet) {
            Ok(body) => body,
            Err(e) => {
                warn!(camera = %self.id, sequence, "frame packet rejected: {e}");
                self.stats.record_encode_failure();
                return TickOutcome::EncodeFailed;
            }
        };

        match endpoint.send(Envelope::new(self.id.as_bytes(), body)) {
            Ok(()) => {
                trace!(camera = %self.id, sequence, "frame published");
                self.stats.record_frame_sent();
                self.last_published = Some(now);
                TickOutcome::Published { sequence }
            }
            Err(TransportError::WouldBlock) => {
                trace!(camera = %self.id, sequence, "send queue full; frame dropped");
                self.stats.record_frame_dropped();
                TickOutcome::Dropped { sequence }
            }
            Err(e) => {
                debug!(camera = %self.id, sequence, "frame dropped: {e}");
                self.stats.record_frame_dropped();
                TickOutcome::Dropped { sequence }
            }
        }
    }
}

// ── Adapter ───────────────────────────────────────────────────────────────────

/// All cameras of one host.
#[derive(Default)]
pub struct FrameCaptureAdapter {
    cameras: Vec<CameraCapture>,
    /// One counter per publisher endpoint.
    sequences: HashMap<String, Arc<SequenceCounter>>,
}

impl FrameCaptureAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `camera`, numbering its frames from the counter of its
    /// publisher endpoint.
    pub fn add_camera(&mut self, camera: CameraCapture) {
        let sequence = self
            .sequences
            .entry(camera.endpoint_name.clone())
            .or_insert_with(|| Arc::new(SequenceCounter::new()));
        let camera = camera.with_sequence(Arc::clone(sequence));
        self.cameras.push(camera);
    }

    pub fn cameras(&self) -> &[CameraCapture] {
        &self.cameras
    }

    /// Controls of every camera, for command handlers.
    pub fn registry(&self) -> CameraRegistry {
        let mut registry = CameraRegistry::new();
        for cam in &self.cameras {
            registry.insert(cam.id.clone(), Arc::clone(&cam.control));
        }
        registry
    }

    /// Ticks every camera against its endpoint in `session`.
    pub fn tick(&mut self, now: Instant, session: &SessionManager) -> Vec<(String, TickOutcome)> {
        self.cameras
            .iter_mut()
            .map(|cam| {
                let endpoint = session.endpoint(&cam.endpoint_name);
                let outcome = cam.tick(now, endpoint.as_deref());
                (cam.id.clone(), outcome)
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::frame_source::mock::MockFrameSource;
    use crate::infrastructure::frame_source::RawFrame;
    use crate::infrastructure::image_encoding::{
        EncodeError, EncodedImage, MockImageEncoder, RawImageEncoder,
    };
    use framelink_session::session::ReconnectPolicy;
    use framelink_session::transport::mock::{MockEndpoint, MockTransport};
    use framelink_session::transport::{EndpointConfig, SocketRole};
    use framelink_core::{decode_frame, PixelFormat};

    fn camera(every: u32) -> CameraConfig {
        CameraConfig {
            width: 4,
            height: 2,
            every_n_ticks: every,
            ..CameraConfig::new("cam0", "frames")
        }
    }

    fn publisher() -> MockEndpoint {
        MockEndpoint::new(&EndpointConfig::new("frames", SocketRole::Publisher, "tcp://*:5555"))
    }

    fn capture(cfg: &CameraConfig, source: MockFrameSource) -> (CameraCapture, Arc<SessionStats>) {
        let stats = Arc::new(SessionStats::new());
        let cam = CameraCapture::new(cfg, Box::new(source), Arc::new(RawImageEncoder), Arc::clone(&stats));
        (cam, stats)
    }

    #[test]
    fn test_publishes_frame_with_camera_topic_and_first_sequence() {
        // Arrange
        let (mut cam, stats) = capture(&camera(1), MockFrameSource::solid(4, 2));
        let ep = publisher();

        // Act
        let outcome = cam.tick(Instant::now(), Some(&ep));

        // Assert
        assert_eq!(outcome, TickOutcome::Published { sequence: 0 });
        let sent = ep.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, b"cam0");
        let packet = decode_frame(&sent[0].body).unwrap();
        assert_eq!(packet.sequence, 0);
        assert_eq!((packet.width, packet.height), (4, 2));
        assert_eq!(packet.pixel_format, PixelFormat::Rgb8);
        assert_eq!(stats.snapshot().frames_sent, 1);
    }

    #[test]
    fn test_cadence_publishes_every_nth_tick() {
        // Arrange
        let (mut cam, _) = capture(&camera(3), MockFrameSource::solid(4, 2));
        let ep = publisher();
        let now = Instant::now();

        // Act
        let outcomes: Vec<_> = (0..7).map(|_| cam.tick(now, Some(&ep))).collect();

        // Assert
        let published: Vec<_> = outcomes
            .iter()
            .filter_map(|o| match o {
                TickOutcome::Published { sequence } => Some(*sequence),
                _ => None,
            })
            .collect();
        assert_eq!(published, vec![0, 1, 2]);
        assert_eq!(outcomes[1], TickOutcome::Skipped);
    }

    #[test]
    fn test_min_interval_limits_publish_rate() {
        // Arrange
        let mut cfg = camera(1);
        cfg.min_interval_ms = 1000;
        let (mut cam, _) = capture(&cfg, MockFrameSource::solid(4, 2));
        let ep = publisher();
        let t0 = Instant::now();

        // Act / Assert
        assert!(matches!(cam.tick(t0, Some(&ep)), TickOutcome::Published { .. }));
        assert_eq!(cam.tick(t0 + Duration::from_millis(400), Some(&ep)), TickOutcome::Skipped);
        assert!(matches!(
            cam.tick(t0 + Duration::from_millis(1000), Some(&ep)),
            TickOutcome::Published { sequence: 1 }
        ));
    }

    #[test]
    fn test_would_block_drops_frame_and_leaves_sequence_gap() {
        // Arrange
        let (mut cam, stats) = capture(&camera(1), MockFrameSource::solid(4, 2));
        let ep = publisher();
        let now = Instant::now();

        // Act
        let first = cam.tick(now, Some(&ep));
        ep.set_would_block(true);
        let second = cam.tick(now, Some(&ep));
        ep.set_would_block(false);
        let third = cam.tick(now, Some(&ep));

        // Assert
        assert_eq!(first, TickOutcome::Published { sequence: 0 });
        assert_eq!(second, TickOutcome::Dropped { sequence: 1 });
        assert_eq!(third, TickOutcome::Published { sequence: 2 });
        let seqs: Vec<u64> = ep
            .sent()
            .iter()
            .map(|e| decode_frame(&e.body).unwrap().sequence)
            .collect();
        assert_eq!(seqs, vec![0, 2]);
        assert_eq!(stats.snapshot().frames_dropped, 1);
    }

    #[test]
    fn test_disabled_camera_pulls_nothing() {
        let source = MockFrameSource::solid(4, 2);
        let (mut cam, _) = capture(&camera(1), source.clone());
        cam.control().set_enabled(false);

        assert_eq!(cam.tick(Instant::now(), Some(&publisher())), TickOutcome::Disabled);
        assert_eq!(source.pulls(), 0);
    }

    #[test]
    fn test_missing_endpoint_is_offline() {
        let (mut cam, _) = capture(&camera(1), MockFrameSource::solid(4, 2));
        assert_eq!(cam.tick(Instant::now(), None), TickOutcome::Offline);
        assert_eq!(cam.next_sequence(), 0);
    }

    #[test]
    fn test_empty_source_is_no_frame() {
        let (mut cam, _) = capture(&camera(1), MockFrameSource::new());
        assert_eq!(cam.tick(Instant::now(), Some(&publisher())), TickOutcome::NoFrame);
    }

    #[test]
    fn test_capture_error_counts_and_skips() {
        let source = MockFrameSource::solid(4, 2);
        source.fail_next("device lost");
        let (mut cam, stats) = capture(&camera(1), source);

        assert_eq!(cam.tick(Instant::now(), Some(&publisher())), TickOutcome::NoFrame);
        assert_eq!(stats.snapshot().capture_failures, 1);
    }

    #[test]
    fn test_encode_failure_skips_tick_without_consuming_sequence() {
        // Arrange
        let mut encoder = MockImageEncoder::new();
        encoder
            .expect_encode()
            .times(1)
            .returning(|_, _, _| Err(EncodeError::Failed("codec crashed".to_string())));
        let stats = Arc::new(SessionStats::new());
        let mut cam = CameraCapture::new(
            &camera(1),
            Box::new(MockFrameSource::solid(4, 2)),
            Arc::new(encoder),
            Arc::clone(&stats),
        );
        let ep = publisher();

        // Act
        let outcome = cam.tick(Instant::now(), Some(&ep));

        // Assert
        assert_eq!(outcome, TickOutcome::EncodeFailed);
        assert!(ep.sent().is_empty());
        assert_eq!(cam.next_sequence(), 0);
        assert_eq!(stats.snapshot().encode_failures, 1);
    }

    #[test]
    fn test_grayscale_switch_changes_payload_format() {
        // Arrange
        let (mut cam, _) = capture(&camera(1), MockFrameSource::solid(4, 2));
        let ep = publisher();
        cam.control().set_format(OutputFormat::Grayscale);

        // Act
        cam.tick(Instant::now(), Some(&ep));

        // Assert
        let packet = decode_frame(&ep.sent()[0].body).unwrap();
        assert_eq!(packet.pixel_format, PixelFormat::Gray8);
        assert_eq!(packet.payload.len(), 4 * 2);
    }

    #[test]
    fn test_camera_luma_weights_reach_the_encoder() {
        // Arrange
        let mut encoder = MockImageEncoder::new();
        encoder
            .expect_encode()
            .withf(|_, output, luma| *output == OutputFormat::GrayscaleJpeg && *luma == [0.0, 1.0, 0.0])
            .times(1)
            .returning(|frame, _, _| {
                Ok(EncodedImage {
                    width: frame.width,
                    height: frame.height,
                    format: PixelFormat::Jpeg,
                    data: vec![0xFF, 0xD8, 0xFF, 0xD9],
                })
            });
        let cfg = CameraConfig {
            format: OutputFormat::GrayscaleJpeg,
            grayscale_coefficients: [0.0, 1.0, 0.0],
            ..camera(1)
        };
        let mut cam = CameraCapture::new(
            &cfg,
            Box::new(MockFrameSource::solid(4, 2)),
            Arc::new(encoder),
            Arc::new(SessionStats::new()),
        );
        let ep = publisher();

        // Act
        let outcome = cam.tick(Instant::now(), Some(&ep));

        // Assert
        assert_eq!(outcome, TickOutcome::Published { sequence: 0 });
        let packet = decode_frame(&ep.sent()[0].body).unwrap();
        assert_eq!(packet.pixel_format, PixelFormat::Jpeg);
        assert_eq!(packet.payload, vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }

    #[test]
    fn test_resolution_change_resizes_source_once() {
        // Arrange
        let source = MockFrameSource::new();
        source.repeat_last(true);
        source.inject_frame(RawFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Gray8,
            data: vec![0; 4],
        });
        let (mut cam, _) = capture(&camera(1), source.clone());
        let ep = publisher();
        let now = Instant::now();

        // Act
        cam.tick(now, Some(&ep));
        cam.control().set_resolution(640, 480);
        cam.tick(now, Some(&ep));
        cam.tick(now, Some(&ep));

        // Assert
        assert_eq!(source.resizes(), vec![(4, 2), (640, 480)]);
    }

    #[test]
    fn test_cameras_on_one_publisher_share_its_sequence() {
        // Arrange
        let transport = Arc::new(MockTransport::new());
        let session = SessionManager::start(
            vec![
                EndpointConfig::new("frames", SocketRole::Publisher, "tcp://*:5555"),
                EndpointConfig::new("aux", SocketRole::Publisher, "tcp://*:5560"),
            ],
            ReconnectPolicy::default(),
            transport.clone(),
        )
        .unwrap();
        let stats = Arc::new(SessionStats::new());
        let mut adapter = FrameCaptureAdapter::new();
        for (id, endpoint) in [("front", "frames"), ("rear", "frames"), ("side", "aux")] {
            let cfg = CameraConfig {
                width: 4,
                height: 2,
                ..CameraConfig::new(id, endpoint)
            };
            adapter.add_camera(CameraCapture::new(
                &cfg,
                Box::new(MockFrameSource::solid(4, 2)),
                Arc::new(RawImageEncoder),
                Arc::clone(&stats),
            ));
        }
        let now = Instant::now();

        // Act
        adapter.tick(now, &session);
        adapter.tick(now, &session);

        // Assert
        let numbered = |name: &str| -> Vec<(Vec<u8>, u64)> {
            transport
                .endpoint(name)
                .unwrap()
                .sent()
                .iter()
                .map(|e| (e.topic.clone(), decode_frame(&e.body).unwrap().sequence))
                .collect()
        };
        assert_eq!(
            numbered("frames"),
            vec![
                (b"front".to_vec(), 0),
                (b"rear".to_vec(), 1),
                (b"front".to_vec(), 2),
                (b"rear".to_vec(), 3),
            ]
        );
        assert_eq!(numbered("aux"), vec![(b"side".to_vec(), 0), (b"side".to_vec(), 1)]);
    }

    #[test]
    fn test_registry_selects_one_or_all() {
        let mut registry = CameraRegistry::new();
        let control = Arc::new(CaptureControl::from_config(&camera(1)));
        registry.insert("a", Arc::clone(&control));
        registry.insert("b", control);

        assert_eq!(registry.select(None).len(), 2);
        assert_eq!(registry.select(Some("")).len(), 2);
        assert_eq!(registry.select(Some("b")).len(), 1);
        assert!(registry.select(Some("zzz")).is_empty());
    }
}
