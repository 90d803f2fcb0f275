use approx::assert_relative_eq;
use courttrack::bbox::BBox;
use courttrack::detector::{BallDetector, LazyModel, PersonPoseDetector};
use courttrack::pipeline::RendererError;
use courttrack::source::{FrameSource, MemoryVideo, VideoRef, VideoSource};
use courttrack::*;
use ndarray::Array3;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Scripted {
    class: ObjectClass,
    frames: Vec<Vec<RawDetection>>,
}

impl Detector for Scripted {
    fn class(&self) -> ObjectClass {
        self.class
    }

    fn detect(&self, frame: &Frame, _: &Thresholds) -> Result<Vec<RawDetection>, Error> {
        Ok(self.frames.get(frame.index as usize).cloned().unwrap_or_default())
    }
}

struct Failing(ObjectClass);

impl Detector for Failing {
    fn class(&self) -> ObjectClass {
        self.0
    }

    fn detect(&self, _: &Frame, _: &Thresholds) -> Result<Vec<RawDetection>, Error> {
        Err(Error::DetectionFailed("model crashed".into()))
    }
}

/// Cancels the token once the first stream it opened runs out of frames.
struct CancelAfterFirstPass {
    inner: MemoryVideo,
    token: CancellationToken,
    opened: AtomicUsize,
}

struct CancellingFrames {
    inner: Box<dyn FrameSource>,
    token: Option<CancellationToken>,
}

impl FrameSource for CancellingFrames {
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        let frame = self.inner.next_frame()?;
        if frame.is_none() {
            if let Some(token) = &self.token {
                token.cancel();
            }
        }

        Ok(frame)
    }

    fn frame_count(&self) -> Option<usize> {
        self.inner.frame_count()
    }
}

impl VideoSource for CancelAfterFirstPass {
    fn open(&self, video: &VideoRef) -> Result<Box<dyn FrameSource>, Error> {
        let first = self.opened.fetch_add(1, Ordering::SeqCst) == 0;

        Ok(Box::new(CancellingFrames {
            inner: self.inner.open(video)?,
            token: if first { Some(self.token.clone()) } else { None },
        }))
    }
}

struct Offline;

impl VideoSource for Offline {
    fn open(&self, video: &VideoRef) -> Result<Box<dyn FrameSource>, Error> {
        Err(Error::SourceUnavailable(format!("cannot reach {}", video)))
    }
}

#[derive(Default)]
struct Recorder {
    players: Mutex<Vec<Vec<CourtPosition>>>,
    balls: Mutex<Vec<CourtPosition>>,
    fail: bool,
}

impl CourtRenderer for Recorder {
    fn update_player_positions(&self, positions: &[CourtPosition]) -> Result<(), RendererError> {
        self.players.lock().unwrap().push(positions.to_vec());
        if self.fail {
            return Err("scene not ready".into());
        }

        Ok(())
    }

    fn update_ball_position(&self, position: &CourtPosition) -> Result<(), RendererError> {
        self.balls.lock().unwrap().push(*position);
        if self.fail {
            return Err("scene not ready".into());
        }

        Ok(())
    }
}

fn person(x: f32, y: f32, confidence: f32) -> RawDetection {
    RawDetection::new(
        ObjectClass::Person,
        BBox::ltrb(x - 20.0, y - 50.0, x + 20.0, y + 50.0),
        confidence,
    )
}

fn ball(x: f32, y: f32, confidence: f32) -> RawDetection {
    RawDetection::new(
        ObjectClass::Ball,
        BBox::ltrb(x - 2.0, y - 2.0, x + 2.0, y + 2.0),
        confidence,
    )
}

fn video(n: usize) -> MemoryVideo {
    MemoryVideo::new(
        (0..n)
            .map(|i| Frame::new(i as u64, i as f32 / 25.0, Array3::zeros((108, 192, 3))))
            .collect(),
    )
}

fn identity_config() -> PipelineConfig {
    PipelineConfig {
        calibration: Some(CalibrationTransform::identity()),
        ..Default::default()
    }
}

fn scripted(class: ObjectClass, frames: Vec<Vec<RawDetection>>) -> Arc<dyn Detector> {
    Arc::new(Scripted { class, frames })
}

fn walking_players(n: usize) -> Vec<Vec<RawDetection>> {
    (0..n)
        .map(|i| {
            let dx = i as f32 * 2.0;
            vec![person(40.0 + dx, 60.0, 0.9), person(150.0 - dx, 60.0, 0.8)]
        })
        .collect()
}

#[test]
fn progress_is_monotonic_and_completes() {
    let pipeline = TrackingPipeline::new(
        identity_config(),
        scripted(ObjectClass::Person, walking_players(10)),
        scripted(ObjectClass::Ball, vec![vec![ball(90.0, 40.0, 0.8)]; 10]),
        Arc::new(video(10)),
    )
    .unwrap();

    let (progress, events) = ProgressReporter::channel();
    pipeline
        .process_video("match.mp4", &progress, &CancellationToken::new())
        .unwrap();

    let events: Vec<ProgressEvent> = events.try_iter().collect();
    assert!(events.windows(2).all(|w| w[0].fraction <= w[1].fraction));
    assert!(events.iter().all(|e| (0.0..=1.0).contains(&e.fraction)));

    let last = events.last().unwrap();
    assert_eq!(last.fraction, 1.0);
    assert_eq!(last.state, PipelineState::Done);
    assert_eq!(events.iter().filter(|e| e.fraction == 1.0).count(), 1);

    // the player pass ends at the half way mark
    let ball_start = events
        .iter()
        .position(|e| e.state == PipelineState::DetectingBall)
        .unwrap();
    assert_eq!(events[ball_start].fraction, 0.5);
    assert_eq!(pipeline.state(), PipelineState::Done);
}

#[test]
fn median_ball_ignores_outlier() {
    let pipeline = TrackingPipeline::new(
        identity_config(),
        scripted(ObjectClass::Person, vec![]),
        scripted(
            ObjectClass::Ball,
            vec![
                vec![ball(10.0, 10.0, 0.6)],
                vec![ball(50.0, 50.0, 0.9)],
                vec![ball(12.0, 12.0, 0.7)],
            ],
        ),
        Arc::new(video(3)),
    )
    .unwrap();

    let result = pipeline
        .process_video("clip.mp4", &ProgressReporter::silent(), &CancellationToken::new())
        .unwrap();

    let ball = result.ball.unwrap();
    assert_relative_eq!(ball.x, 12.0);
    assert_relative_eq!(ball.z, 12.0);
    assert_relative_eq!(ball.height, 0.1);
    assert_eq!(ball.confidence, 0.7);
    assert!(result.players.is_empty());
}

#[test]
fn low_confidence_player_makes_no_track() {
    let pipeline = TrackingPipeline::new(
        identity_config(),
        scripted(ObjectClass::Person, vec![vec![person(60.0, 60.0, 0.3)]; 4]),
        scripted(ObjectClass::Ball, vec![]),
        Arc::new(video(4)),
    )
    .unwrap();

    let result = pipeline
        .process_video("clip.mp4", &ProgressReporter::silent(), &CancellationToken::new())
        .unwrap();

    assert!(result.players.is_empty());
    assert!(result.timeline.iter().all(|b| b.players.is_empty()));
}

#[test]
fn no_ball_still_succeeds() {
    let renderer = Arc::new(Recorder::default());
    let pipeline = TrackingPipeline::new(
        identity_config(),
        scripted(ObjectClass::Person, walking_players(5)),
        scripted(ObjectClass::Ball, vec![]),
        Arc::new(video(5)),
    )
    .unwrap()
    .with_renderer(renderer.clone());

    let result = pipeline
        .process_video("clip.mp4", &ProgressReporter::silent(), &CancellationToken::new())
        .unwrap();

    assert!(result.ball.is_none());
    assert_eq!(result.players.len(), 2);
    assert_eq!(renderer.players.lock().unwrap().len(), 1);
    assert!(renderer.balls.lock().unwrap().is_empty());
}

#[test]
fn failing_ball_detector_is_absorbed() {
    let pipeline = TrackingPipeline::new(
        identity_config(),
        scripted(ObjectClass::Person, walking_players(3)),
        Arc::new(Failing(ObjectClass::Ball)),
        Arc::new(video(3)),
    )
    .unwrap();

    let result = pipeline
        .process_video("clip.mp4", &ProgressReporter::silent(), &CancellationToken::new())
        .unwrap();

    assert!(result.ball.is_none());
    assert_eq!(result.players.len(), 2);
}

#[test]
fn missing_player_model_fails_the_run() {
    let players = PersonPoseDetector::new(LazyModel::new("yolov8n-pose.onnx", || {
        Err(Error::SourceUnavailable("model file not found".into()))
    }));
    let balls = BallDetector::new(LazyModel::new("yolov8n.onnx", || {
        Err(Error::SourceUnavailable("model file not found".into()))
    }));

    let pipeline = TrackingPipeline::new(
        identity_config(),
        Arc::new(players),
        Arc::new(balls),
        Arc::new(video(2)),
    )
    .unwrap();

    let progress = ProgressReporter::silent();
    let err = pipeline
        .process_video("clip.mp4", &progress, &CancellationToken::new())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DetectionFailed);
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(progress.fraction() < 1.0);
}

#[test]
fn cancel_between_passes_is_not_partial_success() {
    let token = CancellationToken::new();
    let source = CancelAfterFirstPass {
        inner: video(6),
        token: token.clone(),
        opened: AtomicUsize::new(0),
    };

    let renderer = Arc::new(Recorder::default());
    let pipeline = TrackingPipeline::new(
        identity_config(),
        scripted(ObjectClass::Person, walking_players(6)),
        scripted(ObjectClass::Ball, vec![vec![ball(90.0, 40.0, 0.8)]; 6]),
        Arc::new(source),
    )
    .unwrap()
    .with_renderer(renderer.clone());

    let (progress, events) = ProgressReporter::channel();
    let err = pipeline.process_video("clip.mp4", &progress, &token).unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(renderer.players.lock().unwrap().is_empty());
    assert!(events
        .try_iter()
        .all(|e| e.state != PipelineState::DetectingBall && e.fraction <= 0.5));
}

#[test]
fn cancelled_before_start() {
    let pipeline = TrackingPipeline::new(
        identity_config(),
        scripted(ObjectClass::Person, walking_players(3)),
        scripted(ObjectClass::Ball, vec![]),
        Arc::new(video(3)),
    )
    .unwrap();

    let token = CancellationToken::new();
    token.cancel();

    let err = pipeline
        .process_video("clip.mp4", &ProgressReporter::silent(), &token)
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn bad_reference_and_unreachable_source() {
    let pipeline = TrackingPipeline::new(
        identity_config(),
        scripted(ObjectClass::Person, vec![]),
        scripted(ObjectClass::Ball, vec![]),
        Arc::new(Offline),
    )
    .unwrap();

    let silent = ProgressReporter::silent();
    let token = CancellationToken::new();

    let err = pipeline.process_video("   ", &silent, &token).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = pipeline
        .process_video("https://www.youtube.com/watch?v=", &silent, &token)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = pipeline
        .process_video("rtsp://camera.local/court", &silent, &token)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
}

#[test]
fn renderer_failure_does_not_fail_the_run() {
    let renderer = Arc::new(Recorder {
        fail: true,
        ..Default::default()
    });

    let pipeline = TrackingPipeline::new(
        identity_config(),
        scripted(ObjectClass::Person, walking_players(3)),
        scripted(ObjectClass::Ball, vec![vec![ball(90.0, 40.0, 0.8)]; 3]),
        Arc::new(video(3)),
    )
    .unwrap()
    .with_renderer(renderer.clone());

    let result = pipeline
        .process_video("clip.mp4", &ProgressReporter::silent(), &CancellationToken::new())
        .unwrap();

    assert_eq!(renderer.players.lock().unwrap()[0], result.players);
    assert_eq!(renderer.balls.lock().unwrap()[0], result.ball.unwrap());
}

#[test]
fn player_identities_are_stable_and_teamed() {
    let pipeline = TrackingPipeline::new(
        identity_config(),
        scripted(ObjectClass::Person, walking_players(8)),
        scripted(ObjectClass::Ball, vec![]),
        Arc::new(video(8)),
    )
    .unwrap();

    let result = pipeline
        .process_video("clip.mp4", &ProgressReporter::silent(), &CancellationToken::new())
        .unwrap();

    let first: Vec<u32> = result.timeline[0].players.iter().map(|p| p.track_id).collect();
    for batch in &result.timeline {
        let ids: Vec<u32> = batch.players.iter().map(|p| p.track_id).collect();
        assert_eq!(ids, first);
    }

    let left = result.players.iter().find(|p| p.x < 96.0).unwrap();
    let right = result.players.iter().find(|p| p.x >= 96.0).unwrap();
    assert_eq!(left.team, Some(Team::Home));
    assert_eq!(right.team, Some(Team::Away));
    assert_eq!(left.confidence, 0.9);
}

#[test]
fn timeline_round_trips_through_tracking_data() {
    let pipeline = TrackingPipeline::new(
        PipelineConfig::default(),
        scripted(ObjectClass::Person, walking_players(4)),
        scripted(
            ObjectClass::Ball,
            vec![vec![], vec![ball(90.0, 40.0, 0.8)], vec![ball(95.0, 42.0, 0.7)], vec![]],
        ),
        Arc::new(video(4)),
    )
    .unwrap();

    let result = pipeline
        .process_video("clip.mp4", &ProgressReporter::silent(), &CancellationToken::new())
        .unwrap();

    let data = result.tracking_data(pipeline.config().court);
    assert_eq!(data.version, "1.0");
    assert_eq!(data.frames.len(), 4);

    let json = serde_json::to_string(&data).unwrap();
    let parsed = TrackingData::from_reader(json.as_bytes()).unwrap();
    let batches = parsed.to_batches(pipeline.config().ball_height).unwrap();

    for (a, b) in batches.iter().zip(result.timeline.iter()) {
        assert_relative_eq!(a.timestamp, b.timestamp, epsilon = 1e-6);
        assert_eq!(a.players.len(), b.players.len());

        for (p, q) in a.players.iter().zip(b.players.iter()) {
            assert_eq!(p.track_id, q.track_id);
            assert_eq!(p.team, q.team);
            assert_relative_eq!(p.x, q.x, epsilon = 1e-4);
            assert_relative_eq!(p.z, q.z, epsilon = 1e-4);
        }

        assert_eq!(a.ball.is_some(), b.ball.is_some());
        if let (Some(p), Some(q)) = (a.ball, b.ball) {
            assert_relative_eq!(p.x, q.x, epsilon = 1e-4);
            assert_relative_eq!(p.z, q.z, epsilon = 1e-4);
            assert_relative_eq!(p.height, q.height);
        }
    }

    let latest = parsed.latest_players().unwrap();
    assert_eq!(latest.len(), 2);
    assert!(parsed.latest_ball(0.1).is_none());
}

#[test]
fn streaming_session_pushes_each_frame() {
    let renderer = Arc::new(Recorder::default());
    let pipeline = TrackingPipeline::new(
        identity_config(),
        scripted(ObjectClass::Person, walking_players(3)),
        scripted(ObjectClass::Ball, vec![vec![ball(90.0, 40.0, 0.8)]; 3]),
        Arc::new(video(0)),
    )
    .unwrap()
    .with_renderer(renderer.clone());

    let mut session = pipeline.session();
    let frames: Vec<Frame> = (0..3)
        .map(|i| Frame::new(i, i as f32 / 25.0, Array3::zeros((108, 192, 3))))
        .collect();

    for frame in &frames {
        let batch = session.process_frame(frame).unwrap();
        assert_eq!(batch.players.len(), 2);
        assert!(batch.ball.is_some());
    }

    assert_eq!(renderer.players.lock().unwrap().len(), 3);
    assert_eq!(renderer.balls.lock().unwrap().len(), 3);
    assert_eq!(session.ball().tracks().len(), 1);
}
