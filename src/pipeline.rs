use crate::config::PipelineConfig;
use crate::detection::{ObjectClass, RawDetection};
use crate::detector::{Detector, Thresholds};
use crate::error::Error;
use crate::frame::Frame;
use crate::progress::{CancellationToken, ProgressReporter};
use crate::projector::{CalibrationTransform, CoordinateProjector, CourtDimensions, CourtPosition};
use crate::smoothing::MedianFilter;
use crate::source::{VideoRef, VideoSource};
use crate::tracker::{IdSequence, TrackManager};
use crate::tracking_data::TrackingData;

pub use crate::progress::PipelineState;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Share of overall progress taken by the player pass.
const PLAYER_SHARE: f32 = 0.5;

/// Progress at the end of the ball pass. The rest is reported once the
/// final positions are projected.
const BALL_END: f32 = 0.98;

/// Frames after which progress of a stream of unknown length is half way.
const UNKNOWN_LENGTH_PACE: f32 = 30.0;

pub type RendererError = Box<dyn std::error::Error + Send + Sync>;

/// Downstream consumer of court positions, typically a 3D scene.
///
/// Both updates replace whatever the renderer showed before, so repeating
/// one is harmless. Failures are logged and never fail a run.
pub trait CourtRenderer: Send + Sync {
    fn update_player_positions(&self, positions: &[CourtPosition]) -> Result<(), RendererError>;

    fn update_ball_position(&self, position: &CourtPosition) -> Result<(), RendererError>;
}

/// Court positions sourced from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionBatch {
    pub frame_index: u64,
    pub timestamp: f32,
    pub players: Vec<CourtPosition>,
    pub ball: Option<CourtPosition>,
}

impl PositionBatch {
    fn empty(frame: &Frame) -> Self {
        Self {
            frame_index: frame.index,
            timestamp: frame.timestamp,
            players: Vec::new(),
            ball: None,
        }
    }
}

/// Result of a whole-video run.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTracking {
    /// One position per player track open at the end of the video.
    pub players: Vec<CourtPosition>,
    /// Median-smoothed ball, `None` when the ball was never (or no longer) tracked.
    pub ball: Option<CourtPosition>,
    /// Per-frame positions in frame order.
    pub timeline: Vec<PositionBatch>,
}

impl VideoTracking {
    pub fn tracking_data(&self, court: CourtDimensions) -> TrackingData {
        TrackingData::from_batches(&self.timeline, Some(court.length))
    }
}

/// Runs detection, tracking, smoothing and projection over a video.
///
/// Collaborators are passed in explicitly, so any number of independent
/// pipelines can coexist. One pipeline processes one video at a time;
/// concurrent `process_video` calls are serialized.
pub struct TrackingPipeline {
    config: PipelineConfig,
    players: Arc<dyn Detector>,
    ball: Arc<dyn Detector>,
    source: Arc<dyn VideoSource>,
    renderer: Option<Arc<dyn CourtRenderer>>,
    state: Mutex<PipelineState>,
    run_lock: Mutex<()>,
}

/// Tracking state owned by exactly one run.
struct Run {
    players: TrackManager,
    ball: TrackManager,
    projector: Option<CoordinateProjector>,
    timeline: BTreeMap<u64, PositionBatch>,
}

impl Run {
    fn batch(&mut self, frame: &Frame) -> &mut PositionBatch {
        self.timeline
            .entry(frame.index)
            .or_insert_with(|| PositionBatch::empty(frame))
    }
}

impl TrackingPipeline {
    pub fn new(
        config: PipelineConfig,
        players: Arc<dyn Detector>,
        ball: Arc<dyn Detector>,
        source: Arc<dyn VideoSource>,
    ) -> Result<Self, Error> {
        config.validate()?;

        if players.class() != ObjectClass::Person || ball.class() != ObjectClass::Ball {
            return Err(Error::InvalidInput(format!(
                "detectors are {:?} and {:?}, expected person and ball",
                players.class(),
                ball.class()
            )));
        }

        Ok(Self {
            config,
            players,
            ball,
            source,
            renderer: None,
            state: Mutex::new(PipelineState::Idle),
            run_lock: Mutex::new(()),
        })
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn CourtRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// State of the current or most recent run.
    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, progress: &ProgressReporter, state: PipelineState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        progress.enter(state);
    }

    /// A streaming session with its own track state.
    pub fn session(&self) -> FrameSession<'_> {
        let ids = IdSequence::new();

        FrameSession {
            pipeline: self,
            players: TrackManager::with_ids(ObjectClass::Person, self.config.tracker, ids.clone()),
            ball: TrackManager::with_ids(ObjectClass::Ball, self.config.tracker, ids),
            filter: MedianFilter::new(self.config.smoothing_window),
            projector: None,
            ball_warned: false,
        }
    }

    /// Processes a whole video: the player pass, then the ball pass, then
    /// projection of the final positions. Progress runs from 0 to 1 and
    /// reaches 1 only on success.
    pub fn process_video(
        &self,
        video: &str,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<VideoTracking, Error> {
        let _guard = self.run_lock.lock().unwrap_or_else(PoisonError::into_inner);

        progress.reset();
        self.transition(progress, PipelineState::Idle);

        let result = self.run(video, progress, cancel);

        match &result {
            Ok(tracking) => {
                *self.state.lock().unwrap_or_else(PoisonError::into_inner) = PipelineState::Done;
                progress.report(PipelineState::Done, 1.0);
                log::info!(
                    "{}: {} players, ball {}",
                    video,
                    tracking.players.len(),
                    if tracking.ball.is_some() { "tracked" } else { "not found" }
                );
            }
            Err(err) => {
                self.transition(progress, PipelineState::Failed);
                if err.is_cancelled() {
                    log::info!("{}: cancelled", video);
                } else {
                    log::error!("{}: {}", video, err);
                }
            }
        }

        result
    }

    fn run(
        &self,
        video: &str,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<VideoTracking, Error> {
        let video = VideoRef::parse(video)?;
        log::info!("processing {}", video);

        let ids = IdSequence::new();
        let mut run = Run {
            players: TrackManager::with_ids(ObjectClass::Person, self.config.tracker, ids.clone()),
            ball: TrackManager::with_ids(ObjectClass::Ball, self.config.tracker, ids),
            projector: None,
            timeline: BTreeMap::new(),
        };

        self.transition(progress, PipelineState::DetectingPlayers);
        self.detect_players(&video, &mut run, progress, cancel)?;
        cancel.check()?;

        self.transition(progress, PipelineState::DetectingBall);
        self.detect_ball(&video, &mut run, progress, cancel)?;
        cancel.check()?;

        self.transition(progress, PipelineState::Projecting);
        let filter = MedianFilter::new(self.config.smoothing_window);

        let (players, ball) = match run.projector {
            Some(projector) => {
                let players = project_tracks(&projector, &run.players)?;
                let ball = project_ball(&projector, &filter, &run.ball)?;
                (players, ball)
            }
            None => (Vec::new(), None),
        };

        self.push_to_renderer(&players, ball.as_ref());

        Ok(VideoTracking {
            players,
            ball,
            timeline: run.timeline.into_values().collect(),
        })
    }

    fn projector(&self, run: &mut Run, frame: &Frame) -> Result<CoordinateProjector, Error> {
        if let Some(projector) = run.projector {
            return Ok(projector);
        }

        let projector = make_projector(&self.config, frame)?;
        run.projector = Some(projector);

        Ok(projector)
    }

    fn detect_players(
        &self,
        video: &VideoRef,
        run: &mut Run,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let mut frames = self.source.open(video)?;
        let total = frames.frame_count();
        let mut done = 0;

        loop {
            cancel.check()?;

            let frame = match frames.next_frame()? {
                Some(frame) => frame,
                None => break,
            };

            let projector = self.projector(run, &frame)?;
            let dets = accepted(self.players.detect(&frame, &self.config.player)?, &self.config.player);
            let update = run.players.update(frame.timestamp, dets)?;

            let mut positions = Vec::with_capacity(update.updated.len());
            for id in &update.updated {
                if let Some(track) = run.players.get(*id) {
                    positions.push(projector.project(
                        track.id(),
                        track.class(),
                        track.position(),
                        track.last_detection().confidence,
                    )?);
                }
            }

            log::debug!(
                "frame {} ({:.3}s): {} players, {} new, {} retired",
                frame.index,
                frame.timestamp,
                positions.len(),
                update.created.len(),
                update.retired.len()
            );

            run.batch(&frame).players = positions;

            done += 1;
            progress.report(
                PipelineState::DetectingPlayers,
                PLAYER_SHARE * pass_fraction(done, total),
            );
        }

        progress.report(PipelineState::DetectingPlayers, PLAYER_SHARE);

        Ok(())
    }

    fn detect_ball(
        &self,
        video: &VideoRef,
        run: &mut Run,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let mut frames = self.source.open(video)?;
        let total = frames.frame_count();
        let filter = MedianFilter::new(self.config.smoothing_window);
        let mut warned = false;
        let mut done = 0;

        loop {
            cancel.check()?;

            let frame = match frames.next_frame()? {
                Some(frame) => frame,
                None => break,
            };

            let dets = match self.ball.detect(&frame, &self.config.ball) {
                Ok(dets) => accepted(dets, &self.config.ball),
                Err(err) => {
                    if !warned {
                        log::warn!("ball detection unavailable, continuing without it: {}", err);
                        warned = true;
                    }

                    Vec::new()
                }
            };

            let update = run.ball.update(frame.timestamp, dets)?;

            if !update.updated.is_empty() {
                let projector = self.projector(run, &frame)?;
                let ball = project_ball(&projector, &filter, &run.ball)?;
                run.batch(&frame).ball = ball;
            }

            done += 1;
            progress.report(
                PipelineState::DetectingBall,
                PLAYER_SHARE + (BALL_END - PLAYER_SHARE) * pass_fraction(done, total),
            );
        }

        Ok(())
    }

    fn push_to_renderer(&self, players: &[CourtPosition], ball: Option<&CourtPosition>) {
        let renderer = match &self.renderer {
            Some(renderer) => renderer,
            None => return,
        };

        if let Err(err) = renderer.update_player_positions(players) {
            log::warn!("renderer rejected player positions: {}", err);
        }

        if let Some(ball) = ball {
            if let Err(err) = renderer.update_ball_position(ball) {
                log::warn!("renderer rejected ball position: {}", err);
            }
        }
    }
}

/// Streaming counterpart of `TrackingPipeline::process_video`, fed one
/// frame at a time in timestamp order.
pub struct FrameSession<'a> {
    pipeline: &'a TrackingPipeline,
    players: TrackManager,
    ball: TrackManager,
    filter: MedianFilter,
    projector: Option<CoordinateProjector>,
    ball_warned: bool,
}

impl<'a> FrameSession<'a> {
    /// Runs both detectors on `frame` concurrently, updates the tracks and
    /// returns every open player track plus the smoothed ball. The result
    /// is also pushed to the pipeline's renderer.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<PositionBatch, Error> {
        let pipeline = self.pipeline;
        let config = &pipeline.config;
        let player_detector = &*pipeline.players;
        let ball_detector = &*pipeline.ball;

        let (players, ball) = thread::scope(|s| {
            let ball = s.spawn(|| ball_detector.detect(frame, &config.ball));
            let players = player_detector.detect(frame, &config.player);
            let ball = ball
                .join()
                .unwrap_or_else(|_| Err(Error::DetectionFailed("ball detector panicked".into())));

            (players, ball)
        });

        let players = accepted(players?, &config.player);
        let ball = match ball {
            Ok(dets) => accepted(dets, &config.ball),
            Err(err) => {
                if !self.ball_warned {
                    log::warn!("ball detection unavailable, continuing without it: {}", err);
                    self.ball_warned = true;
                }

                Vec::new()
            }
        };

        self.players.update(frame.timestamp, players)?;
        self.ball.update(frame.timestamp, ball)?;

        let projector = match self.projector {
            Some(projector) => projector,
            None => {
                let projector = make_projector(config, frame)?;
                self.projector = Some(projector);
                projector
            }
        };

        let batch = PositionBatch {
            frame_index: frame.index,
            timestamp: frame.timestamp,
            players: project_tracks(&projector, &self.players)?,
            ball: project_ball(&projector, &self.filter, &self.ball)?,
        };

        pipeline.push_to_renderer(&batch.players, batch.ball.as_ref());

        Ok(batch)
    }

    /// Open player tracks.
    #[inline]
    pub fn players(&self) -> &TrackManager {
        &self.players
    }

    #[inline]
    pub fn ball(&self) -> &TrackManager {
        &self.ball
    }
}

fn make_projector(config: &PipelineConfig, frame: &Frame) -> Result<CoordinateProjector, Error> {
    let transform = match config.calibration {
        Some(transform) => transform,
        None => CalibrationTransform::from_frame_dims(frame.dims, config.court)?,
    };

    Ok(CoordinateProjector::new(transform, config.ball_height).with_frame_width(frame.width()))
}

/// Drops detections below the pass's confidence floor, whatever the
/// detector already filtered.
fn accepted(dets: Vec<RawDetection>, thresholds: &Thresholds) -> Vec<RawDetection> {
    dets.into_iter().filter(|d| thresholds.accepts(d)).collect()
}

fn project_tracks(
    projector: &CoordinateProjector,
    manager: &TrackManager,
) -> Result<Vec<CourtPosition>, Error> {
    manager
        .tracks()
        .iter()
        .map(|t| {
            projector.project(
                t.id(),
                t.class(),
                t.position(),
                t.last_detection().confidence,
            )
        })
        .collect()
}

fn project_ball(
    projector: &CoordinateProjector,
    filter: &MedianFilter,
    manager: &TrackManager,
) -> Result<Option<CourtPosition>, Error> {
    manager
        .tracks()
        .first()
        .and_then(|track| filter.smooth(track))
        .map(|s| projector.project(s.track_id, ObjectClass::Ball, s.position, s.confidence))
        .transpose()
}

fn pass_fraction(done: usize, total: Option<usize>) -> f32 {
    match total {
        Some(0) => 1.0,
        Some(total) => (done as f32 / total as f32).min(1.0),
        // approaches 1 without reaching it
        None => done as f32 / (done as f32 + UNKNOWN_LENGTH_PACE),
    }
}
