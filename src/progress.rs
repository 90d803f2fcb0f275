use crate::error::Error;

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    DetectingPlayers,
    DetectingBall,
    Projecting,
    Done,
    Failed,
}

impl PipelineState {
    fn to_u8(self) -> u8 {
        match self {
            PipelineState::Idle => 0,
            PipelineState::DetectingPlayers => 1,
            PipelineState::DetectingBall => 2,
            PipelineState::Projecting => 3,
            PipelineState::Done => 4,
            PipelineState::Failed => 5,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => PipelineState::DetectingPlayers,
            2 => PipelineState::DetectingBall,
            3 => PipelineState::Projecting,
            4 => PipelineState::Done,
            5 => PipelineState::Failed,
            _ => PipelineState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub state: PipelineState,
    /// Overall completion in `[0, 1]`, never decreasing within a run.
    pub fraction: f32,
}

#[derive(Debug)]
struct Shared {
    fraction: AtomicU32,
    state: AtomicU8,
}

/// Publishes run progress as events on a channel and as a pollable status.
///
/// Clones share state, so a clone kept by the caller works as a polling
/// handle while the pipeline reports through the original.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: Option<Sender<ProgressEvent>>,
    shared: Arc<Shared>,
}

impl ProgressReporter {
    /// Reporter without a channel, only pollable.
    pub fn silent() -> Self {
        Self {
            sender: None,
            shared: Arc::new(Shared {
                fraction: AtomicU32::new(0f32.to_bits()),
                state: AtomicU8::new(PipelineState::Idle.to_u8()),
            }),
        }
    }

    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = unbounded();
        let mut reporter = Self::silent();
        reporter.sender = Some(tx);

        (reporter, rx)
    }

    #[inline]
    pub fn fraction(&self) -> f32 {
        f32::from_bits(self.shared.fraction.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Starts a new run from zero.
    pub(crate) fn reset(&self) {
        self.shared.fraction.store(0f32.to_bits(), Ordering::SeqCst);
        self.shared
            .state
            .store(PipelineState::Idle.to_u8(), Ordering::SeqCst);
    }

    /// Values below the last reported fraction are raised to it.
    pub(crate) fn report(&self, state: PipelineState, fraction: f32) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        let fraction = fraction.max(self.fraction());

        self.shared
            .fraction
            .store(fraction.to_bits(), Ordering::SeqCst);
        self.shared.state.store(state.to_u8(), Ordering::SeqCst);

        if let Some(tx) = &self.sender {
            // nobody listening is fine
            let _ = tx.send(ProgressEvent { state, fraction });
        }
    }

    /// Moves to `state` keeping the current fraction.
    pub(crate) fn enter(&self, state: PipelineState) {
        self.report(state, self.fraction());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::silent()
    }
}

/// Cooperative cancellation flag shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
