use crate::circular_queue::CircularQueue;
use crate::detection::{ObjectClass, RawDetection};

use nalgebra as na;

/// A persistent identity linking detections of one entity across frames.
#[derive(Debug, Clone)]
pub struct Track {
    id: u32,
    class: ObjectClass,
    external_id: Option<u32>,
    first_seen: f32,
    last_seen: f32,
    hits: u32,
    history: CircularQueue<(f32, RawDetection)>,
}

impl Track {
    pub(crate) fn new(id: u32, ts: f32, det: RawDetection, capacity: usize) -> Self {
        let mut history = CircularQueue::with_capacity(capacity);
        let external_id = det.valid_tracker_id();
        let class = det.class;
        history.push((ts, det));

        Self {
            id,
            class,
            external_id,
            first_seen: ts,
            last_seen: ts,
            hits: 1,
            history,
        }
    }

    /// Callers guarantee `ts` is not older than `last_seen`.
    pub(crate) fn push(&mut self, ts: f32, det: RawDetection) {
        debug_assert!(ts >= self.last_seen);

        if let Some(id) = det.valid_tracker_id() {
            self.external_id = Some(id);
        }

        self.last_seen = ts;
        self.hits += 1;
        self.history.push((ts, det));
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn class(&self) -> ObjectClass {
        self.class
    }

    /// Identifier assigned by an upstream tracker, if any.
    #[inline]
    pub fn external_id(&self) -> Option<u32> {
        self.external_id
    }

    #[inline]
    pub fn first_seen(&self) -> f32 {
        self.first_seen
    }

    #[inline]
    pub fn last_seen(&self) -> f32 {
        self.last_seen
    }

    #[inline]
    pub fn hits(&self) -> u32 {
        self.hits
    }

    #[inline]
    pub fn time_since_update(&self, now: f32) -> f32 {
        (now - self.last_seen).max(0.0)
    }

    pub fn last_detection(&self) -> &RawDetection {
        // a track is never created empty and never drained
        &self
            .history
            .newest()
            .expect("track history is never empty")
            .1
    }

    /// Detection history, oldest first.
    #[inline]
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &(f32, RawDetection)> + ExactSizeIterator {
        self.history.iter()
    }

    /// The most recent `n` detections, oldest first.
    #[inline]
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &(f32, RawDetection)> {
        self.history.recent(n)
    }

    #[inline]
    pub fn position(&self) -> na::Point2<f32> {
        self.last_detection().center()
    }

    /// Mean confidence across the retained history.
    pub fn confidence(&self) -> f32 {
        let n = self.history.len() as f32;
        self.history.iter().map(|(_, d)| d.confidence).sum::<f32>() / n
    }
}
