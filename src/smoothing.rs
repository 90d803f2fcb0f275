use crate::detection::RawDetection;
use crate::track::Track;

use nalgebra as na;
use num_traits::Float;
use std::cmp::Ordering;

/// Upper median: `sorted[len / 2]`. Returns `None` for an empty input or
/// when a value is NaN.
pub fn median<F: Float>(values: &mut [F]) -> Option<F> {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return None;
    }

    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Some(values[values.len() / 2])
}

/// Componentwise median of a set of points.
pub fn median_position<I>(points: I) -> Option<na::Point2<f32>>
where
    I: IntoIterator<Item = na::Point2<f32>>,
{
    let (mut xs, mut ys): (Vec<f32>, Vec<f32>) = points.into_iter().map(|p| (p.x, p.y)).unzip();

    Some(na::Point2::new(median(&mut xs)?, median(&mut ys)?))
}

/// Noise-reduced position of a track at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedPosition {
    pub track_id: u32,
    pub position: na::Point2<f32>,
    /// Confidence of the window detection nearest to `position`.
    pub confidence: f32,
    /// Timestamp of the newest detection in the window.
    pub timestamp: f32,
    pub samples: usize,
}

/// Sliding-window median over a track's most recent detections.
///
/// The median ignores single-frame outliers that a mean would drag along,
/// at the cost of lagging genuine fast motion by about half a window.
#[derive(Debug, Clone, Copy)]
pub struct MedianFilter {
    window: usize,
}

impl MedianFilter {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.window
    }

    pub fn smooth(&self, track: &Track) -> Option<SmoothedPosition> {
        let window: Vec<&(f32, RawDetection)> = track.recent(self.window).collect();
        let &(timestamp, _) = *window.last()?;

        let position = median_position(window.iter().map(|(_, d)| d.center()))?;

        let confidence = window
            .iter()
            .map(|(_, d)| (na::distance_squared(&d.center(), &position), d.confidence))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, c)| c)?;

        Some(SmoothedPosition {
            track_id: track.id(),
            position,
            confidence,
            timestamp,
            samples: window.len(),
        })
    }
}

impl Default for MedianFilter {
    fn default() -> Self {
        Self::new(5)
    }
}
