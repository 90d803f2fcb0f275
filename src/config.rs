use crate::detector::Thresholds;
use crate::error::Error;
use crate::projector::{CalibrationTransform, CourtDimensions};
use crate::tracker::TrackerConfig;

use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Everything a `TrackingPipeline` is parameterised by.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    #[serde(default = "default_player_thresholds")]
    pub player: Thresholds,
    #[serde(default = "default_ball_thresholds")]
    pub ball: Thresholds,
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Ball detections in the median window.
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
    /// Fixed ball offset above the court plane, in court units.
    #[serde(default = "default_ball_height")]
    pub ball_height: f32,
    #[serde(default)]
    pub court: CourtDimensions,
    /// Image to court homography. Derived from the first frame when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationTransform>,
}

fn default_player_thresholds() -> Thresholds { Thresholds::PLAYER }
fn default_ball_thresholds() -> Thresholds { Thresholds::BALL }
fn default_smoothing_window() -> usize { 5 }
fn default_ball_height() -> f32 { 0.1 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            player: default_player_thresholds(),
            ball: default_ball_thresholds(),
            tracker: TrackerConfig::default(),
            smoothing_window: default_smoothing_window(),
            ball_height: default_ball_height(),
            court: CourtDimensions::default(),
            calibration: None,
        }
    }
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        for (name, t) in [("player", &self.player), ("ball", &self.ball)] {
            if !(0.0..=1.0).contains(&t.confidence) || !(0.0..=1.0).contains(&t.iou) {
                return Err(Error::InvalidInput(format!(
                    "{} thresholds out of [0, 1]: {:?}",
                    name, t
                )));
            }
        }

        let timeout = self.tracker.retirement_timeout;
        if timeout.is_nan() || timeout < 0.0 {
            return Err(Error::InvalidInput(format!(
                "invalid retirement timeout {}",
                self.tracker.retirement_timeout
            )));
        }

        if self.court.length <= 0.0 || self.court.width <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "invalid court dimensions {:?}",
                self.court
            )));
        }

        let iou = self.tracker.iou_threshold;
        if !(0.0..=1.0).contains(&iou) {
            return Err(Error::InvalidInput(format!(
                "association IoU threshold {} out of [0, 1]",
                iou
            )));
        }

        if self.smoothing_window == 0 || self.smoothing_window > self.tracker.history_capacity {
            return Err(Error::InvalidInput(format!(
                "smoothing window {} must be within the track history of {}",
                self.smoothing_window, self.tracker.history_capacity
            )));
        }

        Ok(())
    }
}
