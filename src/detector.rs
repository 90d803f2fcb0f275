use crate::detection::{ObjectClass, RawDetection};
use crate::error::Error;
use crate::frame::Frame;
use crate::yolo::{to_input_tensor, YoloDecoder, YoloDecoderConfig};

use ndarray::prelude::*;
use once_cell::sync::OnceCell;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Confidence floor and NMS overlap ceiling for one detection pass.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub confidence: f32,
    pub iou: f32,
}

impl Thresholds {
    pub const PLAYER: Thresholds = Thresholds {
        confidence: 0.5,
        iou: 0.45,
    };

    pub const BALL: Thresholds = Thresholds {
        confidence: 0.4,
        iou: 0.3,
    };

    #[inline]
    pub fn accepts(&self, det: &RawDetection) -> bool {
        det.confidence >= self.confidence
    }
}

/// A detection pass restricted to a single object class.
pub trait Detector: Send + Sync {
    fn class(&self) -> ObjectClass;

    fn detect(&self, frame: &Frame, thresholds: &Thresholds) -> Result<Vec<RawDetection>, Error>;
}

/// Binding to an externally provided inference runtime.
pub trait InferenceModel: Send + Sync {
    /// Model input `(width, height)` in pixels.
    fn input_size(&self) -> (u32, u32);

    /// Runs a `N x 3 x H x W` batch and returns the raw prediction tensor.
    fn run(&self, input: ArrayView4<'_, f32>) -> Result<Array3<f32>, Error>;
}

pub type ModelLoader = Box<dyn Fn() -> Result<Arc<dyn InferenceModel>, Error> + Send + Sync>;

/// Model loaded on first use and then shared read-only.
pub struct LazyModel {
    name: String,
    loader: ModelLoader,
    cell: OnceCell<Arc<dyn InferenceModel>>,
}

impl LazyModel {
    pub fn new<F>(name: &str, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn InferenceModel>, Error> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            loader: Box::new(loader),
            cell: OnceCell::new(),
        }
    }

    pub fn loaded(name: &str, model: Arc<dyn InferenceModel>) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(model.clone());

        Self {
            name: name.to_string(),
            loader: Box::new(move || Ok(model.clone())),
            cell,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Concurrent first calls run the loader once; a failed load is not
    /// cached and is retried on the next call.
    pub fn get(&self) -> Result<&Arc<dyn InferenceModel>, Error> {
        self.cell.get_or_try_init(|| {
            log::info!("loading model {}", self.name);
            (self.loader)()
        })
    }
}

impl fmt::Debug for LazyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyModel")
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

fn run_model(
    model: &dyn InferenceModel,
    decoder: &YoloDecoder,
    frame: &Frame,
    thresholds: &Thresholds,
) -> Result<Vec<RawDetection>, Error> {
    let input_size = model.input_size();
    let input = to_input_tensor(frame, input_size)?;
    let output = model.run(input.view())?;

    let mut batches = decoder.decode(output.view(), input_size, frame.dims, thresholds)?;

    Ok(batches.pop().unwrap_or_default())
}

/// Person/pose pass. Player positions are required, so a missing model
/// fails the pass.
#[derive(Debug)]
pub struct PersonPoseDetector {
    model: LazyModel,
    decoder: YoloDecoder,
}

impl PersonPoseDetector {
    pub fn new(model: LazyModel) -> Self {
        Self::with_decoder(model, YoloDecoderConfig::pose())
    }

    pub fn with_decoder(model: LazyModel, config: YoloDecoderConfig) -> Self {
        Self {
            model,
            decoder: YoloDecoder::new(config),
        }
    }
}

impl Detector for PersonPoseDetector {
    #[inline]
    fn class(&self) -> ObjectClass {
        ObjectClass::Person
    }

    fn detect(&self, frame: &Frame, thresholds: &Thresholds) -> Result<Vec<RawDetection>, Error> {
        let model = self.model.get().map_err(|err| {
            Error::DetectionFailed(format!("player model {}: {}", self.model.name(), err))
        })?;

        run_model(model.as_ref(), &self.decoder, frame, thresholds)
    }
}

/// Ball pass. The ball is optional: without a usable model every frame
/// yields no detections.
#[derive(Debug)]
pub struct BallDetector {
    model: LazyModel,
    decoder: YoloDecoder,
    warned: AtomicBool,
}

impl BallDetector {
    pub fn new(model: LazyModel) -> Self {
        Self::with_decoder(model, YoloDecoderConfig::ball())
    }

    pub fn with_decoder(model: LazyModel, config: YoloDecoderConfig) -> Self {
        Self {
            model,
            decoder: YoloDecoder::new(config),
            warned: AtomicBool::new(false),
        }
    }
}

impl Detector for BallDetector {
    #[inline]
    fn class(&self) -> ObjectClass {
        ObjectClass::Ball
    }

    fn detect(&self, frame: &Frame, thresholds: &Thresholds) -> Result<Vec<RawDetection>, Error> {
        let model = match self.model.get() {
            Ok(model) => model,
            Err(err) => {
                if !self.warned.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "ball model {} unavailable, skipping ball detection: {}",
                        self.model.name(),
                        err
                    );
                }

                return Ok(Vec::new());
            }
        };

        run_model(model.as_ref(), &self.decoder, frame, thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::yolo::COCO_NUM_CLASSES;
    use std::sync::atomic::AtomicUsize;

    /// Emits one prediction row per call, in model input pixels.
    struct FixedModel {
        row: Vec<f32>,
    }

    impl InferenceModel for FixedModel {
        fn input_size(&self) -> (u32, u32) {
            (8, 8)
        }

        fn run(&self, input: ArrayView4<'_, f32>) -> Result<Array3<f32>, Error> {
            assert_eq!(input.shape(), &[1, 3, 8, 8]);
            Ok(Array3::from_shape_vec((1, 1, self.row.len()), self.row.clone()).unwrap())
        }
    }

    fn ball_model(score: f32) -> Arc<dyn InferenceModel> {
        let mut row = vec![0.0; 4 + COCO_NUM_CLASSES];
        row[..4].copy_from_slice(&[4.0, 4.0, 2.0, 2.0]);
        row[4 + 32] = score;
        Arc::new(FixedModel { row })
    }

    fn frame() -> Frame {
        Frame::new(0, 0.0, Array3::zeros((16, 16, 3)))
    }

    #[test]
    fn loads_model_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let model = LazyModel::new("ball.onnx", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ball_model(0.9))
        });

        let detector = BallDetector::new(model);
        assert!(!detector.model.is_loaded());

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| detector.detect(&frame(), &Thresholds::BALL).unwrap());
            }
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        let dets = detector.detect(&frame(), &Thresholds::BALL).unwrap();
        assert_eq!(dets.len(), 1);
        // scaled from the 8x8 model input to the 16x16 frame
        assert_eq!(dets[0].center(), nalgebra::Point2::new(8.0, 8.0));
    }

    #[test]
    fn missing_ball_model_yields_nothing() {
        let detector = BallDetector::new(LazyModel::new("missing.onnx", || {
            Err(Error::SourceUnavailable("no such model".into()))
        }));

        assert!(detector.detect(&frame(), &Thresholds::BALL).unwrap().is_empty());
        assert!(detector.detect(&frame(), &Thresholds::BALL).unwrap().is_empty());
    }

    #[test]
    fn missing_player_model_fails() {
        let detector = PersonPoseDetector::new(LazyModel::new("missing.onnx", || {
            Err(Error::SourceUnavailable("no such model".into()))
        }));

        let err = detector.detect(&frame(), &Thresholds::PLAYER).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DetectionFailed);
    }

    #[test]
    fn below_threshold_ball_is_dropped() {
        let detector = BallDetector::new(LazyModel::loaded("ball.onnx", ball_model(0.35)));
        assert!(detector.detect(&frame(), &Thresholds::BALL).unwrap().is_empty());
    }
}
