pub mod bbox;
pub mod config;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod progress;
pub mod projector;
pub mod replay;
pub mod smoothing;
pub mod source;
pub mod tracker;
pub mod tracking_data;
pub mod yolo;

mod circular_queue;
mod track;

pub use config::PipelineConfig;
pub use detection::{ObjectClass, RawDetection};
pub use detector::{Detector, Thresholds};
pub use error::{Error, ErrorKind};
pub use frame::Frame;
pub use pipeline::{CourtRenderer, FrameSession, PipelineState, PositionBatch, TrackingPipeline, VideoTracking};
pub use progress::{CancellationToken, ProgressEvent, ProgressReporter};
pub use projector::{CalibrationTransform, CourtPosition, Team};
pub use track::Track;
pub use tracking_data::TrackingData;
