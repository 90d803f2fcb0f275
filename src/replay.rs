//! Replays recorded detections through the pipeline without a model or
//! a decoder.
//!
//! A dump holds one frame per line, `<timestamp_ms>:<json array>`, where
//! the array holds `RawDetection`s in their compact form:
//!
//! ```text
//! 0:[{"c":"person","bbox":[10,20,50,120],"p":0.91,"id":3}]
//! 40:[{"c":"person","bbox":[12,20,52,120],"p":0.9,"id":3},{"c":"ball","bbox":[300,40,310,50],"p":0.6}]
//! ```

use crate::detection::{ObjectClass, RawDetection};
use crate::detector::{Detector, Thresholds};
use crate::error::Error;
use crate::frame::Frame;
use crate::source::{FrameSource, VideoRef, VideoSource};

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Seconds from the start of the video.
    pub timestamp: f32,
    pub detections: Vec<RawDetection>,
}

/// A parsed detection dump for a video of known frame size.
#[derive(Debug, Clone)]
pub struct DetectionLog {
    dims: (u32, u32),
    entries: Vec<LogEntry>,
}

impl DetectionLog {
    pub fn parse<R: BufRead>(reader: R, dims: (u32, u32)) -> Result<Self, Error> {
        let mut entries: Vec<LogEntry> = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            let lineno = idx + 1;

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (ts, json) = line.split_once(':').ok_or_else(|| {
                Error::InvalidInput(format!("line {}: expected `<timestamp_ms>:<detections>`", lineno))
            })?;

            let ts_ms = ts.trim().parse::<u64>().map_err(|err| {
                Error::InvalidInput(format!("line {}: bad timestamp {:?}: {}", lineno, ts, err))
            })?;

            let detections: Vec<RawDetection> = serde_json::from_str(json).map_err(|err| {
                Error::InvalidInput(format!("line {}: bad detections: {}", lineno, err))
            })?;

            let timestamp = ts_ms as f32 / 1000.0;
            if let Some(last) = entries.last() {
                if timestamp < last.timestamp {
                    return Err(Error::InvalidInput(format!(
                        "line {}: timestamp {}ms is before the previous frame",
                        lineno, ts_ms
                    )));
                }
            }

            entries.push(LogEntry {
                timestamp,
                detections,
            });
        }

        log::debug!("parsed {} frames of detections", entries.len());

        Ok(Self { dims, entries })
    }

    pub fn load<P: AsRef<Path>>(path: P, dims: (u32, u32)) -> Result<Self, Error> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file), dims)
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        self.dims
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Detector answering from the log for one class.
    pub fn detector(self: &Arc<Self>, class: ObjectClass) -> LogDetector {
        LogDetector {
            log: self.clone(),
            class,
        }
    }
}

impl VideoSource for DetectionLog {
    fn open(&self, video: &VideoRef) -> Result<Box<dyn FrameSource>, Error> {
        log::debug!("replaying {} frames for {}", self.entries.len(), video);

        let frames: Vec<Frame> = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, e)| Frame::placeholder(index as u64, e.timestamp, self.dims))
            .collect();

        Ok(Box::new(LogFrames {
            total: frames.len(),
            frames: frames.into_iter(),
        }))
    }
}

struct LogFrames {
    frames: std::vec::IntoIter<Frame>,
    total: usize,
}

impl FrameSource for LogFrames {
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        Ok(self.frames.next())
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.total)
    }
}

/// Looks detections up by frame index.
#[derive(Debug, Clone)]
pub struct LogDetector {
    log: Arc<DetectionLog>,
    class: ObjectClass,
}

impl Detector for LogDetector {
    fn class(&self) -> ObjectClass {
        self.class
    }

    fn detect(&self, frame: &Frame, thresholds: &Thresholds) -> Result<Vec<RawDetection>, Error> {
        let entry = match self.log.entries.get(frame.index as usize) {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };

        Ok(entry
            .detections
            .iter()
            .filter(|d| d.class == self.class && thresholds.accepts(d))
            .cloned()
            .collect())
    }
}
