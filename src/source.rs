use crate::error::Error;
use crate::frame::Frame;

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;

static YOUTUBE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:v=|be/|embed/)([a-zA-Z0-9_-]{11})").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoLocation {
    /// File on the local filesystem
    Local(PathBuf),
    /// Network stream (http, https, rtsp)
    Stream(String),
    /// YouTube video, by its 11 character id
    YouTube(String),
}

/// Validated reference to the video a run processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef {
    raw: String,
    location: VideoLocation,
}

impl VideoRef {
    pub fn parse(reference: &str) -> Result<Self, Error> {
        let raw = reference.trim();
        if raw.is_empty() {
            return Err(Error::InvalidInput("empty video reference".into()));
        }

        let lower = raw.to_ascii_lowercase();
        let location = if lower.contains("youtube.com") || lower.contains("youtu.be") {
            let id = YOUTUBE_ID
                .captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| {
                    Error::InvalidInput(format!("no YouTube video id in `{}`", raw))
                })?;

            VideoLocation::YouTube(id)
        } else if let Some(path) = raw.strip_prefix("file://") {
            VideoLocation::Local(PathBuf::from(path))
        } else if lower.starts_with("http://")
            || lower.starts_with("https://")
            || lower.starts_with("rtsp://")
        {
            VideoLocation::Stream(raw.to_string())
        } else if lower.contains("://") {
            return Err(Error::InvalidInput(format!(
                "unsupported video scheme in `{}`",
                raw
            )));
        } else {
            VideoLocation::Local(PathBuf::from(raw))
        };

        Ok(Self {
            raw: raw.to_string(),
            location,
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[inline]
    pub fn location(&self) -> &VideoLocation {
        &self.location
    }
}

impl fmt::Display for VideoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Sequential reader of decoded frames.
///
/// Acquiring a frame may block on decoding or network IO; callers treat
/// every `next_frame` call as a suspension point.
pub trait FrameSource: Send {
    /// Next frame in timestamp order, `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, Error>;

    /// Total number of frames if the container knows it.
    fn frame_count(&self) -> Option<usize> {
        None
    }
}

/// Opens frame streams for a video reference. Each call yields an
/// independent stream starting at the first frame.
pub trait VideoSource: Send + Sync {
    fn open(&self, video: &VideoRef) -> Result<Box<dyn FrameSource>, Error>;
}

/// Frames held in memory, mostly useful for tests and replays.
#[derive(Debug, Clone, Default)]
pub struct MemoryVideo {
    frames: Vec<Frame>,
}

impl MemoryVideo {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl VideoSource for MemoryVideo {
    fn open(&self, _video: &VideoRef) -> Result<Box<dyn FrameSource>, Error> {
        Ok(Box::new(MemoryFrames {
            frames: self.frames.clone().into_iter(),
            total: self.frames.len(),
        }))
    }
}

pub struct MemoryFrames {
    frames: std::vec::IntoIter<Frame>,
    total: usize,
}

impl FrameSource for MemoryFrames {
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        Ok(self.frames.next())
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.total)
    }
}

#[cfg(feature = "opencv")]
pub use capture::{CaptureFrames, CaptureVideo};

#[cfg(feature = "opencv")]
mod capture {
    use super::{FrameSource, VideoLocation, VideoRef, VideoSource};
    use crate::error::Error;
    use crate::frame::Frame;

    use ndarray::{s, Array3};
    use opencv::{core, prelude::*, videoio};

    /// Decodes local files and network streams through OpenCV.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CaptureVideo;

    impl VideoSource for CaptureVideo {
        fn open(&self, video: &VideoRef) -> Result<Box<dyn FrameSource>, Error> {
            let location = match video.location() {
                VideoLocation::Local(path) => {
                    if !path.exists() {
                        return Err(Error::SourceUnavailable(format!(
                            "no such file: {}",
                            path.display()
                        )));
                    }

                    path.to_string_lossy().to_string()
                }
                VideoLocation::Stream(url) => url.clone(),
                VideoLocation::YouTube(id) => {
                    return Err(Error::SourceUnavailable(format!(
                        "YouTube video {} must be downloaded before processing",
                        id
                    )))
                }
            };

            let cam = videoio::VideoCapture::from_file(&location, videoio::CAP_ANY)?;
            if !cam.is_opened()? {
                return Err(Error::SourceUnavailable(format!(
                    "unable to open {}",
                    location
                )));
            }

            let count = cam.get(videoio::CAP_PROP_FRAME_COUNT)?;

            Ok(Box::new(CaptureFrames {
                cam,
                index: 0,
                total: if count > 0.0 { Some(count as usize) } else { None },
            }))
        }
    }

    pub struct CaptureFrames {
        cam: videoio::VideoCapture,
        index: u64,
        total: Option<usize>,
    }

    // VideoCapture owns a raw pointer but is only ever touched by the
    // thread that owns this source.
    unsafe impl Send for CaptureFrames {}

    impl FrameSource for CaptureFrames {
        fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
            let mut mat = core::Mat::default();
            if !self.cam.read(&mut mat)? {
                return Ok(None);
            }

            let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
            if rows == 0 || cols == 0 {
                return Ok(None);
            }

            let mat = if mat.is_continuous() { mat } else { mat.try_clone()? };
            let bytes = mat.data_bytes()?;
            let channels = bytes.len() / (rows * cols);

            let bgr = Array3::from_shape_vec((rows, cols, channels), bytes.to_vec())
                .map_err(|e| Error::SourceUnavailable(e.to_string()))?;
            let rgb = bgr.slice(s![.., .., ..;-1]).to_owned();

            let ts = self.cam.get(videoio::CAP_PROP_POS_MSEC)? / 1000.0;
            let frame = Frame::new(self.index, ts as f32, rgb);
            self.index += 1;

            Ok(Some(frame))
        }

        fn frame_count(&self) -> Option<usize> {
            self.total
        }
    }
}
