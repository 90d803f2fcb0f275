use ndarray::{Array3, ArrayView3};
use std::sync::Arc;

/// Decoded video frame, HWC interleaved pixels.
///
/// Frames are cheap to clone and never mutated once produced, so the
/// player and ball passes can read the same buffer concurrently.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub dims: (u32, u32),
    pub timestamp: f32, // in seconds
    image: Arc<Array3<u8>>,
}

impl Frame {
    pub fn new(index: u64, timestamp: f32, image: Array3<u8>) -> Self {
        let (h, w, _) = image.dim();

        Self {
            index,
            dims: (w as u32, h as u32),
            timestamp,
            image: Arc::new(image),
        }
    }

    /// Frame without pixel data, for replaying precomputed detections.
    pub fn placeholder(index: u64, timestamp: f32, dims: (u32, u32)) -> Self {
        Self {
            index,
            dims,
            timestamp,
            image: Arc::new(Array3::zeros((0, 0, 3))),
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.dims.0
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.dims.1
    }

    #[inline]
    pub fn image(&self) -> ArrayView3<'_, u8> {
        self.image.view()
    }

    #[inline]
    pub fn has_pixels(&self) -> bool {
        !self.image.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_follow_image_shape() {
        let frame = Frame::new(3, 0.1, Array3::zeros((480, 640, 3)));
        assert_eq!(frame.dims, (640, 480));
        assert!(frame.has_pixels());

        let clone = frame.clone();
        assert_eq!(clone.image().as_ptr(), frame.image().as_ptr());
    }

    #[test]
    fn placeholder_has_no_pixels() {
        let frame = Frame::placeholder(0, 0.0, (1920, 1080));
        assert_eq!(frame.width(), 1920);
        assert_eq!(frame.height(), 1080);
        assert!(!frame.has_pixels());
    }
}
