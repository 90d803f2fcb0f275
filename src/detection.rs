use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

/// COCO class index of `person`.
pub const COCO_PERSON: usize = 0;
/// COCO class index of `sports ball`.
pub const COCO_SPORTS_BALL: usize = 32;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Person,
    Ball,
}

impl ObjectClass {
    /// Maps a COCO class index onto the classes we track.
    pub fn from_coco(index: usize) -> Option<Self> {
        match index {
            COCO_PERSON => Some(ObjectClass::Person),
            COCO_SPORTS_BALL => Some(ObjectClass::Ball),
            _ => None,
        }
    }

    #[inline]
    pub fn coco_index(&self) -> usize {
        match self {
            ObjectClass::Person => COCO_PERSON,
            ObjectClass::Ball => COCO_SPORTS_BALL,
        }
    }
}

/// Pose keypoint in image coordinates
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(rename = "p", default)]
    pub score: f32,
}

/// One detector output for one frame, bbox in image pixels
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawDetection {
    #[serde(rename = "c")]
    pub class: ObjectClass,
    pub bbox: BBox<Ltrb>,
    #[serde(rename = "kp", default, skip_serializing_if = "Vec::is_empty")]
    pub keypoints: Vec<Keypoint>,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub tracker_id: Option<i32>,
}

impl RawDetection {
    pub fn new(class: ObjectClass, bbox: BBox<Ltrb>, confidence: f32) -> Self {
        Self {
            class,
            bbox,
            keypoints: Vec::new(),
            confidence: confidence.clamp(0.0, 1.0),
            tracker_id: None,
        }
    }

    pub fn with_keypoints(mut self, keypoints: Vec<Keypoint>) -> Self {
        self.keypoints = keypoints;
        self
    }

    pub fn with_tracker_id(mut self, id: i32) -> Self {
        self.tracker_id = Some(id);
        self
    }

    /// The tracker id, unless absent or negative (`-1` means unassigned).
    #[inline]
    pub fn valid_tracker_id(&self) -> Option<u32> {
        self.tracker_id.and_then(|id| u32::try_from(id).ok())
    }

    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        self.bbox.center()
    }

    #[inline]
    pub fn iou(&self, other: &RawDetection) -> f32 {
        self.bbox.iou(&other.bbox)
    }
}
