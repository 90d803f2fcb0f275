use crate::bbox::BBox;
use crate::detection::{Keypoint, ObjectClass, RawDetection};
use crate::detector::Thresholds;
use crate::error::Error;
use crate::frame::Frame;

use ndarray::prelude::*;
use serde_derive::{Deserialize, Serialize};

pub const COCO_NUM_CLASSES: usize = 80;
pub const COCO_NUM_KEYPOINTS: usize = 17;

/// Per-prediction attribute layout of the model output.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// `cx, cy, w, h, score_0 .. score_n`
    Detect { num_classes: usize },
    /// `cx, cy, w, h, score, (x, y, visibility) * num_keypoints`; always person
    Pose { num_keypoints: usize },
}

impl OutputLayout {
    #[inline]
    pub fn attributes(&self) -> usize {
        match self {
            OutputLayout::Detect { num_classes } => 4 + num_classes,
            OutputLayout::Pose { num_keypoints } => 5 + 3 * num_keypoints,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct YoloDecoderConfig {
    pub layout: OutputLayout,
    /// Box coordinates are in `[0, 1]` rather than model input pixels.
    #[serde(default)]
    pub normalized: bool,
    /// COCO class indices to keep; empty keeps every class we track.
    #[serde(default)]
    pub classes: Vec<usize>,
}

impl YoloDecoderConfig {
    pub fn pose() -> Self {
        Self {
            layout: OutputLayout::Pose {
                num_keypoints: COCO_NUM_KEYPOINTS,
            },
            normalized: false,
            classes: vec![ObjectClass::Person.coco_index()],
        }
    }

    pub fn ball() -> Self {
        Self {
            layout: OutputLayout::Detect {
                num_classes: COCO_NUM_CLASSES,
            },
            normalized: false,
            classes: vec![ObjectClass::Ball.coco_index()],
        }
    }
}

/// Resizes a frame to the model input (nearest neighbour) and packs it as
/// a `1 x 3 x H x W` tensor scaled to `[0, 1]`.
pub fn to_input_tensor(frame: &Frame, input_size: (u32, u32)) -> Result<Array4<f32>, Error> {
    if !frame.has_pixels() {
        return Err(Error::InvalidInput(format!(
            "frame {} carries no pixel data",
            frame.index
        )));
    }

    let image = frame.image();
    let (fh, fw, channels) = image.dim();
    if channels < 3 {
        return Err(Error::InvalidInput(format!(
            "expected an RGB frame, got {} channels",
            channels
        )));
    }

    let (in_w, in_h) = (input_size.0 as usize, input_size.1 as usize);
    let sx = fw as f32 / in_w as f32;
    let sy = fh as f32 / in_h as f32;

    let mut tensor = Array4::zeros([1, 3, in_h, in_w]);
    for y in 0..in_h {
        let src_y = ((y as f32 + 0.5) * sy).floor().min((fh - 1) as f32) as usize;

        for x in 0..in_w {
            let src_x = ((x as f32 + 0.5) * sx).floor().min((fw - 1) as f32) as usize;

            for c in 0..3 {
                tensor[[0, c, y, x]] = image[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    Ok(tensor)
}

#[derive(Debug, Clone)]
pub struct YoloDecoder {
    config: YoloDecoderConfig,
}

impl YoloDecoder {
    pub fn new(config: YoloDecoderConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &YoloDecoderConfig {
        &self.config
    }

    /// Decodes a `batch x predictions x attributes` output (or the
    /// attribute-major `batch x attributes x predictions` one YOLOv8
    /// exports) into detections in frame pixels.
    pub fn decode(
        &self,
        output: ArrayView3<'_, f32>,
        input_size: (u32, u32),
        frame_dims: (u32, u32),
        thresholds: &Thresholds,
    ) -> Result<Vec<Vec<RawDetection>>, Error> {
        let attributes = self.config.layout.attributes();
        let shape = output.dim();

        let view = if shape.2 == attributes {
            output
        } else if shape.1 == attributes {
            output.permuted_axes([0, 2, 1])
        } else {
            return Err(Error::DetectionFailed(format!(
                "unexpected model output shape {:?}, expected {} attributes",
                shape, attributes
            )));
        };

        let (sx, sy) = if self.config.normalized {
            (frame_dims.0 as f32, frame_dims.1 as f32)
        } else {
            (
                frame_dims.0 as f32 / input_size.0 as f32,
                frame_dims.1 as f32 / input_size.1 as f32,
            )
        };

        let mut results = Vec::with_capacity(view.len_of(Axis(0)));

        for batch in view.axis_iter(Axis(0)) {
            // The bounding boxes grouped by class.
            let mut persons = Vec::new();
            let mut balls = Vec::new();

            for pred in batch.axis_iter(Axis(0)) {
                if let Some(det) = self.decode_one(pred, sx, sy, thresholds) {
                    match det.class {
                        ObjectClass::Person => persons.push(det),
                        ObjectClass::Ball => balls.push(det),
                    }
                }
            }

            let mut dets = non_maximum_supression(persons, thresholds.iou);
            dets.extend(non_maximum_supression(balls, thresholds.iou));
            results.push(dets);
        }

        Ok(results)
    }

    fn decode_one(
        &self,
        pred: ArrayView1<'_, f32>,
        sx: f32,
        sy: f32,
        thresholds: &Thresholds,
    ) -> Option<RawDetection> {
        let (cx, cy, w, h) = (pred[0] * sx, pred[1] * sy, pred[2] * sx, pred[3] * sy);

        let (class_index, confidence) = match self.config.layout {
            OutputLayout::Detect { num_classes } => {
                let mut class_index = None;
                let mut confidence = 0.0;

                for idx in 0..num_classes {
                    let val = pred[4 + idx];
                    if val > confidence {
                        class_index = Some(idx);
                        confidence = val;
                    }
                }

                (class_index?, confidence)
            }
            OutputLayout::Pose { .. } => (ObjectClass::Person.coco_index(), pred[4]),
        };

        if confidence < thresholds.confidence {
            return None;
        }

        if !self.config.classes.is_empty() && !self.config.classes.contains(&class_index) {
            return None;
        }

        let class = ObjectClass::from_coco(class_index)?;
        let det = RawDetection::new(class, BBox::xywh(cx, cy, w, h).as_ltrb(), confidence);

        Some(match self.config.layout {
            OutputLayout::Pose { num_keypoints } => {
                let keypoints = (0..num_keypoints)
                    .map(|k| Keypoint {
                        x: pred[5 + k * 3] * sx,
                        y: pred[5 + k * 3 + 1] * sy,
                        score: pred[5 + k * 3 + 2],
                    })
                    .collect();

                det.with_keypoints(keypoints)
            }
            OutputLayout::Detect { .. } => det,
        })
    }
}

/// Greedy NMS: keeps the most confident box and drops any later box whose
/// IoU with a kept one exceeds `iou_threshold`.
pub fn non_maximum_supression(
    mut dets: Vec<RawDetection>,
    iou_threshold: f32,
) -> Vec<RawDetection> {
    if dets.len() < 2 {
        return dets;
    }

    dets.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut retain = vec![true; dets.len()];
    for idx in 0..dets.len() - 1 {
        if !retain[idx] {
            continue;
        }

        for other in idx + 1..dets.len() {
            if retain[other] && dets[idx].iou(&dets[other]) > iou_threshold {
                retain[other] = false;
            }
        }
    }

    dets.into_iter()
        .zip(retain)
        .filter_map(|(det, keep)| if keep { Some(det) } else { None })
        .collect()
}
