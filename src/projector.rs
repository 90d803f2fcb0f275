use crate::detection::ObjectClass;
use crate::error::Error;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

/// Court extent in court units. Defaults to an NBA court in feet.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CourtDimensions {
    pub length: f32,
    pub width: f32,
}

impl Default for CourtDimensions {
    fn default() -> Self {
        Self {
            length: 94.0,
            width: 50.0,
        }
    }
}

/// Fixed mapping from image pixels to the court plane, as a homography
/// `(u, v, 1) -> (x, z, w)`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(try_from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct CalibrationTransform {
    homography: na::Matrix3<f64>,
}

impl CalibrationTransform {
    pub fn identity() -> Self {
        Self {
            homography: na::Matrix3::identity(),
        }
    }

    pub fn from_matrix(homography: na::Matrix3<f64>) -> Result<Self, Error> {
        if homography.iter().any(|v| !v.is_finite()) {
            return Err(Error::ProjectionFailed(
                "calibration contains non-finite values".into(),
            ));
        }

        if homography.determinant().abs() < 1e-12 {
            return Err(Error::ProjectionFailed("calibration is singular".into()));
        }

        Ok(Self { homography })
    }

    /// Axis-aligned scaling that stretches the whole frame over the court.
    pub fn from_frame_dims(frame: (u32, u32), court: CourtDimensions) -> Result<Self, Error> {
        if frame.0 == 0 || frame.1 == 0 {
            return Err(Error::ProjectionFailed(format!(
                "cannot calibrate from a {}x{} frame",
                frame.0, frame.1
            )));
        }

        let sx = court.length as f64 / frame.0 as f64;
        let sz = court.width as f64 / frame.1 as f64;

        Self::from_matrix(na::Matrix3::new(
            sx, 0.0, 0.0, //
            0.0, sz, 0.0, //
            0.0, 0.0, 1.0,
        ))
    }

    /// Solves the homography taking four image points onto four court
    /// points (direct linear transform). No three points may be collinear.
    pub fn from_correspondences(
        image: &[na::Point2<f64>; 4],
        court: &[na::Point2<f64>; 4],
    ) -> Result<Self, Error> {
        // padded to 9x9 so the SVD yields the full right null space
        let mut a = na::DMatrix::<f64>::zeros(9, 9);

        for (i, (p, q)) in image.iter().zip(court.iter()).enumerate() {
            let (x, y, u, v) = (p.x, p.y, q.x, q.y);
            let r = i * 2;

            a.row_mut(r)
                .copy_from_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
            a.row_mut(r + 1)
                .copy_from_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
        }

        let svd = a.svd(false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| Error::ProjectionFailed("SVD did not converge".into()))?;

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_unstable_by(|&i, &j| {
            svd.singular_values[i].total_cmp(&svd.singular_values[j])
        });

        let largest = svd.singular_values[order[order.len() - 1]];
        if svd.singular_values[order[1]] <= largest * 1e-10 {
            return Err(Error::ProjectionFailed(
                "degenerate calibration points".into(),
            ));
        }

        let h = v_t.row(order[0]);
        let mut homography = na::Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

        let scale = homography[(2, 2)];
        if scale.abs() > f64::EPSILON {
            homography /= scale;
        }

        Self::from_matrix(homography)
    }

    #[inline]
    pub fn matrix(&self) -> &na::Matrix3<f64> {
        &self.homography
    }

    /// Maps an image point onto the court plane `(x, z)`.
    pub fn apply(&self, p: na::Point2<f32>) -> Result<na::Point2<f32>, Error> {
        let q = self.homography * na::Vector3::new(p.x as f64, p.y as f64, 1.0);

        if q.z.abs() < 1e-12 {
            return Err(Error::ProjectionFailed(format!(
                "({}, {}) maps to infinity",
                p.x, p.y
            )));
        }

        Ok(na::Point2::new((q.x / q.z) as f32, (q.y / q.z) as f32))
    }
}

impl TryFrom<[[f64; 3]; 3]> for CalibrationTransform {
    type Error = Error;

    fn try_from(rows: [[f64; 3]; 3]) -> Result<Self, Error> {
        Self::from_matrix(na::Matrix3::from_fn(|r, c| rows[r][c]))
    }
}

impl From<CalibrationTransform> for [[f64; 3]; 3] {
    fn from(t: CalibrationTransform) -> Self {
        let m = t.homography;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }
}

/// Which side a player is assigned to. Anything but `home` reads as away.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Home,
    #[serde(other)]
    Away,
}

impl Team {
    /// Left half of the frame is home, right half away.
    pub fn from_image_x(x: f32, frame_width: u32) -> Self {
        if x < frame_width as f32 / 2.0 {
            Team::Home
        } else {
            Team::Away
        }
    }
}

/// A tracked entity in the court frame: `x` along the court length,
/// `height` above the floor, `z` across the court.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CourtPosition {
    pub track_id: u32,
    pub class: ObjectClass,
    pub x: f32,
    pub height: f32,
    pub z: f32,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
}

impl CourtPosition {
    #[inline]
    pub fn point(&self) -> na::Point3<f32> {
        na::Point3::new(self.x, self.height, self.z)
    }

    /// Position on the court floor, `(x, z)`.
    #[inline]
    pub fn floor(&self) -> na::Point2<f32> {
        na::Point2::new(self.x, self.z)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinateProjector {
    transform: CalibrationTransform,
    ball_height: f32,
    frame_width: Option<u32>,
}

impl CoordinateProjector {
    pub fn new(transform: CalibrationTransform, ball_height: f32) -> Self {
        Self {
            transform,
            ball_height,
            frame_width: None,
        }
    }

    /// Enables team assignment for players, split at the frame midline.
    pub fn with_frame_width(mut self, width: u32) -> Self {
        self.frame_width = Some(width);
        self
    }

    #[inline]
    pub fn transform(&self) -> &CalibrationTransform {
        &self.transform
    }

    /// Projects an image point. Players stand on the floor; 2D tracking
    /// cannot recover the ball's height so it sits at a fixed offset.
    pub fn project(
        &self,
        track_id: u32,
        class: ObjectClass,
        image_point: na::Point2<f32>,
        confidence: f32,
    ) -> Result<CourtPosition, Error> {
        let floor = self.transform.apply(image_point)?;

        let (height, team) = match class {
            ObjectClass::Ball => (self.ball_height, None),
            ObjectClass::Person => (
                0.0,
                self.frame_width
                    .map(|w| Team::from_image_x(image_point.x, w)),
            ),
        };

        Ok(CourtPosition {
            track_id,
            class,
            x: floor.x,
            height,
            z: floor.y,
            confidence: confidence.clamp(0.0, 1.0),
            team,
        })
    }
}
