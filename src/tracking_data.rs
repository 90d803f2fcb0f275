//! Versioned JSON interchange for precomputed tracking results.
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "frames": [
//!     {
//!       "timestamp": 0.04,
//!       "players": [{ "id": "3", "position": [12.5, 30.1], "team": "home" }],
//!       "ball_position": [47.0, 25.0]
//!     }
//!   ]
//! }
//! ```
//!
//! Positions are court floor coordinates `[x, z]`. The `confidence`,
//! `ball_id` and `ball_confidence` fields are optional extensions that
//! readers of the plain layout ignore.

use crate::detection::ObjectClass;
use crate::error::Error;
use crate::pipeline::PositionBatch;
use crate::projector::{CourtPosition, Team};

use serde_derive::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const FORMAT_VERSION: &str = "1.0";

/// Confidence given to positions read back without one.
const IMPORTED_CONFIDENCE: f32 = 1.0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackingData {
    pub version: String,
    pub frames: Vec<TrackingFrame>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackingFrame {
    pub timestamp: f64,
    pub players: Vec<PlayerRecord>,
    pub ball_position: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ball_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ball_confidence: Option<f32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub id: String,
    pub position: Vec<f32>,
    pub team: Team,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl PlayerRecord {
    fn from_position(p: &CourtPosition, frame_center: Option<f32>) -> Self {
        let team = p.team.unwrap_or_else(|| match frame_center {
            Some(center) if p.x >= center => Team::Away,
            _ => Team::Home,
        });

        Self {
            id: p.track_id.to_string(),
            position: vec![p.x, p.z],
            team,
            confidence: Some(p.confidence),
        }
    }

    fn to_position(&self) -> Result<CourtPosition, Error> {
        let track_id = self
            .id
            .parse::<u32>()
            .map_err(|_| Error::InvalidInput(format!("player id {:?} is not numeric", self.id)))?;

        let (x, z) = match self.position.as_slice() {
            [x, z, ..] => (*x, *z),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "player {} position has {} components",
                    self.id,
                    self.position.len()
                )))
            }
        };

        Ok(CourtPosition {
            track_id,
            class: ObjectClass::Person,
            x,
            height: 0.0,
            z,
            confidence: self.confidence.unwrap_or(IMPORTED_CONFIDENCE).clamp(0.0, 1.0),
            team: Some(self.team),
        })
    }
}

impl TrackingFrame {
    fn from_batch(batch: &PositionBatch, court_length: Option<f32>) -> Self {
        let center = court_length.map(|l| l / 2.0);

        Self {
            timestamp: batch.timestamp as f64,
            players: batch
                .players
                .iter()
                .map(|p| PlayerRecord::from_position(p, center))
                .collect(),
            ball_position: batch.ball.map(|b| vec![b.x, b.z]),
            ball_id: batch.ball.map(|b| b.track_id.to_string()),
            ball_confidence: batch.ball.map(|b| b.confidence),
        }
    }

    pub fn players(&self) -> Result<Vec<CourtPosition>, Error> {
        self.players.iter().map(PlayerRecord::to_position).collect()
    }

    /// The ball position, if the frame has one with at least two components.
    pub fn ball(&self, ball_height: f32) -> Option<CourtPosition> {
        let (x, z) = match self.ball_position.as_deref()? {
            [x, z, ..] => (*x, *z),
            _ => return None,
        };

        let track_id = self
            .ball_id
            .as_deref()
            .and_then(|id| id.parse().ok())
            .unwrap_or(0);

        Some(CourtPosition {
            track_id,
            class: ObjectClass::Ball,
            x,
            height: ball_height,
            z,
            confidence: self
                .ball_confidence
                .unwrap_or(IMPORTED_CONFIDENCE)
                .clamp(0.0, 1.0),
            team: None,
        })
    }
}

impl TrackingData {
    /// Builds the document from a time-ordered timeline. Players without a
    /// team fall on a side by their court `x` when `court_length` is given,
    /// otherwise they default to home.
    pub fn from_batches(batches: &[PositionBatch], court_length: Option<f32>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            frames: batches
                .iter()
                .map(|b| TrackingFrame::from_batch(b, court_length))
                .collect(),
        }
    }

    pub fn to_batches(&self, ball_height: f32) -> Result<Vec<PositionBatch>, Error> {
        self.frames
            .iter()
            .enumerate()
            .map(|(index, frame)| {
                Ok(PositionBatch {
                    frame_index: index as u64,
                    timestamp: frame.timestamp as f32,
                    players: frame.players()?,
                    ball: frame.ball(ball_height),
                })
            })
            .collect()
    }

    /// Players of the last frame, empty when there are no frames.
    pub fn latest_players(&self) -> Result<Vec<CourtPosition>, Error> {
        match self.frames.last() {
            Some(frame) => frame.players(),
            None => Ok(Vec::new()),
        }
    }

    pub fn latest_ball(&self, ball_height: f32) -> Option<CourtPosition> {
        self.frames.last()?.ball(ball_height)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, Error> {
        let data: TrackingData = serde_json::from_reader(reader)?;
        data.check_version()?;

        Ok(data)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), Error> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(path)?);
        self.to_writer(&mut writer)?;
        writer.flush()?;

        Ok(())
    }

    fn check_version(&self) -> Result<(), Error> {
        let major = self.version.split('.').next().unwrap_or("");
        if major != "1" {
            return Err(Error::InvalidInput(format!(
                "unsupported tracking data version {:?}",
                self.version
            )));
        }

        Ok(())
    }
}
