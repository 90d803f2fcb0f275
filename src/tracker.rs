use crate::detection::{ObjectClass, RawDetection};
use crate::error::Error;
use crate::track::Track;

use munkres::{solve_assignment, WeightMatrix};
use serde_derive::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Cost of pairing a real row with a padding column (or vice versa).
const PADDING_COST: f32 = 100_000.0;

/// Per second of staleness added to an association cost, so that equal
/// overlaps resolve to the most recently seen track.
const STALENESS_COST: f32 = 1e-4;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum IoU between a track's last box and a detection to associate them.
    pub iou_threshold: f32,
    /// Seconds without a matching detection after which a track is retired.
    pub retirement_timeout: f32,
    /// Detections retained per track.
    pub history_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.2,
            retirement_timeout: 2.0,
            history_capacity: 32,
        }
    }
}

/// Source of track identifiers. Clones share the sequence, so managers of
/// one run never hand out the same id twice.
#[derive(Debug, Clone)]
pub struct IdSequence(Arc<AtomicU32>);

impl IdSequence {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(1)))
    }

    #[inline]
    pub fn next_id(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// What one `TrackManager::update` call did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrackUpdate {
    pub timestamp: f32,
    /// Track ids that received a detection this update, new ones included.
    pub updated: Vec<u32>,
    pub created: Vec<u32>,
    pub retired: Vec<u32>,
}

/// Associates per-frame detections of one class into persistent tracks.
///
/// Person detections are matched to open tracks by box overlap through a
/// minimum-cost assignment. Ball detections all feed a single track; any
/// disagreement between them is left to the noise-reduction stage.
#[derive(Debug)]
pub struct TrackManager {
    class: ObjectClass,
    config: TrackerConfig,
    ids: IdSequence,
    tracks: Vec<Track>,
    last_ts: Option<f32>,
}

impl TrackManager {
    pub fn new(class: ObjectClass, config: TrackerConfig) -> Self {
        Self::with_ids(class, config, IdSequence::new())
    }

    pub fn with_ids(class: ObjectClass, config: TrackerConfig, ids: IdSequence) -> Self {
        Self {
            class,
            config,
            ids,
            tracks: Vec::with_capacity(32),
            last_ts: None,
        }
    }

    #[inline]
    pub fn class(&self) -> ObjectClass {
        self.class
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Open (not retired) tracks.
    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    #[inline]
    pub fn last_timestamp(&self) -> Option<f32> {
        self.last_ts
    }

    pub fn update(&mut self, ts: f32, detections: Vec<RawDetection>) -> Result<TrackUpdate, Error> {
        if !ts.is_finite() {
            return Err(Error::InvalidInput(format!("invalid frame timestamp {}", ts)));
        }

        if let Some(last) = self.last_ts {
            if ts < last {
                return Err(Error::InvalidInput(format!(
                    "frame timestamp went backwards: {} after {}",
                    ts, last
                )));
            }
        }

        let class = self.class;
        let detections: Vec<RawDetection> = detections
            .into_iter()
            .filter(|d| d.class == class && d.bbox.is_finite())
            .collect();

        let mut update = TrackUpdate {
            timestamp: ts,
            retired: self.retire(ts),
            ..Default::default()
        };

        match self.class {
            ObjectClass::Ball => self.update_ball(ts, detections, &mut update),
            ObjectClass::Person => self.update_people(ts, detections, &mut update),
        }

        self.last_ts = Some(ts);

        Ok(update)
    }

    fn retire(&mut self, ts: f32) -> Vec<u32> {
        let timeout = self.config.retirement_timeout;
        let mut retired = Vec::new();

        self.tracks.retain(|t| {
            let keep = t.time_since_update(ts) <= timeout;
            if !keep {
                retired.push(t.id());
            }

            keep
        });

        for id in &retired {
            log::debug!("{:?} track {} retired at {:.3}s", self.class, id, ts);
        }

        retired
    }

    fn spawn(&mut self, ts: f32, det: RawDetection, update: &mut TrackUpdate) {
        let id = self.ids.next_id();
        self.tracks
            .push(Track::new(id, ts, det, self.config.history_capacity));

        update.created.push(id);
        update.updated.push(id);
    }

    fn update_ball(&mut self, ts: f32, mut dets: Vec<RawDetection>, update: &mut TrackUpdate) {
        if dets.is_empty() {
            return;
        }

        dets.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut dets = dets.into_iter();

        if self.tracks.is_empty() {
            if let Some(first) = dets.next() {
                self.spawn(ts, first, update);
            }
        }

        let track = match self.tracks.first_mut() {
            Some(track) => track,
            None => return,
        };

        let id = track.id();
        let mut pushed = false;
        for det in dets {
            track.push(ts, det);
            pushed = true;
        }

        if pushed && !update.updated.contains(&id) {
            update.updated.push(id);
        }
    }

    fn update_people(&mut self, ts: f32, dets: Vec<RawDetection>, update: &mut TrackUpdate) {
        let mut matched_tracks = vec![false; self.tracks.len()];
        let mut pairs: Vec<(usize, usize)> = Vec::new();
        let mut missed: Vec<usize> = Vec::new();

        // upstream tracker ids take precedence over overlap
        for (d_idx, det) in dets.iter().enumerate() {
            let hinted = det.valid_tracker_id().and_then(|ext| {
                self.tracks
                    .iter()
                    .enumerate()
                    .position(|(t_idx, t)| !matched_tracks[t_idx] && t.external_id() == Some(ext))
            });

            match hinted {
                Some(t_idx) => {
                    matched_tracks[t_idx] = true;
                    pairs.push((t_idx, d_idx));
                }
                None => missed.push(d_idx),
            }
        }

        let open: Vec<usize> = (0..self.tracks.len())
            .filter(|&t_idx| !matched_tracks[t_idx])
            .collect();

        let (assigned, unassigned) = self.assignment(ts, &open, &missed, &dets);
        pairs.extend(assigned);

        // keep history appends in detection order
        pairs.sort_unstable_by_key(|&(_, d_idx)| d_idx);

        let mut dets: Vec<Option<RawDetection>> = dets.into_iter().map(Some).collect();

        for (t_idx, d_idx) in pairs {
            if let Some(det) = dets[d_idx].take() {
                let track = &mut self.tracks[t_idx];
                track.push(ts, det);
                update.updated.push(track.id());
            }
        }

        for d_idx in unassigned {
            if let Some(det) = dets[d_idx].take() {
                self.spawn(ts, det, update);
            }
        }
    }

    #[inline]
    fn admissible(&self, overlap: f32) -> bool {
        overlap > 0.0 && overlap >= self.config.iou_threshold
    }

    /// Solves track-to-detection assignment over the given subsets and
    /// returns `(track index, detection index)` pairs plus the detections
    /// left without a track.
    fn assignment(
        &self,
        ts: f32,
        tracks: &[usize],
        dets: &[usize],
        all_dets: &[RawDetection],
    ) -> (Vec<(usize, usize)>, Vec<usize>) {
        if tracks.is_empty() || dets.is_empty() {
            return (Vec::new(), dets.to_vec());
        }

        let n = tracks.len().max(dets.len());
        let mut iou = vec![0.0f32; n * n];
        let mut costs = vec![PADDING_COST; n * n];

        for (r, &t_idx) in tracks.iter().enumerate() {
            let track = &self.tracks[t_idx];
            let staleness = track.time_since_update(ts) * STALENESS_COST;

            for (c, &d_idx) in dets.iter().enumerate() {
                let overlap = track.last_detection().iou(&all_dets[d_idx]);
                iou[r * n + c] = overlap;

                // pairs that could never be accepted must not steer the solver
                if self.admissible(overlap) {
                    costs[r * n + c] = 1.0 - overlap + staleness;
                }
            }
        }

        let mut mat = WeightMatrix::from_row_vec(n, costs);
        let mut assignments = Vec::new();

        match solve_assignment(&mut mat) {
            Ok(positions) => {
                for pos in positions {
                    if pos.row < tracks.len() && pos.column < dets.len() {
                        let overlap = iou[pos.row * n + pos.column];

                        if self.admissible(overlap) {
                            assignments.push((tracks[pos.row], dets[pos.column]));
                        }
                    }
                }
            }
            Err(err) => {
                log::warn!("assignment could not be solved: {:?}", err);
            }
        }

        let missed = dets
            .iter()
            .copied()
            .filter(|d| !assignments.iter().any(|&(_, a)| a == *d))
            .collect();

        (assignments, missed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use std::collections::HashSet;

    fn person(x: f32, y: f32) -> RawDetection {
        RawDetection::new(
            ObjectClass::Person,
            BBox::ltrb(x, y, x + 40.0, y + 100.0),
            0.9,
        )
    }

    fn ball(x: f32, y: f32) -> RawDetection {
        RawDetection::new(ObjectClass::Ball, BBox::ltrb(x - 2.0, y - 2.0, x + 2.0, y + 2.0), 0.6)
    }

    fn manager() -> TrackManager {
        TrackManager::new(ObjectClass::Person, TrackerConfig::default())
    }

    #[test]
    fn keeps_identity_while_moving() {
        let mut tm = manager();
        let first = tm.update(0.0, vec![person(0.0, 0.0), person(300.0, 0.0)]).unwrap();
        assert_eq!(first.created.len(), 2);

        let mut ids: Vec<u32> = Vec::new();
        for step in 1..10 {
            let dx = step as f32 * 4.0;
            let upd = tm
                .update(step as f32 * 0.04, vec![person(300.0 + dx, 0.0), person(dx, 0.0)])
                .unwrap();

            assert!(upd.created.is_empty());
            let mut sorted = upd.updated.clone();
            sorted.sort_unstable();
            if ids.is_empty() {
                ids = sorted;
            } else {
                assert_eq!(ids, sorted);
            }
        }

        let left = tm
            .tracks()
            .iter()
            .find(|t| t.position().x < 100.0)
            .unwrap();
        assert_eq!(left.id(), first.created[0]);
        assert_eq!(left.hits(), 10);
    }

    #[test]
    fn unmatched_detection_spawns_track() {
        let mut tm = manager();
        tm.update(0.0, vec![person(0.0, 0.0)]).unwrap();
        let upd = tm.update(0.04, vec![person(2.0, 0.0), person(500.0, 200.0)]).unwrap();

        assert_eq!(upd.created.len(), 1);
        assert_eq!(upd.updated.len(), 2);
        assert_eq!(tm.tracks().len(), 2);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut tm = TrackManager::new(
            ObjectClass::Person,
            TrackerConfig {
                retirement_timeout: 0.1,
                ..Default::default()
            },
        );

        let mut seen = HashSet::new();
        for step in 0..20 {
            // every update is far from the previous one and old tracks expire
            let x = (step % 2) as f32 * 800.0;
            let upd = tm.update(step as f32 * 0.5, vec![person(x, 0.0)]).unwrap();
            for id in upd.created {
                assert!(seen.insert(id), "id {} reused", id);
            }
        }

        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn stale_tracks_retire() {
        let mut tm = manager();
        let id = tm.update(0.0, vec![person(0.0, 0.0)]).unwrap().created[0];

        let upd = tm.update(1.5, vec![]).unwrap();
        assert!(upd.retired.is_empty());
        assert!(tm.get(id).is_some());

        let upd = tm.update(2.5, vec![]).unwrap();
        assert_eq!(upd.retired, vec![id]);
        assert!(tm.get(id).is_none());

        // a detection at the old spot is a new identity
        let upd = tm.update(2.6, vec![person(0.0, 0.0)]).unwrap();
        assert_ne!(upd.created[0], id);
    }

    #[test]
    fn equal_overlap_prefers_recent_track() {
        let mut tm = manager();
        let created = tm
            .update(0.0, vec![person(0.0, 0.0), person(0.0, 0.0)])
            .unwrap()
            .created;
        assert_eq!(created.len(), 2);

        let refreshed = tm.update(0.5, vec![person(0.0, 0.0)]).unwrap().updated;
        assert_eq!(refreshed.len(), 1);

        let again = tm.update(1.0, vec![person(0.0, 0.0)]).unwrap().updated;
        assert_eq!(again, refreshed);
    }

    #[test]
    fn weak_overlaps_do_not_outbid_a_valid_match() {
        let square = |x: f32| {
            RawDetection::new(ObjectClass::Person, BBox::ltrb(x, 0.0, x + 10.0, 10.0), 0.9)
        };

        let mut tm = manager();
        let ids = tm.update(0.0, vec![square(0.0), square(13.6)]).unwrap().created;

        // IoU 0.25 with the first track, 0.136 for both cross pairs
        let upd = tm.update(0.04, vec![square(6.0), square(-7.6)]).unwrap();

        assert_eq!(upd.created.len(), 1);
        assert!(upd.updated.contains(&ids[0]));
        assert!(!upd.updated.contains(&ids[1]));
        assert_eq!(tm.get(ids[0]).unwrap().position().x, 11.0);
        assert_eq!(tm.get(ids[0]).unwrap().hits(), 2);
    }

    #[test]
    fn external_ids_win_over_overlap() {
        let mut tm = manager();
        let ids = tm
            .update(
                0.0,
                vec![
                    person(0.0, 0.0).with_tracker_id(11),
                    person(100.0, 0.0).with_tracker_id(12),
                ],
            )
            .unwrap()
            .created;

        // boxes swapped, upstream ids say who is who
        tm.update(
            0.04,
            vec![
                person(100.0, 0.0).with_tracker_id(11),
                person(0.0, 0.0).with_tracker_id(12),
            ],
        )
        .unwrap();

        assert_eq!(tm.get(ids[0]).unwrap().position().x, 120.0);
        assert_eq!(tm.get(ids[1]).unwrap().position().x, 20.0);
    }

    #[test]
    fn rejects_time_going_backwards() {
        let mut tm = manager();
        tm.update(1.0, vec![person(0.0, 0.0)]).unwrap();
        assert!(tm.update(0.5, vec![person(0.0, 0.0)]).is_err());
        assert!(tm.update(1.0, vec![]).is_ok());
    }

    #[test]
    fn single_ball_track() {
        let mut tm = TrackManager::new(ObjectClass::Ball, TrackerConfig::default());
        tm.update(0.0, vec![ball(10.0, 10.0), ball(400.0, 300.0)]).unwrap();
        tm.update(0.04, vec![ball(900.0, 10.0)]).unwrap();

        assert_eq!(tm.tracks().len(), 1);
        assert_eq!(tm.tracks()[0].history().len(), 3);
    }

    #[test]
    fn ignores_other_classes() {
        let mut tm = manager();
        let upd = tm.update(0.0, vec![ball(10.0, 10.0)]).unwrap();
        assert!(upd.created.is_empty());
        assert!(tm.tracks().is_empty());
    }

    #[test]
    fn shared_sequence_across_managers() {
        let ids = IdSequence::new();
        let mut players =
            TrackManager::with_ids(ObjectClass::Person, TrackerConfig::default(), ids.clone());
        let mut balls = TrackManager::with_ids(ObjectClass::Ball, TrackerConfig::default(), ids);

        let p = players.update(0.0, vec![person(0.0, 0.0)]).unwrap().created[0];
        let b = balls.update(0.0, vec![ball(5.0, 5.0)]).unwrap().created[0];
        assert_ne!(p, b);
    }
}
