use crate::types::{DetectedObject, PositionSample, TrackingRecord, Velocity};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

pub const HISTORY_SIZE: usize = 30;
/// Records not seen for longer than this are evicted.
pub const STALE_AFTER_MS: u64 = 5_000;
/// Speed (position units per second) below which an object counts as stable.
pub const STABLE_SPEED: f32 = 0.1;
/// Max distance (normalized units) between a detection and the predicted
/// position of a live track of the same label for the detection to inherit
/// that track's id, on back-to-back frames.
pub const MATCH_RADIUS: f32 = 0.25;
/// How fast the match gate widens with time since the track was last seen,
/// in normalized units per second.
pub const MATCH_GATE_GROWTH: f32 = 1.0;

#[derive(Debug, Clone)]
struct Track {
    id: String,
    label: String,
    first_seen_ms: u64,
    last_seen_ms: u64,
    positions: VecDeque<PositionSample>,
    velocity: Velocity,
    stable: bool,
}

impl Track {
    fn new(id: &str, label: &str, x: f32, y: f32, now_ms: u64) -> Self {
        let mut positions = VecDeque::with_capacity(HISTORY_SIZE);
        positions.push_back(PositionSample {
            x,
            y,
            timestamp_ms: now_ms,
        });
        Self {
            id: id.to_string(),
            label: label.to_string(),
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
            positions,
            velocity: Velocity::default(),
            stable: true,
        }
    }

    fn observe(&mut self, x: f32, y: f32, now_ms: u64) {
        let now_ms = now_ms.max(self.last_seen_ms);
        self.last_seen_ms = now_ms;
        self.positions.push_back(PositionSample {
            x,
            y,
            timestamp_ms: now_ms,
        });
        while self.positions.len() > HISTORY_SIZE {
            self.positions.pop_front();
        }

        let n = self.positions.len();
        if n > 1 {
            let new = self.positions[n - 1];
            let old = self.positions[n - 2];
            let dt = (new.timestamp_ms - old.timestamp_ms) as f32 / 1000.0;
            // same timestamp: keep the previous estimate
            if dt > 0.0 {
                self.velocity = Velocity {
                    x: (new.x - old.x) / dt,
                    y: (new.y - old.y) / dt,
                };
            }
        }
        self.stable = self.velocity.speed() < STABLE_SPEED;
    }

    fn last_position(&self) -> (f32, f32) {
        self.positions
            .back()
            .map(|p| (p.x, p.y))
            .unwrap_or((f32::NAN, f32::NAN))
    }

    /// Where the track should be at `now_ms` at constant velocity, and how far
    /// from there a detection may land and still count as this track.
    fn gate(&self, now_ms: u64) -> ((f32, f32), f32) {
        let dt = now_ms.saturating_sub(self.last_seen_ms) as f32 / 1000.0;
        let (x, y) = self.last_position();
        (
            (x + self.velocity.x * dt, y + self.velocity.y * dt),
            MATCH_RADIUS + MATCH_GATE_GROWTH * dt,
        )
    }

    fn record(&self) -> TrackingRecord {
        TrackingRecord {
            id: self.id.clone(),
            label: self.label.clone(),
            first_seen_ms: self.first_seen_ms,
            last_seen_ms: self.last_seen_ms,
            positions: self.positions.iter().copied().collect(),
            velocity: self.velocity,
            stable: self.stable,
        }
    }
}

/// Live per-object state across frames. Not synchronized; the pipeline keeps
/// it behind a single writer lock.
#[derive(Debug, Default)]
pub struct Tracker {
    tracks: HashMap<String, Track>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Records one sighting of `id` and returns a copy of its state.
    pub fn observe(&mut self, id: &str, label: &str, x: f32, y: f32, now_ms: u64) -> TrackingRecord {
        match self.tracks.get_mut(id) {
            Some(track) => {
                track.observe(x, y, now_ms);
                track.record()
            }
            None => {
                let track = Track::new(id, label, x, y, now_ms);
                let record = track.record();
                self.tracks.insert(id.to_string(), track);
                record
            }
        }
    }

    /// Drops every record whose last sighting is more than
    /// [`STALE_AFTER_MS`] before `now_ms`. Returns how many were removed.
    pub fn evict_stale(&mut self, now_ms: u64) -> usize {
        let before = self.tracks.len();
        self.tracks
            .retain(|_, t| now_ms.saturating_sub(t.last_seen_ms) <= STALE_AFTER_MS);
        let evicted = before - self.tracks.len();
        if evicted > 0 {
            debug!(evicted, live = self.tracks.len(), "evicted stale tracks");
        }
        evicted
    }

    /// Nearest live track with `label` whose gate contains `center`,
    /// skipping ids in `claimed`.
    fn associate(
        &self,
        label: &str,
        center: (f32, f32),
        now_ms: u64,
        claimed: &HashSet<String>,
    ) -> Option<String> {
        self.tracks
            .values()
            .filter(|t| t.label == label && !claimed.contains(&t.id))
            .filter_map(|t| {
                let ((x, y), radius) = t.gate(now_ms);
                let d = ((x - center.0).powi(2) + (y - center.1).powi(2)).sqrt();
                (d <= radius).then_some((d, &t.id))
            })
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, id)| id.clone())
    }

    /// Evicts stale tracks, then carries identity over to this frame's
    /// detections (highest confidence first) and attaches a tracking snapshot
    /// to each one. Positions are box centers.
    pub fn update(&mut self, objects: &mut [DetectedObject], now_ms: u64) {
        self.evict_stale(now_ms);

        let mut order: Vec<usize> = (0..objects.len()).collect();
        order.sort_by(|a, b| {
            objects[*b]
                .confidence
                .partial_cmp(&objects[*a].confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut claimed = HashSet::new();
        for idx in order {
            let obj = &mut objects[idx];
            let center = obj.bounding_box.center();
            if let Some(id) = self.associate(&obj.label, center, now_ms, &claimed) {
                obj.id = id;
            }
            claimed.insert(obj.id.clone());
            obj.tracking = Some(self.observe(&obj.id, &obj.label, center.0, center.1, now_ms));
        }
    }

    pub fn get(&self, id: &str) -> Option<TrackingRecord> {
        self.tracks.get(id).map(Track::record)
    }

    /// Copy of every live record; changing it does not touch the tracker.
    pub fn snapshot(&self) -> HashMap<String, TrackingRecord> {
        self.tracks
            .iter()
            .map(|(id, t)| (id.clone(), t.record()))
            .collect()
    }
}
