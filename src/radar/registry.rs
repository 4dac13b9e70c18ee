use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::audio::{EnvelopeSmoother, RmsWindow};
use crate::config::RadarConfig;

/// Identifier for a track, handed out by the registry.
///
/// Serialized as `"track-<n>"` so consumers see a stable string key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

impl FromStr for TrackId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = s
            .strip_prefix("track-")
            .ok_or_else(|| anyhow::anyhow!("Track id must look like track-<n>, got {:?}", s))?;
        Ok(TrackId(n.parse()?))
    }
}

impl From<TrackId> for String {
    fn from(id: TrackId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for TrackId {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// One audio source placed on the dial.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: TrackId,
    raw_rms: f32,
    intensity: f32,
    rms_window: RmsWindow,
    angle: f32,
    radius: f32,
    is_playing: bool,
}

impl Track {
    fn new(id: TrackId, window_size: usize, radius: f32) -> Self {
        Self {
            id,
            raw_rms: 0.0,
            intensity: 0.0,
            rms_window: RmsWindow::new(window_size),
            angle: 0.0,
            radius,
            is_playing: false,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    /// Last instantaneous RMS, in [0, 1]
    pub fn raw_rms(&self) -> f32 {
        self.raw_rms
    }

    /// Smoothed intensity, in [0, 1]
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn rms_window(&self) -> &RmsWindow {
        &self.rms_window
    }

    /// Direction on the dial, radians
    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Contribution weight to the aggregate direction
    pub fn weight(&self) -> f32 {
        self.intensity * self.radius
    }

    pub(crate) fn record_rms(&mut self, raw: f32, smoother: &EnvelopeSmoother) -> f32 {
        if !raw.is_finite() {
            return self.intensity;
        }
        let raw = raw.clamp(0.0, 1.0);
        self.intensity = smoother.step(&mut self.rms_window, self.intensity, raw);
        self.raw_rms = raw;
        self.intensity
    }

    fn clear_envelope(&mut self) {
        self.raw_rms = 0.0;
        self.intensity = 0.0;
        self.rms_window.clear();
    }
}

/// Partial update from the UI side; `None` fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackUpdate {
    pub angle: Option<f32>,
    pub radius: Option<f32>,
    pub is_playing: Option<bool>,
}

impl TrackUpdate {
    pub fn angle(angle: f32) -> Self {
        Self {
            angle: Some(angle),
            ..Self::default()
        }
    }

    pub fn radius(radius: f32) -> Self {
        Self {
            radius: Some(radius),
            ..Self::default()
        }
    }

    pub fn playing(is_playing: bool) -> Self {
        Self {
            is_playing: Some(is_playing),
            ..Self::default()
        }
    }
}

/// The single authoritative store of per-track state.
///
/// Writes for an id that is not (or no longer) registered are silent no-ops;
/// late messages from a torn-down chain land here and must not resurrect the
/// track.
pub struct TrackRegistry {
    tracks: HashMap<TrackId, Track>,
    next_id: u32,
    window_size: usize,
    default_radius: f32,
    max_radius: f32,
}

impl TrackRegistry {
    pub fn new(config: &RadarConfig) -> Self {
        Self {
            tracks: HashMap::new(),
            next_id: 0,
            window_size: config.smoothing.window_size,
            default_radius: config.default_radius.clamp(0.0, config.max_radius),
            max_radius: config.max_radius,
        }
    }

    /// Create a zeroed track and return its fresh id. Ids are never reused.
    pub fn register(&mut self) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks
            .insert(id, Track::new(id, self.window_size, self.default_radius));
        id
    }

    /// Returns false if the id was unknown.
    pub fn unregister(&mut self, id: TrackId) -> bool {
        self.tracks.remove(&id).is_some()
    }

    /// Merge `update` into the track. Returns false if the id was unknown.
    pub fn update(&mut self, id: TrackId, update: TrackUpdate) -> bool {
        let max_radius = self.max_radius;
        let Some(track) = self.tracks.get_mut(&id) else {
            return false;
        };

        if let Some(angle) = update.angle.filter(|a| a.is_finite()) {
            track.angle = angle;
        }
        if let Some(radius) = update.radius.filter(|r| r.is_finite()) {
            track.radius = radius.clamp(0.0, max_radius);
        }
        if let Some(is_playing) = update.is_playing {
            track.is_playing = is_playing;
        }
        true
    }

    /// Dial placement as set by dragging or the sliders.
    pub fn set_angle_and_radius(&mut self, id: TrackId, angle: f32, radius: f32) -> bool {
        self.update(
            id,
            TrackUpdate {
                angle: Some(angle),
                radius: Some(radius),
                is_playing: None,
            },
        )
    }

    pub fn set_all_playing(&mut self, is_playing: bool) {
        for track in self.tracks.values_mut() {
            track.is_playing = is_playing;
        }
    }

    /// Stop every track and return its envelope to the zeroed state.
    /// Placement on the dial is kept.
    pub fn reset_all(&mut self) {
        for track in self.tracks.values_mut() {
            track.is_playing = false;
            track.clear_envelope();
        }
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub(crate) fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.tracks.contains_key(&id)
    }

    /// Owned copy of every track, ordered by id. Mutating the copies never
    /// touches the registry.
    pub fn get_all(&self) -> Vec<Track> {
        let mut tracks: Vec<Track> = self.tracks.values().cloned().collect();
        tracks.sort_by_key(|t| t.id);
        tracks
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn ids(&self) -> Vec<TrackId> {
        let mut ids: Vec<TrackId> = self.tracks.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
