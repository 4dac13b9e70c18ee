use std::collections::VecDeque;

use crate::config::SmoothingParams;
use crate::radar::{TrackId, TrackRegistry};

/// Fixed-capacity FIFO of the most recent raw RMS values.
///
/// Starts zero-filled and always holds exactly `capacity` entries; each push
/// evicts the oldest value.
#[derive(Debug, Clone, PartialEq)]
pub struct RmsWindow {
    values: VecDeque<f32>,
    capacity: usize,
}

impl RmsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut values = VecDeque::with_capacity(capacity);
        values.resize(capacity, 0.0);
        Self { values, capacity }
    }

    pub fn push(&mut self, value: f32) {
        self.values.pop_front();
        self.values.push_back(value);
    }

    /// Largest value currently in the window
    pub fn max(&self) -> f32 {
        self.values.iter().fold(0.0f32, |a, &b| a.max(b))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.values.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.iter().collect()
    }

    pub fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Asymmetric attack/decay filter turning raw per-frame RMS into a visual
/// intensity.
///
/// A louder input pulls the envelope up quickly. Otherwise the envelope relaxes
/// slowly toward the loudest value of the recent window rather than toward
/// the current input, which gives a VU-meter style fall-off and keeps short
/// gaps in percussive material from collapsing the visual.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeSmoother {
    params: SmoothingParams,
}

impl EnvelopeSmoother {
    pub fn new(params: SmoothingParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SmoothingParams {
        &self.params
    }

    /// A window sized for these parameters
    pub fn new_window(&self) -> RmsWindow {
        RmsWindow::new(self.params.window_size)
    }

    /// Advance the envelope by one raw value and return the new intensity.
    ///
    /// `raw` is pushed into `window` first, so the decay target includes it.
    pub fn step(&self, window: &mut RmsWindow, smoothed: f32, raw: f32) -> f32 {
        window.push(raw);
        let window_max = window.max();

        let next = if raw > smoothed {
            smoothed + self.params.attack * (raw - smoothed)
        } else {
            smoothed + self.params.decay * (window_max - smoothed)
        };

        next.clamp(0.0, 1.0)
    }

    /// Smooth `raw` into the registry entry for `id`.
    ///
    /// Writes both the raw and smoothed values. Returns the new intensity, or
    /// `None` when the track is no longer registered.
    pub fn apply(&self, registry: &mut TrackRegistry, id: TrackId, raw: f32) -> Option<f32> {
        let track = registry.track_mut(id)?;
        Some(track.record_rms(raw, self))
    }
}

impl Default for EnvelopeSmoother {
    fn default() -> Self {
        Self::new(SmoothingParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RadarConfig;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    /// Deterministic pseudo-random values in [0, 1]
    fn xorshift_levels(seed: u32, count: usize) -> Vec<f32> {
        let mut state = seed.max(1);
        (0..count)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state % 10_001) as f32 / 10_000.0
            })
            .collect()
    }

    #[test]
    fn test_window_starts_zeroed_and_full() {
        let window = RmsWindow::new(30);
        assert_eq!(window.len(), 30);
        assert!(window.iter().all(|v| v == 0.0));
        assert_eq!(window.max(), 0.0);
    }

    #[test]
    fn test_window_fifo_after_overflow() {
        let mut window = RmsWindow::new(30);
        let pushed: Vec<f32> = (0..37).map(|i| i as f32 / 100.0).collect();
        for &v in &pushed {
            window.push(v);
            assert_eq!(window.len(), 30);
        }
        assert_eq!(window.to_vec(), pushed[7..].to_vec());
        assert!(approx(window.max(), 0.36));
    }

    #[test]
    fn test_window_clear_keeps_length() {
        let mut window = RmsWindow::new(4);
        window.push(0.9);
        window.clear();
        assert_eq!(window.to_vec(), vec![0.0; 4]);
    }

    #[test]
    fn test_first_attack_step_from_silence() {
        let smoother = EnvelopeSmoother::default();
        let mut window = smoother.new_window();
        let mut s = 0.0;
        for _ in 0..29 {
            s = smoother.step(&mut window, s, 0.0);
            assert_eq!(s, 0.0);
        }
        s = smoother.step(&mut window, s, 0.8);
        assert!(approx(s, 0.24), "expected 0.24, got {}", s);
    }

    #[test]
    fn test_decay_targets_window_peak() {
        let smoother = EnvelopeSmoother::default();
        let mut window = smoother.new_window();
        window.push(0.9);

        let s = smoother.step(&mut window, 0.5, 0.0);
        assert!(approx(s, 0.502), "expected 0.502, got {}", s);
    }

    #[test]
    fn test_decay_falls_when_window_is_quieter() {
        let smoother = EnvelopeSmoother::default();
        let mut window = smoother.new_window();
        window.push(0.2);

        let s = smoother.step(&mut window, 0.5, 0.1);
        assert!(s < 0.5);
        assert!(approx(s, 0.5 + 0.005 * (0.2 - 0.5)));
    }

    #[test]
    fn test_attack_never_overshoots() {
        let smoother = EnvelopeSmoother::default();
        let mut window = smoother.new_window();
        let mut s = 0.0;
        for _ in 0..200 {
            let next = smoother.step(&mut window, s, 0.7);
            if s < 0.7 {
                assert!(next > s || approx(next, 0.7));
                assert!(next <= 0.7 + 1e-6);
            }
            s = next;
        }
        assert!(approx(s, 0.7));
    }

    #[test]
    fn test_intensity_stays_in_unit_range() {
        let smoother = EnvelopeSmoother::default();
        let mut window = smoother.new_window();
        let mut s = 0.0;
        for raw in xorshift_levels(0x5eed, 5_000) {
            s = smoother.step(&mut window, s, raw);
            assert!((0.0..=1.0).contains(&s));
        }

        // Aggressive parameters still respect the clamp
        let wild = EnvelopeSmoother::new(SmoothingParams {
            window_size: 3,
            attack: 1.0,
            decay: 1.0,
        });
        let mut window = wild.new_window();
        let mut s = 0.0;
        for raw in xorshift_levels(42, 1_000) {
            s = wild.step(&mut window, s, raw);
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn test_apply_writes_registry_and_ignores_unknown() {
        let config = RadarConfig::default();
        let mut registry = TrackRegistry::new(&config);
        let smoother = EnvelopeSmoother::new(config.smoothing);
        let id = registry.register();

        let intensity = smoother.apply(&mut registry, id, 0.8).unwrap();
        assert!(approx(intensity, 0.24));
        let track = registry.get(id).unwrap();
        assert_eq!(track.raw_rms(), 0.8);
        assert!(approx(track.intensity(), 0.24));
        assert_eq!(track.rms_window().max(), 0.8);

        assert!(registry.unregister(id));
        assert_eq!(smoother.apply(&mut registry, id, 0.5), None);
        assert!(registry.get(id).is_none());
    }
}
