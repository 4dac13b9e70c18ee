use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

use super::Track;

/// Resultant of all tracks' weighted directions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    /// Radians in (-PI, PI]
    pub angle: f32,
    /// Length of the resultant, clamped to the configured ceiling
    pub magnitude: f32,
    /// Sum of the weights that went into the resultant
    pub total_weight: f32,
}

impl Direction {
    /// Pointing along angle 0 with no length
    pub const NEUTRAL: Direction = Direction {
        angle: 0.0,
        magnitude: 0.0,
        total_weight: 0.0,
    };

    /// Resultant as a vector, using the clamped magnitude
    pub fn to_vec2(&self) -> Vec2 {
        Vec2::from_angle(self.angle) * self.magnitude
    }
}

/// Weighted circular mean of every track, weight = intensity * radius.
///
/// `None` when nothing contributes (all weights zero) or when the
/// contributions cancel out, e.g. two equal tracks on opposite sides.
pub fn aggregate_direction<'a, I>(tracks: I, max_magnitude: f32) -> Option<Direction>
where
    I: IntoIterator<Item = &'a Track>,
{
    resultant(tracks.into_iter().map(|t| (t.weight(), t.angle())), max_magnitude)
}

/// Same as [`aggregate_direction`] over raw `(weight, angle)` pairs.
pub fn resultant<I>(contributions: I, max_magnitude: f32) -> Option<Direction>
where
    I: IntoIterator<Item = (f32, f32)>,
{
    let mut sum = Vec2::ZERO;
    let mut total_weight = 0.0f32;

    for (weight, angle) in contributions {
        if !(weight.is_finite() && angle.is_finite()) || weight <= 0.0 {
            continue;
        }
        sum += Vec2::from_angle(angle) * weight;
        total_weight += weight;
    }

    if !(total_weight > 0.0 && total_weight.is_finite()) {
        return None;
    }

    // Opposing tracks leave float dust rather than an exact zero.
    let length = sum.length();
    if length <= total_weight * 1e-5 {
        return None;
    }

    Some(Direction {
        angle: sum.y.atan2(sum.x),
        magnitude: length.min(max_magnitude),
        total_weight,
    })
}

/// Shortest-arc interpolation between two angles.
pub fn lerp_angle(current: f32, target: f32, factor: f32) -> f32 {
    let delta = (target - current + PI).rem_euclid(TAU) - PI;
    wrap_angle(current + delta * factor)
}

/// Map any angle into (-PI, PI].
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Indicator state for the "average" arrow.
///
/// Holds the last defined direction while the estimate is undefined and eases
/// toward new estimates.
#[derive(Debug, Clone, Copy)]
pub struct DirectionTracker {
    current: Direction,
    factor: f32,
}

impl DirectionTracker {
    /// `factor` of 1.0 snaps to each new estimate
    pub fn new(factor: f32) -> Self {
        Self {
            current: Direction::NEUTRAL,
            factor: factor.clamp(0.0, 1.0),
        }
    }

    pub fn update(&mut self, estimate: Option<Direction>) -> Direction {
        if let Some(target) = estimate {
            let f = self.factor;
            self.current = Direction {
                angle: lerp_angle(self.current.angle, target.angle, f),
                magnitude: self.current.magnitude + (target.magnitude - self.current.magnitude) * f,
                total_weight: target.total_weight,
            };
        }
        self.current
    }

    pub fn current(&self) -> Direction {
        self.current
    }
}

impl Default for DirectionTracker {
    fn default() -> Self {
        Self::new(1.0)
    }
}
