//! Value-over-lifetime curves sampled by hosts at normalized age

use serde::{Deserialize, Serialize};

/// Linear interpolation between two floats
pub fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Linear interpolation between two RGBA colors
pub fn lerp_color(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        lerp_f32(a[0], b[0], t),
        lerp_f32(a[1], b[1], t),
        lerp_f32(a[2], b[2], t),
        lerp_f32(a[3], b[3], t),
    ]
}

/// Piecewise-linear scalar curve over normalized age `[0, 1]`.
///
/// Keys are `[t, value]` pairs and must be sorted by `t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub keys: Vec<[f32; 2]>,
}

impl Curve {
    pub fn constant(value: f32) -> Self {
        Self {
            keys: vec![[0.0, value]],
        }
    }

    pub fn linear(start: f32, end: f32) -> Self {
        Self {
            keys: vec![[0.0, start], [1.0, end]],
        }
    }

    /// Sample at `t`, clamping outside the keyed range
    pub fn sample(&self, t: f32) -> f32 {
        let Some(first) = self.keys.first() else {
            return 0.0;
        };
        if t <= first[0] {
            return first[1];
        }
        for pair in self.keys.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if t <= b[0] {
                let span = b[0] - a[0];
                if span <= f32::EPSILON {
                    return b[1];
                }
                return lerp_f32(a[1], b[1], (t - a[0]) / span);
            }
        }
        self.keys[self.keys.len() - 1][1]
    }
}

/// Evenly spaced RGBA stops over normalized age
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorGradient {
    pub stops: Vec<[f32; 4]>,
}

impl ColorGradient {
    pub fn sample(&self, t: f32) -> [f32; 4] {
        match self.stops.len() {
            0 => [1.0; 4],
            1 => self.stops[0],
            n => {
                let scaled = t.clamp(0.0, 1.0) * (n - 1) as f32;
                let idx = (scaled.floor() as usize).min(n - 2);
                lerp_color(self.stops[idx], self.stops[idx + 1], scaled - idx as f32)
            }
        }
    }
}

/// Optional per-effect animation handed to the host at spawn time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleAnimation {
    /// Scale multiplier over lifetime
    pub scale: Option<Curve>,
    pub opacity: Option<Curve>,
    pub color: Option<ColorGradient>,
    /// Spin in degrees per second
    pub rotation_speed: Option<f32>,
}
