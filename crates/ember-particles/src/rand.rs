//! Lightweight xorshift32 PRNG for emission sampling

use ember_core::Vec3;

/// Deterministic per-emitter random source.
///
/// Seeded explicitly so a simulation replays identically across runs.
pub struct ParticleRng {
    state: u32,
}

impl ParticleRng {
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Returns a float in [0, 1)
    pub fn next_f32(&mut self) -> f32 {
        // 24 high bits keep the result strictly below 1.0
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Returns a float in [min, max)
    pub fn range(&mut self, min: f32, max: f32) -> f32 {
        min + self.next_f32() * (max - min)
    }

    /// Returns a random unit direction vector (uniformly on sphere surface)
    pub fn random_direction(&mut self) -> Vec3 {
        // Marsaglia method for uniform sphere sampling
        loop {
            let x = self.range(-1.0, 1.0);
            let y = self.range(-1.0, 1.0);
            let s = x * x + y * y;
            if s < 1.0 {
                let factor = 2.0 * (1.0 - s).sqrt();
                return Vec3::new(x * factor, y * factor, 1.0 - 2.0 * s);
            }
        }
    }

    /// Returns a direction within a cone around `base_dir` with half-angle `angle_deg`.
    ///
    /// `None` as the base direction, or a spread of 180° or more, samples the
    /// full sphere.
    pub fn cone_direction(&mut self, base_dir: Option<Vec3>, angle_deg: f32) -> Vec3 {
        let Some(base_dir) = base_dir else {
            return self.random_direction();
        };
        if angle_deg >= 180.0 {
            return self.random_direction();
        }
        if angle_deg <= 0.0 {
            return normalize(base_dir);
        }

        let cos_angle = angle_deg.to_radians().cos();

        // Uniform cos_theta in [cos_angle, 1], uniform phi in [0, 2pi]
        let cos_theta = self.range(cos_angle, 1.0);
        let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
        let phi = self.range(0.0, std::f32::consts::TAU);

        // Local direction in cone around +Z
        let local = Vec3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta);

        rotate_to_basis(base_dir, local)
    }
}

/// Rotates `local` (assumed around +Z) to align with `forward`
fn rotate_to_basis(forward: Vec3, local: Vec3) -> Vec3 {
    let fwd = normalize(forward);
    let up = if fwd.y.abs() > 0.99 {
        Vec3::new(1.0, 0.0, 0.0)
    } else {
        Vec3::UP
    };
    let right = normalize(up.cross(&fwd));
    let actual_up = fwd.cross(&right);

    right * local.x + actual_up * local.y + fwd * local.z
}

fn normalize(v: Vec3) -> Vec3 {
    if v.length_squared() < 1e-20 {
        return Vec3::UP;
    }
    v.normalized()
}
