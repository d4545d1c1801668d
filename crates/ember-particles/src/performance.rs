//! Frame-time tracking and adaptive particle-count scaling

use serde::Serialize;
use std::collections::VecDeque;

/// Frames kept in the FPS history
pub const FPS_HISTORY_LEN: usize = 60;

/// Weight of the newest frame in the smoothed frame time
const SMOOTHING: f64 = 0.1;

/// A frame this many times over target counts as dropped
const DROPPED_FRAME_RATIO: f64 = 1.5;

/// Below this fraction of target the controller recovers
const HEADROOM_RATIO: f64 = 0.8;

const DECAY: f64 = 0.95;
const RECOVERY: f64 = 1.05;

/// Snapshot reported to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub fps: f64,
    pub average_fps: f64,
    pub average_frame_ms: f64,
    pub target_frame_ms: f64,
    pub reduction_factor: f64,
    pub dropped_frames: u64,
    pub frames: u64,
    pub active_particles: usize,
    pub pooled_particles: usize,
}

pub struct PerformanceController {
    target_frame_ms: f64,
    adaptive: bool,
    min_factor: f64,
    fps_history: VecDeque<f64>,
    current_fps: f64,
    average_frame_ms: f64,
    reduction_factor: f64,
    dropped_frames: u64,
    frames: u64,
}

impl PerformanceController {
    pub fn new(target_frame_ms: f64, adaptive: bool, min_factor: f64) -> Self {
        Self {
            target_frame_ms,
            adaptive,
            min_factor: min_factor.clamp(0.0, 1.0),
            fps_history: VecDeque::with_capacity(FPS_HISTORY_LEN),
            current_fps: 1000.0 / target_frame_ms,
            average_frame_ms: target_frame_ms,
            reduction_factor: 1.0,
            dropped_frames: 0,
            frames: 0,
        }
    }

    /// Fold one real frame duration into the metrics and adjust the factor
    pub fn record_frame(&mut self, frame_ms: f64) {
        let frame_ms = frame_ms.max(f64::EPSILON);
        self.frames += 1;
        self.current_fps = 1000.0 / frame_ms;
        if self.fps_history.len() == FPS_HISTORY_LEN {
            self.fps_history.pop_front();
        }
        self.fps_history.push_back(self.current_fps);

        self.average_frame_ms = self.average_frame_ms * (1.0 - SMOOTHING) + frame_ms * SMOOTHING;
        if frame_ms > self.target_frame_ms * DROPPED_FRAME_RATIO {
            self.dropped_frames += 1;
        }

        if !self.adaptive {
            return;
        }
        let previous = self.reduction_factor;
        if self.average_frame_ms > self.target_frame_ms {
            self.reduction_factor *= DECAY;
        } else if self.average_frame_ms < self.target_frame_ms * HEADROOM_RATIO {
            self.reduction_factor *= RECOVERY;
        }
        self.reduction_factor = self.reduction_factor.clamp(self.min_factor, 1.0);
        if (previous - self.reduction_factor).abs() > 0.05 {
            tracing::debug!(
                factor = self.reduction_factor,
                average_frame_ms = self.average_frame_ms,
                "reduction factor moved"
            );
        }
    }

    /// Scale a requested particle count by the current factor.
    ///
    /// A positive request always yields at least one particle.
    pub fn scaled_count(&self, requested: u32) -> u32 {
        if requested == 0 {
            return 0;
        }
        ((requested as f64 * self.reduction_factor).floor() as u32).max(1)
    }

    pub fn reduction_factor(&self) -> f64 {
        self.reduction_factor
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    pub fn set_adaptive(&mut self, adaptive: bool) {
        self.adaptive = adaptive;
        if !adaptive {
            self.reduction_factor = 1.0;
        }
    }

    pub fn average_fps(&self) -> f64 {
        if self.fps_history.is_empty() {
            return self.current_fps;
        }
        self.fps_history.iter().sum::<f64>() / self.fps_history.len() as f64
    }

    pub fn metrics(&self, active_particles: usize, pooled_particles: usize) -> PerformanceMetrics {
        PerformanceMetrics {
            fps: self.current_fps,
            average_fps: self.average_fps(),
            average_frame_ms: self.average_frame_ms,
            target_frame_ms: self.target_frame_ms,
            reduction_factor: self.reduction_factor,
            dropped_frames: self.dropped_frames,
            frames: self.frames,
            active_particles,
            pooled_particles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TARGET: f64 = 1000.0 / 60.0;

    #[test]
    fn slow_frames_cut_the_factor() {
        let mut controller = PerformanceController::new(TARGET, true, 0.1);
        let mut frames_to_cut = None;
        for frame in 1..=60 {
            controller.record_frame(TARGET * 2.0);
            assert!(controller.reduction_factor() > 0.0);
            if frames_to_cut.is_none() && controller.reduction_factor() < 1.0 {
                frames_to_cut = Some(frame);
            }
        }
        // The smoothed average crosses the target within a handful of frames
        assert!(frames_to_cut.unwrap() <= 10);
        assert!(controller.reduction_factor() < 0.5);
        assert_eq!(controller.metrics(0, 0).dropped_frames, 60);
    }

    #[test]
    fn factor_floors_at_minimum() {
        let mut controller = PerformanceController::new(TARGET, true, 0.25);
        for _ in 0..1000 {
            controller.record_frame(TARGET * 4.0);
        }
        assert!((controller.reduction_factor() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn fast_frames_recover_but_never_amplify() {
        let mut controller = PerformanceController::new(TARGET, true, 0.1);
        for _ in 0..40 {
            controller.record_frame(TARGET * 3.0);
        }
        let degraded = controller.reduction_factor();
        for _ in 0..200 {
            controller.record_frame(TARGET * 0.25);
        }
        assert!(controller.reduction_factor() > degraded);
        assert_eq!(controller.reduction_factor(), 1.0);
    }

    #[test]
    fn non_adaptive_keeps_full_counts() {
        let mut controller = PerformanceController::new(TARGET, false, 0.1);
        for _ in 0..100 {
            controller.record_frame(TARGET * 5.0);
        }
        assert_eq!(controller.reduction_factor(), 1.0);
        assert_eq!(controller.scaled_count(20), 20);
    }

    #[test]
    fn scaled_count_floors_at_one() {
        let mut controller = PerformanceController::new(TARGET, true, 0.01);
        for _ in 0..500 {
            controller.record_frame(TARGET * 10.0);
        }
        assert_eq!(controller.scaled_count(10), 1);
        assert_eq!(controller.scaled_count(0), 0);
    }

    #[test]
    fn history_is_bounded_and_averaged() {
        let mut controller = PerformanceController::new(TARGET, true, 0.1);
        for _ in 0..(FPS_HISTORY_LEN + 20) {
            controller.record_frame(10.0);
        }
        let metrics = controller.metrics(7, 30);
        assert!((metrics.average_fps - 100.0).abs() < 1e-9);
        assert!((metrics.fps - 100.0).abs() < 1e-9);
        assert_eq!(metrics.frames, (FPS_HISTORY_LEN + 20) as u64);
        assert_eq!(metrics.active_particles, 7);
        assert_eq!(metrics.pooled_particles, 30);
    }

    proptest! {
        #[test]
        fn factor_stays_in_range(frames in proptest::collection::vec(0.1f64..200.0, 1..300)) {
            let mut controller = PerformanceController::new(TARGET, true, 0.1);
            for frame_ms in frames {
                controller.record_frame(frame_ms);
                let f = controller.reduction_factor();
                prop_assert!((0.1..=1.0).contains(&f));
            }
        }
    }
}
