use std::time::{Duration, Instant};

use glam::Vec2;

use crate::processing::layout::Rect;

/// Angular speed of the synthetic pointer, radians per millisecond.
pub const IDLE_ANGULAR_SPEED: f64 = 0.001;

/// What the simulator decided on a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IdleTick {
    /// Real input is recent (or idling is off); show the cursor.
    Inactive,
    /// Feed this synthetic pointer position and hide the cursor.
    Simulated(Vec2),
}

/// Moves a synthetic pointer around an ellipse once real input has been
/// absent for `after`.
#[derive(Debug, Clone)]
pub struct IdleMotionSimulator {
    enabled: bool,
    after: Duration,
    last_input: Instant,
    epoch: Instant,
}

impl IdleMotionSimulator {
    pub fn new(enabled: bool, after: Duration, now: Instant) -> Self {
        Self {
            enabled,
            after,
            last_input: now,
            epoch: now,
        }
    }

    /// Records real pointer activity. Synthetic positions must not call this.
    pub fn note_input(&mut self, now: Instant) {
        self.last_input = now;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_after(&mut self, after: Duration) {
        self.after = after;
    }

    pub fn after(&self) -> Duration {
        self.after
    }

    pub fn tick(&self, container: Rect, now: Instant) -> IdleTick {
        if !self.enabled || now.saturating_duration_since(self.last_input) <= self.after {
            return IdleTick::Inactive;
        }
        let elapsed_ms = now.saturating_duration_since(self.epoch).as_secs_f64() * 1000.0;
        IdleTick::Simulated(ellipse_point(container, elapsed_ms * IDLE_ANGULAR_SPEED))
    }
}

/// Point at `angle` on the idle ellipse centred in `container`. The radii
/// start at a quarter of each side and are then matched to the container
/// aspect from the longer side.
pub fn ellipse_point(container: Rect, angle: f64) -> Vec2 {
    let w = container.width as f64;
    let h = container.height as f64;
    let cx = container.x as f64 + w / 2.0;
    let cy = container.y as f64 + h / 2.0;
    let mut rx = w / 4.0;
    let mut ry = h / 4.0;
    if w > h {
        ry = rx * (h / w);
    } else if h > 0.0 {
        rx = ry * (w / h);
    }
    Vec2::new(
        (cx + angle.cos() * rx) as f32,
        (cy + angle.sin() * ry) as f32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_inactive_until_threshold_passes() {
        let t0 = Instant::now();
        let sim = IdleMotionSimulator::new(true, Duration::from_millis(3000), t0);
        let rect = Rect::new(0.0, 0.0, 800.0, 600.0);
        assert_eq!(sim.tick(rect, t0 + Duration::from_millis(3000)), IdleTick::Inactive);
        assert!(matches!(
            sim.tick(rect, t0 + Duration::from_millis(3001)),
            IdleTick::Simulated(_)
        ));
    }

    #[test]
    fn real_input_resets_timer() {
        let t0 = Instant::now();
        let mut sim = IdleMotionSimulator::new(true, Duration::from_secs(1), t0);
        sim.note_input(t0 + Duration::from_secs(5));
        let rect = Rect::new(0.0, 0.0, 100.0, 100.0);
        assert_eq!(sim.tick(rect, t0 + Duration::from_millis(5500)), IdleTick::Inactive);
    }

    #[test]
    fn disabled_never_simulates() {
        let t0 = Instant::now();
        let sim = IdleMotionSimulator::new(false, Duration::ZERO, t0);
        let rect = Rect::new(0.0, 0.0, 100.0, 100.0);
        assert_eq!(sim.tick(rect, t0 + Duration::from_secs(60)), IdleTick::Inactive);
    }

    #[test]
    fn landscape_ellipse_matches_aspect() {
        let rect = Rect::new(0.0, 0.0, 800.0, 400.0);
        let right = ellipse_point(rect, 0.0);
        assert!((right.x - 600.0).abs() < 1e-3);
        assert!((right.y - 200.0).abs() < 1e-3);
        let bottom = ellipse_point(rect, std::f64::consts::FRAC_PI_2);
        assert!((bottom.x - 400.0).abs() < 1e-3);
        assert!((bottom.y - 300.0).abs() < 1e-3);
    }

    #[test]
    fn portrait_ellipse_matches_aspect() {
        let rect = Rect::new(10.0, 0.0, 300.0, 600.0);
        let right = ellipse_point(rect, 0.0);
        assert!((right.x - (160.0 + 75.0)).abs() < 1e-3);
    }
}
