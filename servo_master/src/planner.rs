//! Single-axis trapezoidal point-to-point planner for CSP mode.
//!
//! `init` lays out the profile once; `step(dt)` advances it by one cycle
//! and returns the commanded position. Positions are integrated with the
//! average of the velocities at both ends of the step, which is exact for
//! constant acceleration, so the deceleration ramp ends on the target
//! instead of stalling short of it.
//!
//! ```text
//!  v
//!  │    ┌──────────────┐   peak
//!  │   /                \
//!  │  /                  \
//!  │ /                    \
//!  └──────────────────────────── s
//!   start  accel_end  decel_start  target
//! ```

use thiserror::Error;

/// Boundaries closer than this, in counts, are treated as coincident.
const BOUNDARY_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Acceleration,
    ConstantVelocity,
    Deceleration,
    Completed,
}

/// Planner input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionParams {
    pub target_position: i32,
    pub max_velocity: u32,
    pub acceleration: u32,
    pub deceleration: u32,
    pub current_position: i32,
    pub current_velocity: i32,
}

/// Planner output for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionState {
    pub position: i32,
    pub velocity: i32,
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlannerError {
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

#[derive(Debug, Clone)]
pub struct TrapezoidalPlanner {
    phase: Phase,
    start: f64,
    target: f64,
    /// +1 or -1.
    direction: f64,
    position: f64,
    /// Speed along `direction`, never negative.
    speed: f64,
    peak: f64,
    acceleration: f64,
    deceleration: f64,
    accel_end: f64,
    decel_start: f64,
}

impl Default for TrapezoidalPlanner {
    fn default() -> Self {
        Self {
            phase: Phase::Completed,
            start: 0.0,
            target: 0.0,
            direction: 1.0,
            position: 0.0,
            speed: 0.0,
            peak: 0.0,
            acceleration: 0.0,
            deceleration: 0.0,
            accel_end: 0.0,
            decel_start: 0.0,
        }
    }
}

impl TrapezoidalPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lay out a new profile from the current position and velocity.
    pub fn init(&mut self, params: &MotionParams) -> Result<(), PlannerError> {
        if params.max_velocity == 0 {
            return Err(PlannerError::NotPositive("max_velocity"));
        }
        if params.acceleration == 0 {
            return Err(PlannerError::NotPositive("acceleration"));
        }
        if params.deceleration == 0 {
            return Err(PlannerError::NotPositive("deceleration"));
        }

        let start = f64::from(params.current_position);
        let target = f64::from(params.target_position);
        let v_max = f64::from(params.max_velocity);
        let a = f64::from(params.acceleration);
        let b = f64::from(params.deceleration);

        let distance = (target - start).abs();
        let direction = if target >= start { 1.0 } else { -1.0 };

        // Only motion towards the target carries over; a drive already
        // moving faster than it can stop is capped at the stopping speed.
        let stop_speed = (2.0 * b * distance).sqrt();
        let v0 = (f64::from(params.current_velocity) * direction)
            .clamp(0.0, v_max)
            .min(stop_speed);

        let accel_d = (v_max * v_max - v0 * v0) / (2.0 * a);
        let decel_d = v_max * v_max / (2.0 * b);
        let peak = if accel_d + decel_d > distance {
            ((2.0 * a * b * distance + b * v0 * v0) / (a + b)).sqrt()
        } else {
            v_max
        };

        let accel_d = ((peak * peak - v0 * v0) / (2.0 * a)).max(0.0);
        let decel_d = (peak * peak / (2.0 * b)).min(distance);
        let accel_d = accel_d.min(distance - decel_d);

        *self = Self {
            phase: Phase::Acceleration,
            start,
            target,
            direction,
            position: start,
            speed: v0,
            peak,
            acceleration: a,
            deceleration: b,
            accel_end: start + direction * accel_d,
            decel_start: target - direction * decel_d,
        };
        Ok(())
    }

    /// Distance travelled from `start` towards the target.
    fn along(&self, x: f64) -> f64 {
        (x - self.start) * self.direction
    }

    /// Advance by `dt` seconds.
    ///
    /// Time left over when a phase boundary is crossed carries into the
    /// next phase, so the commanded position never stalls at a boundary.
    pub fn step(&mut self, dt: f64) -> MotionState {
        if self.phase == Phase::Completed || dt <= 0.0 {
            return self.state();
        }

        let mut remaining = dt;
        while remaining > 0.0 && self.phase != Phase::Completed {
            remaining = match self.phase {
                Phase::Acceleration => self.accelerate(remaining),
                Phase::ConstantVelocity => self.cruise(remaining),
                Phase::Deceleration => self.decelerate(remaining),
                Phase::Completed => 0.0,
            };
        }

        self.state()
    }

    /// Returns the unused part of `dt`.
    fn accelerate(&mut self, dt: f64) -> f64 {
        let to_peak = (self.peak - self.speed) / self.acceleration;
        if to_peak > dt {
            let next = self.speed + self.acceleration * dt;
            self.advance((self.speed + next) * 0.5 * dt);
            self.speed = next;
            return 0.0;
        }
        if self.along(self.accel_end) > self.along(self.position) {
            self.position = self.accel_end;
        }
        self.speed = self.peak;
        // A reduced peak leaves no cruise segment.
        self.phase = if self.along(self.decel_start) - self.along(self.accel_end) > BOUNDARY_EPS {
            Phase::ConstantVelocity
        } else {
            Phase::Deceleration
        };
        dt - to_peak.max(0.0)
    }

    fn cruise(&mut self, dt: f64) -> f64 {
        let gap = (self.along(self.decel_start) - self.along(self.position)).max(0.0);
        let to_decel = if self.speed > 0.0 { gap / self.speed } else { 0.0 };
        if to_decel > dt {
            self.advance(self.speed * dt);
            return 0.0;
        }
        if self.along(self.decel_start) > self.along(self.position) {
            self.position = self.decel_start;
        }
        self.phase = Phase::Deceleration;
        dt - to_decel
    }

    fn decelerate(&mut self, dt: f64) -> f64 {
        let to_stop = self.speed / self.deceleration;
        if to_stop <= dt {
            self.finish();
            return 0.0;
        }
        let next = self.speed - self.deceleration * dt;
        self.advance((self.speed + next) * 0.5 * dt);
        self.speed = next;
        if self.along(self.position) >= self.along(self.target) {
            self.finish();
        }
        0.0
    }

    fn advance(&mut self, distance: f64) {
        self.position += self.direction * distance;
    }

    fn finish(&mut self) {
        self.position = self.target;
        self.speed = 0.0;
        self.phase = Phase::Completed;
    }

    pub fn state(&self) -> MotionState {
        MotionState {
            position: self.position.round() as i32,
            velocity: (self.direction * self.speed).round() as i32,
            is_completed: self.phase == Phase::Completed,
        }
    }

    /// Commanded position before rounding to counts.
    pub fn exact_position(&self) -> f64 {
        self.position
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    /// Peak velocity after the short-move reduction.
    pub fn peak_velocity(&self) -> f64 {
        self.peak
    }

    pub fn accel_end_position(&self) -> f64 {
        self.accel_end
    }

    pub fn decel_start_position(&self) -> f64 {
        self.decel_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.0005;

    fn params(current: i32, target: i32) -> MotionParams {
        MotionParams {
            target_position: target,
            max_velocity: 10_000,
            acceleration: 10_000,
            deceleration: 10_000,
            current_position: current,
            current_velocity: 0,
        }
    }

    /// Phases in the order they were first seen, one entry per change.
    fn phase_sequence(planner: &mut TrapezoidalPlanner, limit: usize) -> Vec<Phase> {
        let mut seen = vec![planner.phase()];
        for _ in 0..limit {
            planner.step(DT);
            if seen.last() != Some(&planner.phase()) {
                seen.push(planner.phase());
            }
            if planner.is_completed() {
                break;
            }
        }
        seen
    }

    fn run_to_completion(planner: &mut TrapezoidalPlanner, limit: usize) -> (usize, Vec<MotionState>) {
        let mut trace = Vec::new();
        for i in 1..=limit {
            let s = planner.step(DT);
            trace.push(s);
            if s.is_completed {
                return (i, trace);
            }
        }
        panic!("planner did not complete within {limit} steps");
    }

    #[test]
    fn long_move_reaches_full_velocity() {
        let mut p = TrapezoidalPlanner::new();
        p.init(&params(0, 100_000)).unwrap();
        assert_eq!(p.peak_velocity(), 10_000.0);
        assert_eq!(p.accel_end_position(), 5_000.0);
        assert_eq!(p.decel_start_position(), 95_000.0);

        let (_, trace) = run_to_completion(&mut p, 100_000);
        let top = trace.iter().map(|s| s.velocity).max().unwrap();
        assert_eq!(top, 10_000);
        let last = trace.last().unwrap();
        assert_eq!(last.position, 100_000);
        assert_eq!(last.velocity, 0);
    }

    #[test]
    fn long_move_runs_every_phase_in_order() {
        let mut p = TrapezoidalPlanner::new();
        p.init(&params(0, 100_000)).unwrap();
        assert_eq!(
            phase_sequence(&mut p, 100_000),
            [
                Phase::Acceleration,
                Phase::ConstantVelocity,
                Phase::Deceleration,
                Phase::Completed
            ]
        );
    }

    #[test]
    fn short_move_skips_cruise() {
        let mut p = TrapezoidalPlanner::new();
        p.init(&params(0, 50)).unwrap();
        assert_eq!(
            phase_sequence(&mut p, 10_000),
            [Phase::Acceleration, Phase::Deceleration, Phase::Completed]
        );
    }

    #[test]
    fn short_move_keeps_moving_through_the_peak() {
        let mut p = TrapezoidalPlanner::new();
        p.init(&params(0, 50)).unwrap();
        let mut prev = p.exact_position();
        while !p.is_completed() {
            let s = p.step(DT);
            assert_ne!(p.phase(), Phase::ConstantVelocity);
            if !s.is_completed {
                assert!(p.exact_position() > prev, "stalled at {prev}");
            }
            prev = p.exact_position();
        }
    }

    #[test]
    fn boundary_crossing_carries_leftover_time() {
        let mut p = TrapezoidalPlanner::new();
        p.init(&params(0, 100_000)).unwrap();
        // 10 ms steps: the ramp has 10 ms left after 99 of them.
        for _ in 0..99 {
            p.step(0.01);
        }
        assert_eq!(p.phase(), Phase::Acceleration);
        let s = p.step(0.015);
        assert_eq!(p.phase(), Phase::ConstantVelocity);
        assert!((p.exact_position() - 5_050.0).abs() < 1e-6);
        assert_eq!(s.velocity, 10_000);
    }

    #[test]
    fn short_move_reduces_peak() {
        let mut p = TrapezoidalPlanner::new();
        p.init(&params(0, 50)).unwrap();
        let expected = (2.0 * 50.0 * 10_000.0 * 10_000.0 / 20_000.0f64).sqrt();
        assert!((p.peak_velocity() - expected).abs() < 1e-9);
        assert!(p.peak_velocity() < 10_000.0);
        assert!(p.accel_end_position() <= p.decel_start_position() + 1e-9);

        let (_, trace) = run_to_completion(&mut p, 10_000);
        assert!(trace.iter().all(|s| s.velocity as f64 <= expected.ceil()));
        assert_eq!(trace.last().unwrap().position, 50);
    }

    #[test]
    fn negative_direction() {
        let mut p = TrapezoidalPlanner::new();
        p.init(&params(1_000, -3_000)).unwrap();
        let (_, trace) = run_to_completion(&mut p, 100_000);
        assert!(trace.iter().all(|s| s.velocity <= 0));
        assert!(trace.windows(2).all(|w| w[1].position <= w[0].position));
        assert_eq!(trace.last().unwrap().position, -3_000);
    }

    #[test]
    fn zero_distance_completes_quickly() {
        let mut p = TrapezoidalPlanner::new();
        p.init(&params(42, 42)).unwrap();
        let (steps, trace) = run_to_completion(&mut p, 10);
        assert!(steps <= 3);
        assert_eq!(trace.last().unwrap().position, 42);
    }

    #[test]
    fn completed_is_idempotent() {
        let mut p = TrapezoidalPlanner::new();
        p.init(&params(0, 10)).unwrap();
        run_to_completion(&mut p, 10_000);
        let done = p.state();
        for _ in 0..5 {
            assert_eq!(p.step(DT), done);
        }
        assert_eq!(p.phase(), Phase::Completed);
    }

    #[test]
    fn rejects_non_positive_limits() {
        let mut p = TrapezoidalPlanner::new();
        let mut bad = params(0, 10);
        bad.acceleration = 0;
        assert_eq!(p.init(&bad), Err(PlannerError::NotPositive("acceleration")));
        bad.acceleration = 1;
        bad.max_velocity = 0;
        assert_eq!(p.init(&bad), Err(PlannerError::NotPositive("max_velocity")));
    }

    #[test]
    fn moving_start_keeps_velocity_continuous() {
        let mut p = TrapezoidalPlanner::new();
        let mut m = params(0, 100_000);
        m.current_velocity = 4_000;
        p.init(&m).unwrap();
        let first = p.step(DT);
        assert!(first.velocity >= 4_000);
        let (_, trace) = run_to_completion(&mut p, 100_000);
        assert_eq!(trace.last().unwrap().position, 100_000);
    }

    #[test]
    fn opposite_start_velocity_is_ignored() {
        let mut p = TrapezoidalPlanner::new();
        let mut m = params(0, 1_000);
        m.current_velocity = -5_000;
        p.init(&m).unwrap();
        assert_eq!(p.state().velocity, 0);
    }

    #[test]
    fn default_planner_is_idle() {
        let mut p = TrapezoidalPlanner::default();
        assert!(p.is_completed());
        assert_eq!(p.step(DT), MotionState { position: 0, velocity: 0, is_completed: true });
    }
}
