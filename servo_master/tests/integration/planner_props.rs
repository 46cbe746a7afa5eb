//! Property tests for the CSP trapezoidal planner.

use proptest::prelude::*;
use servo_master::planner::{MotionParams, MotionState, Phase, TrapezoidalPlanner};

const DT: f64 = 0.001;

fn profile() -> impl Strategy<Value = MotionParams> {
    (
        -20_000i32..20_000,
        -20_000i32..20_000,
        500u32..50_000,
        1_000u32..100_000,
        1_000u32..100_000,
    )
        .prop_map(|(current, target, v, a, b)| MotionParams {
            target_position: target,
            max_velocity: v,
            acceleration: a,
            deceleration: b,
            current_position: current,
            current_velocity: 0,
        })
}

/// Generous step budget: cruise time plus both ramps, padded.
fn step_budget(p: &MotionParams) -> usize {
    let distance = f64::from(p.target_position.abs_diff(p.current_position));
    let v = f64::from(p.max_velocity);
    let seconds = distance / v + v / f64::from(p.acceleration) + v / f64::from(p.deceleration);
    // Short moves cruise slower than `v`; bound them by the triangle time.
    let triangle = 2.0 * (2.0 * distance / f64::from(p.acceleration.min(p.deceleration))).sqrt();
    ((seconds + triangle) / DT * 1.5) as usize + 10
}

fn play(p: &MotionParams) -> (TrapezoidalPlanner, Vec<MotionState>) {
    let mut planner = TrapezoidalPlanner::new();
    planner.init(p).unwrap();
    let mut trace = Vec::new();
    for _ in 0..step_budget(p) {
        let s = planner.step(DT);
        trace.push(s);
        if s.is_completed {
            break;
        }
    }
    (planner, trace)
}

proptest! {
    #[test]
    fn converges_on_target(p in profile()) {
        let (planner, trace) = play(&p);
        prop_assert!(planner.is_completed(), "no completion within {} steps", trace.len());
        let last = trace.last().unwrap();
        prop_assert_eq!(last.position, p.target_position);
        prop_assert_eq!(last.velocity, 0);
    }

    #[test]
    fn never_exceeds_velocity_limit(p in profile()) {
        let (planner, trace) = play(&p);
        prop_assert!(planner.peak_velocity() <= f64::from(p.max_velocity) + 1e-9);
        let limit = i64::from(p.max_velocity);
        for s in &trace {
            prop_assert!(i64::from(s.velocity).abs() <= limit);
        }
    }

    #[test]
    fn position_is_monotonic(p in profile()) {
        let (_, trace) = play(&p);
        let forward = p.target_position >= p.current_position;
        let mut prev = p.current_position;
        for s in &trace {
            if forward {
                prop_assert!(s.position >= prev);
            } else {
                prop_assert!(s.position <= prev);
            }
            prev = s.position;
        }
    }

    #[test]
    fn position_advances_while_moving(p in profile()) {
        let mut planner = TrapezoidalPlanner::new();
        planner.init(&p).unwrap();
        let direction = if p.target_position >= p.current_position { 1.0 } else { -1.0 };
        for _ in 0..step_budget(&p) {
            let before = planner.exact_position();
            let s = planner.step(DT);
            if s.is_completed {
                break;
            }
            if s.velocity.abs() > 1 {
                let moved = (planner.exact_position() - before) * direction;
                prop_assert!(moved > 0.0, "stalled at {} in {:?}", before, planner.phase());
            }
        }
        prop_assert!(planner.is_completed());
    }

    #[test]
    fn completed_profile_stays_put(p in profile(), extra in 1usize..20) {
        let (mut planner, trace) = play(&p);
        let done = *trace.last().unwrap();
        for _ in 0..extra {
            prop_assert_eq!(planner.step(DT), done);
        }
        prop_assert_eq!(planner.phase(), Phase::Completed);
    }

    #[test]
    fn moving_start_still_lands(p in profile(), v0 in 0i32..50_000) {
        let direction = if p.target_position >= p.current_position { 1 } else { -1 };
        let p = MotionParams { current_velocity: v0 * direction, ..p };
        let (planner, trace) = play(&p);
        prop_assert!(planner.is_completed());
        prop_assert_eq!(trace.last().unwrap().position, p.target_position);
    }
}
