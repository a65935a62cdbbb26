//! GLONASS position propagation: 4th-order Runge-Kutta integration of the
//! ECEF equations of motion with a J2 + Coriolis force model, ported from
//! `t_ephGlo::position`/`glo_deriv` (spec §4.5).

use nalgebra::Vector3;

use crate::time::GnssTime;

const GM_WGS: f64 = 398.60044e12;
const AE: f64 = 6_378_136.0;
const OMEGA: f64 = 7292115.0e-11;
const C20: f64 = -1082.6257e-6;
const NOMINAL_STEP_S: f64 = 10.0;

/// Position + velocity state vector integrated by [`propagate`].
#[derive(Debug, Clone, Copy)]
pub struct State {
    pub position_m: Vector3<f64>,
    pub velocity_m_s: Vector3<f64>,
}

fn derivative(state: State, acceleration_m_s2: Vector3<f64>) -> State {
    let rr = state.position_m;
    let vv = state.velocity_m_s;

    let rho = rr.norm();
    let t1 = -GM_WGS / rho.powi(3);
    let t2 = 1.5 * C20 * (GM_WGS * AE * AE) / rho.powi(5);
    let t3 = OMEGA * OMEGA;
    let t4 = 2.0 * OMEGA;
    let z2 = rr.z * rr.z;

    let common = t1 + t2 * (1.0 - 5.0 * z2 / (rho * rho)) + t3;

    State {
        position_m: vv,
        velocity_m_s: Vector3::new(
            common * rr.x + t4 * vv.y + acceleration_m_s2.x,
            common * rr.y - t4 * vv.x + acceleration_m_s2.y,
            (t1 + t2 * (3.0 - 5.0 * z2 / (rho * rho))) * rr.z + acceleration_m_s2.z,
        ),
    }
}

fn rk4_step(state: State, step_s: f64, acceleration_m_s2: Vector3<f64>) -> State {
    let add = |a: State, b: State, scale: f64| State {
        position_m: a.position_m + b.position_m * scale,
        velocity_m_s: a.velocity_m_s + b.velocity_m_s * scale,
    };

    let k1 = derivative(state, acceleration_m_s2);
    let k2 = derivative(add(state, k1, step_s / 2.0), acceleration_m_s2);
    let k3 = derivative(add(state, k2, step_s / 2.0), acceleration_m_s2);
    let k4 = derivative(add(state, k3, step_s), acceleration_m_s2);

    State {
        position_m: state.position_m
            + (k1.position_m + k2.position_m * 2.0 + k3.position_m * 2.0 + k4.position_m) * (step_s / 6.0),
        velocity_m_s: state.velocity_m_s
            + (k1.velocity_m_s + k2.velocity_m_s * 2.0 + k3.velocity_m_s * 2.0 + k4.velocity_m_s) * (step_s / 6.0),
    }
}

/// Integrates the GLONASS reference state `initial` (at `reference_time`)
/// forward or backward to `time`, taking 10 s nominal steps. Returns
/// `None` if `time` is more than 24 h from the reference (matches the
/// teacher's sanity bound).
pub fn propagate(
    initial: State,
    acceleration_m_s2: Vector3<f64>,
    reference_time: GnssTime,
    time: GnssTime,
) -> Option<State> {
    let dt_total = time.diff_seconds(&reference_time) as f64;
    if dt_total.abs() > 24.0 * 3600.0 {
        return None;
    }

    let n_steps = (dt_total.abs() / NOMINAL_STEP_S) as i64 + 1;
    let step = dt_total / n_steps as f64;

    let mut state = initial;
    for _ in 0..n_steps {
        state = rk4_step(state, step, acceleration_m_s2);
    }
    Some(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrates_short_step_without_drift() {
        let initial = State {
            position_m: Vector3::new(7_000_000.0, 7_000_000.0, 7_000_000.0) / 3.0f64.sqrt() * 3.4,
            velocity_m_s: Vector3::new(1000.0, -2000.0, 500.0),
        };
        let reference = GnssTime::new(2296, 0);
        let target = GnssTime::new(2296, 30);
        let propagated = propagate(initial, Vector3::zeros(), reference, target).unwrap();
        assert!((propagated.position_m - initial.position_m).norm() > 0.0);
    }

    #[test]
    fn rejects_reference_more_than_a_day_away() {
        let initial = State {
            position_m: Vector3::new(1.0e7, 0.0, 0.0),
            velocity_m_s: Vector3::zeros(),
        };
        let reference = GnssTime::new(2296, 0);
        let target = GnssTime::new(2298, 0);
        assert!(propagate(initial, Vector3::zeros(), reference, target).is_none());
    }
}
