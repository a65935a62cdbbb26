//! Kepler orbit propagation for GPS, Galileo, QZSS and BDS (MEO/IGSO and
//! GEO), ported from the teacher's `anise`-based solver onto plain
//! `nalgebra` vectors (spec §4.5, §9 — BDS-GEO rotation).

use gnss_rs::prelude::Constellation;
use nalgebra::{Matrix3, Rotation3, SMatrix, Vector3, Vector4};

use crate::time::GnssTime;

/// The RINEX-mandated keplerian parameter set; common to GPS, Galileo,
/// QZSS and BDS broadcast messages.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Keplerian {
    pub toe: GnssTime,
    pub sma_m: f64,
    pub ecc: f64,
    pub inc_rad: f64,
    pub longan_rad: f64,
    pub ma_rad: f64,
    pub aop_rad: f64,
    pub dn_rad: f64,
    pub i_dot_rad_s: f64,
    pub omega_dot_rad_s: f64,
    pub cus_rad: f64,
    pub cuc_rad: f64,
    pub cis_rad: f64,
    pub cic_rad: f64,
    pub crs_m: f64,
    pub crc_m: f64,
}

pub struct Propagated {
    pub xyz_m: Vector3<f64>,
    pub velocity_m_s: Vector3<f64>,
    pub relativistic_correction_s: f64,
}

fn gm_m3_s2(system: Constellation) -> f64 {
    match system {
        Constellation::BeiDou => 3.986004418e14,
        Constellation::Glonass => 3.9860044e14,
        Constellation::Galileo => 3.986004418e14,
        _ => 3.9860050e14, // GPS ICD
    }
}

fn earth_rotation_rate(system: Constellation) -> f64 {
    match system {
        Constellation::BeiDou => 7.292115e-5,
        Constellation::Glonass => 7.292115e-5,
        Constellation::Galileo => 7.2921151467e-5,
        _ => 7.2921151467e-5,
    }
}

fn relativistic_dtr_factor(system: Constellation) -> f64 {
    match system {
        Constellation::BeiDou | Constellation::Galileo => -0.00000000044428073090439775,
        _ => -0.000000000444280763339306, // GPS ICD: -2*sqrt(GM)/c^2
    }
}

/// `true` for the handful of BDS PRNs operating in geostationary orbit,
/// which require the extra rotation of §4.5/§9.
fn is_beidou_geo(system: Constellation, prn_number: u16) -> bool {
    system == Constellation::BeiDou && ((1..=5).contains(&prn_number) || (59..=63).contains(&prn_number))
}

/// Propagates a keplerian ephemeris to `time`, returning ECEF position,
/// velocity and the relativistic clock correction term. Mirrors the
/// standard GPS-ICD Kepler solver; BDS GEO satellites get the extra
/// rotation.
pub fn propagate(
    keplerian: &Keplerian,
    system: Constellation,
    prn_number: u16,
    time: GnssTime,
    max_iterations: usize,
) -> Option<Propagated> {
    let gm = gm_m3_s2(system);
    let omega = earth_rotation_rate(system);
    let dtr_f = relativistic_dtr_factor(system);

    let dt_seconds = time.diff_seconds(&keplerian.toe) as f64;

    let sqrt_sma_m = keplerian.sma_m.sqrt();
    let n0 = (gm / keplerian.sma_m.powi(3)).sqrt();
    let n = n0 + keplerian.dn_rad;
    let m_k = keplerian.ma_rad + n * dt_seconds;

    let mut e_k;
    let mut e_k_lst = 0.0f64;
    let mut i = 0;
    loop {
        if i > max_iterations {
            return None;
        }
        e_k = m_k + keplerian.ecc * e_k_lst.sin();
        if (e_k - e_k_lst).abs() < 1e-10 {
            break;
        }
        i += 1;
        e_k_lst = e_k;
    }
    let e_k = m_k + keplerian.ecc * e_k_lst.sin();

    let (sin_e_k, cos_e_k) = e_k.sin_cos();
    let v_k = ((1.0 - keplerian.ecc.powi(2)).sqrt() * sin_e_k).atan2(cos_e_k - keplerian.ecc);

    let phi_k = v_k + keplerian.aop_rad;
    let (x2_sin_phi_k, x2_cos_phi_k) = (2.0 * phi_k).sin_cos();

    let du_k = keplerian.cus_rad * x2_sin_phi_k + keplerian.cuc_rad * x2_cos_phi_k;
    let u_k = phi_k + du_k;

    let dr_k = keplerian.crs_m * x2_sin_phi_k + keplerian.crc_m * x2_cos_phi_k;
    let r_k = keplerian.sma_m * (1.0 - keplerian.ecc * e_k.cos()) + dr_k;

    let di_k = keplerian.cis_rad * x2_sin_phi_k + keplerian.cic_rad * x2_cos_phi_k;

    let fd_omega_k = keplerian.omega_dot_rad_s - omega;
    let fd_e_k = n / (1.0 - keplerian.ecc * e_k.cos());
    let fd_phi_k = ((1.0 + keplerian.ecc) / (1.0 - keplerian.ecc)).sqrt()
        * ((v_k / 2.0).cos() / (e_k / 2.0).cos()).powi(2)
        * fd_e_k;

    let fd_u_k =
        (keplerian.cus_rad * x2_cos_phi_k - keplerian.cuc_rad * x2_sin_phi_k) * fd_phi_k * 2.0 + fd_phi_k;

    let fd_r_k = keplerian.sma_m * keplerian.ecc * e_k.sin() * fd_e_k
        + 2.0 * (keplerian.crs_m * x2_cos_phi_k - keplerian.crc_m * x2_sin_phi_k) * fd_phi_k;

    let fd_i_k = keplerian.i_dot_rad_s
        + 2.0 * (keplerian.cis_rad * x2_cos_phi_k - keplerian.cic_rad * x2_sin_phi_k) * fd_phi_k;

    let relativistic_correction_s = dtr_f * keplerian.ecc * sqrt_sma_m * e_k.sin();

    let geo = is_beidou_geo(system, prn_number);

    let omega_k = if geo {
        keplerian.longan_rad + keplerian.omega_dot_rad_s * dt_seconds - omega * keplerian.toe.seconds_of_week as f64
    } else {
        keplerian.longan_rad + (keplerian.omega_dot_rad_s - omega) * dt_seconds
            - omega * keplerian.toe.seconds_of_week as f64
    };

    let i_k = keplerian.inc_rad + di_k + keplerian.i_dot_rad_s * dt_seconds;

    let (x, y) = (r_k * u_k.cos(), r_k * u_k.sin());
    let (sin_u_k, cos_u_k) = u_k.sin_cos();
    let fd_x = fd_r_k * cos_u_k - r_k * fd_u_k * sin_u_k;
    let fd_y = fd_r_k * sin_u_k + r_k * fd_u_k * cos_u_k;

    if geo {
        let (xyz_m, velocity_m_s) = beidou_geo_state(x, y, fd_x, fd_y, omega_k, i_k, fd_omega_k, fd_i_k, dt_seconds);
        return Some(Propagated {
            xyz_m,
            velocity_m_s,
            relativistic_correction_s,
        });
    }

    let orbit_to_ecef = meo_rotation(i_k, omega_k);
    let xyz_m = orbit_to_ecef * Vector3::new(x, y, 0.0);

    let (sin_omega_k, cos_omega_k) = omega_k.sin_cos();
    let (sin_i_k, cos_i_k) = i_k.sin_cos();

    let mut fd_r = SMatrix::<f64, 3, 4>::zeros();
    fd_r[(0, 0)] = cos_omega_k;
    fd_r[(0, 1)] = -sin_omega_k * cos_i_k;
    fd_r[(0, 2)] = -(x * sin_omega_k + y * cos_omega_k * cos_i_k);
    fd_r[(0, 3)] = y * sin_omega_k * sin_i_k;
    fd_r[(1, 0)] = sin_omega_k;
    fd_r[(1, 1)] = cos_omega_k * cos_i_k;
    fd_r[(1, 2)] = x * cos_omega_k - y * sin_omega_k * cos_i_k;
    fd_r[(1, 3)] = y * cos_omega_k * sin_i_k;
    fd_r[(2, 1)] = sin_i_k;
    fd_r[(2, 3)] = y * cos_i_k;

    let velocity_m_s = fd_r * Vector4::new(fd_x, fd_y, fd_omega_k, fd_i_k);

    Some(Propagated {
        xyz_m,
        velocity_m_s,
        relativistic_correction_s,
    })
}

fn meo_rotation(i_k: f64, omega_k: f64) -> Rotation3<f64> {
    let rotation_x = Rotation3::from_axis_angle(&Vector3::x_axis(), i_k);
    let rotation_z = Rotation3::from_axis_angle(&Vector3::z_axis(), omega_k);
    rotation_z * rotation_x
}

const OMEGA_BDS: f64 = 7.292115e-5;

#[allow(clippy::too_many_arguments)]
fn beidou_geo_state(
    x: f64,
    y: f64,
    fd_x: f64,
    fd_y: f64,
    omega_k: f64,
    i_k: f64,
    fd_omega_k: f64,
    fd_i_k: f64,
    dt_seconds: f64,
) -> (Vector3<f64>, Vector3<f64>) {
    let rotation1 = meo_rotation(i_k, omega_k);
    let rotation_x5 = Rotation3::from_axis_angle(&Vector3::x_axis(), 5.0f64.to_radians());
    let rotation2 = Rotation3::from_axis_angle(&Vector3::z_axis(), -OMEGA_BDS * dt_seconds);

    let orbit_xyz = Vector3::new(x, y, 0.0);
    let xyz_m = rotation2 * rotation1 * orbit_xyz;

    let (sin_omega_k, cos_omega_k) = omega_k.sin_cos();
    let (sin_i_k, cos_i_k) = i_k.sin_cos();
    let fd_xgk = -y * fd_omega_k - fd_y * cos_i_k * sin_omega_k + fd_x * cos_omega_k;
    let fd_ygk = x * fd_omega_k + fd_y * cos_i_k * cos_omega_k + fd_x * sin_omega_k;
    let fd_zgk = fd_y * sin_i_k + y * fd_i_k * cos_i_k;

    let (sin_omega_tk, cos_omega_tk) = (OMEGA_BDS * dt_seconds).sin_cos();
    let fd_rz = fd_omega_k
        * Matrix3::new(
            -sin_omega_tk,
            cos_omega_tk,
            0.0,
            -cos_omega_tk,
            -sin_omega_tk,
            0.0,
            0.0,
            0.0,
            0.0,
        );

    let fd_pos = Vector3::new(fd_xgk, fd_ygk, fd_zgk);
    let velocity_m_s = fd_rz * rotation_x5 * orbit_xyz + rotation2 * rotation_x5 * fd_pos;

    (xyz_m, velocity_m_s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_orbit_propagates_without_panicking() {
        let keplerian = Keplerian {
            toe: GnssTime::new(2296, 0),
            sma_m: 26_560_000.0,
            ecc: 0.01,
            inc_rad: 0.9,
            longan_rad: 1.2,
            ma_rad: 0.5,
            aop_rad: 0.3,
            ..Default::default()
        };
        let propagated = propagate(&keplerian, Constellation::GPS, 1, GnssTime::new(2296, 1800), 20).unwrap();
        assert!(propagated.xyz_m.norm() > 20_000_000.0);
        assert!(propagated.velocity_m_s.norm() > 0.0);
    }
}
