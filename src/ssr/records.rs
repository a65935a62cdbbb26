//! Decoded SSR record types (spec §3).

use crate::prn::SatellitePrn;
use crate::time::GnssTime;

/// 4-bit raw `ssrUpdateInterval` code; decode with
/// [`crate::ssr::tables::update_interval_seconds`].
pub type UpdateIntervalTag = u8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitCorrection {
    pub prn: SatellitePrn,
    pub sta_id: u32,
    pub time: GnssTime,
    pub update_interval_tag: UpdateIntervalTag,
    pub iod: u32,
    /// radial, along, cross, meters.
    pub delta_rsw: [f64; 3],
    /// radial, along, cross, meters/second.
    pub dot_delta_rsw: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockCorrection {
    pub prn: SatellitePrn,
    pub sta_id: u32,
    pub time: GnssTime,
    pub update_interval_tag: UpdateIntervalTag,
    pub iod: u32,
    /// seconds.
    pub d_clk: f64,
    /// s/s.
    pub dot_d_clk: f64,
    /// s/s^2.
    pub dot_dot_d_clk: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SatCodeBias {
    pub prn: SatellitePrn,
    pub sta_id: u32,
    pub time: GnssTime,
    pub update_interval_tag: UpdateIntervalTag,
    /// (RINEX-3 two-char signal id, bias in meters).
    pub biases: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseBiasEntry {
    pub rinex_signal: [u8; 2],
    pub integer_indicator: bool,
    pub wide_lane_integer_indicator: u8,
    pub discontinuity_counter: u8,
    /// meters.
    pub bias: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SatPhaseBias {
    pub prn: SatellitePrn,
    pub sta_id: u32,
    pub time: GnssTime,
    pub update_interval_tag: UpdateIntervalTag,
    pub dispersive_bias_consistency: bool,
    pub mw_consistency: bool,
    /// radians.
    pub yaw_angle: f64,
    /// rad/s.
    pub yaw_rate: f64,
    pub entries: Vec<PhaseBiasEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VtecLayer {
    /// meters.
    pub height: f64,
    pub degree: u8,
    pub order: u8,
    /// `coefficients[d][o]`, only entries with `o <= d <= degree` meaningful.
    pub cosine: [[f64; 17]; 17],
    pub sine: [[f64; 17]; 17],
}

impl Default for VtecLayer {
    fn default() -> Self {
        Self {
            height: 0.0,
            degree: 1,
            order: 1,
            cosine: [[0.0; 17]; 17],
            sine: [[0.0; 17]; 17],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VtecModel {
    pub time: GnssTime,
    pub update_interval_tag: UpdateIntervalTag,
    pub sta_id: u32,
    /// 1/20 TECU units preserved as TECU.
    pub quality: f64,
    /// 1..=4 entries.
    pub layers: Vec<VtecLayer>,
    /// Set when this message is not the last of a multi-message group at
    /// this epoch (spec §4.6's per-satellite merging rule applies to VTEC
    /// groups the same way it does to ORBIT/CLOCK/COMBINED).
    pub multiple_message: bool,
}

/// Provider-identity triple; a change between successive frames for the
/// same stream raises `onProviderIdChanged` (spec §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SsrProviderId {
    pub provider_id: u16,
    pub solution_id: u8,
    pub issue_of_data: u8,
}

impl SsrProviderId {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}
