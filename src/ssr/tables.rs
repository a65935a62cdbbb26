//! Lookup tables shared by the RTCM-SSR and IGS-SSR decoders (spec §4.3,
//! §4.9).

use gnss_rs::prelude::Constellation;

/// 4-bit `ssrUpdateInterval` code to seconds.
pub const UPDATE_INTERVAL_SECONDS: [u32; 16] = [
    1, 2, 5, 10, 15, 30, 60, 120, 240, 300, 600, 900, 1800, 3600, 7200, 10800,
];

pub fn update_interval_seconds(code: u8) -> u32 {
    UPDATE_INTERVAL_SECONDS[(code & 0x0F) as usize]
}

/// Decodes a 6-bit URA code into meters, per spec §4.3.
///
/// `URAToValue(code) = (3^high * (1 + low/4) - 1) / 1000`, ceiling
/// 5.4665 m; code 63 means ">= 5.4665 m".
pub fn ura_to_value(code: u8) -> f64 {
    if code == 0 {
        return 0.0;
    }
    if code >= 63 {
        return 5.4665;
    }
    let high = (code >> 3) & 0x07;
    let low = code & 0x07;
    let value = (3f64.powi(high as i32) * (1.0 + low as f64 / 4.0) - 1.0) / 1000.0;
    value.min(5.4665)
}

/// Inverse of [`ura_to_value`]: the smallest code whose value is `>= v`.
pub fn value_to_ura(v: f64) -> u8 {
    if v <= 0.0 {
        return 0;
    }
    for code in 0u8..63 {
        if ura_to_value(code) >= v {
            return code;
        }
    }
    63
}

/// Maps an RTCM/IGS signal identifier to its two-character RINEX-3
/// observation code, per system. Unknown ids map to `""`.
pub fn rnx_type_from_id(system: Constellation, id: u8) -> &'static str {
    match system {
        Constellation::GPS => match id {
            0 => "1C",
            1 => "1P",
            2 => "1W",
            3 => "1S",
            4 => "1L",
            5 => "2C",
            6 => "2D",
            7 => "2S",
            8 => "2L",
            9 => "2X",
            10 => "2P",
            11 => "2W",
            14 => "5I",
            15 => "5Q",
            16 => "5X",
            _ => "",
        },
        Constellation::Glonass => match id {
            0 => "1C",
            1 => "1P",
            2 => "2C",
            3 => "2P",
            4 => "4A",
            5 => "4B",
            6 => "6A",
            7 => "6B",
            _ => "",
        },
        Constellation::Galileo => match id {
            0 => "1A",
            1 => "1B",
            2 => "1C",
            3 => "1X",
            4 => "1Z",
            5 => "5I",
            6 => "5Q",
            7 => "5X",
            8 => "7I",
            9 => "7Q",
            10 => "7X",
            11 => "8I",
            12 => "8Q",
            13 => "8X",
            14 => "6A",
            15 => "6B",
            16 => "6C",
            17 => "5Q",
            _ => "",
        },
        Constellation::QZSS => match id {
            0 => "1C",
            1 => "1S",
            2 => "1L",
            3 => "2S",
            4 => "2L",
            5 => "2X",
            6 => "5I",
            7 => "5Q",
            8 => "5X",
            9 => "6S",
            10 => "6L",
            11 => "6X",
            _ => "",
        },
        Constellation::SBAS => match id {
            0 => "1C",
            1 => "5I",
            2 => "5Q",
            _ => "",
        },
        Constellation::BeiDou => match id {
            0 => "2I",
            1 => "2Q",
            2 => "2X",
            3 => "6I",
            4 => "6Q",
            5 => "6X",
            6 => "7I",
            7 => "7Q",
            8 => "7X",
            9 => "5D",
            10 => "5P",
            11 => "5X",
            12 => "1D",
            13 => "1P",
            14 => "1X",
            _ => "",
        },
        _ => "",
    }
}

/// Inverse of [`rnx_type_from_id`]: returns `None` for an unmapped code.
pub fn rnx_type_to_id(system: Constellation, rinex_code: &str) -> Option<u8> {
    (0..32u8).find(|&id| rnx_type_from_id(system, id) == rinex_code)
}

/// Range gate (spec §4.9, Table R). Slightly different between RTCM-SSR
/// and IGS-SSR for `delta_a2`: both are preserved rather than picking one,
/// per the Open Question in spec.md §9 (resolved in DESIGN.md).
#[derive(Debug, Clone, Copy)]
pub struct RangeGate {
    pub delta_a0: f64,
    pub delta_a1: f64,
    pub delta_a2: f64,
    pub delta_radial: f64,
    pub delta_along: f64,
    pub delta_cross: f64,
    pub dot_delta_radial: f64,
    pub dot_delta_along: f64,
    pub dot_delta_cross: f64,
}

pub const RTCM_SSR_RANGE: RangeGate = RangeGate {
    delta_a0: 209.7151,
    delta_a1: 1.048575,
    delta_a2: 1.34217726,
    delta_radial: 209.7151,
    delta_along: 209.7148,
    delta_cross: 209.7148,
    dot_delta_radial: 1.048575,
    dot_delta_along: 1.048572,
    dot_delta_cross: 1.048572,
};

pub const IGS_SSR_RANGE: RangeGate = RangeGate {
    delta_a0: 209.7151,
    delta_a1: 1.048575,
    delta_a2: 1.3421772,
    delta_radial: 209.7151,
    delta_along: 209.7148,
    delta_cross: 209.7148,
    dot_delta_radial: 1.048575,
    dot_delta_along: 1.048572,
    dot_delta_cross: 1.048572,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ura_roundtrip_monotonic() {
        for raw in [0.01, 0.5, 1.0, 2.5, 5.0, 5.4665] {
            let code = value_to_ura(raw);
            let back = ura_to_value(code);
            assert!(back >= raw - 1e-6, "{raw} -> {code} -> {back}");
        }
    }

    #[test]
    fn rnx_type_is_bijective_for_known_entries() {
        for id in 0..12u8 {
            let rnx = rnx_type_from_id(Constellation::GPS, id);
            if !rnx.is_empty() {
                assert_eq!(rnx_type_to_id(Constellation::GPS, rnx), Some(id));
            }
        }
        assert_eq!(rnx_type_from_id(Constellation::GPS, 0), "1C");
        assert_eq!(rnx_type_to_id(Constellation::GPS, "1C"), Some(0));
        assert_eq!(rnx_type_from_id(Constellation::Galileo, 1), "1B");
        assert_eq!(rnx_type_from_id(Constellation::BeiDou, 0), "2I");
        assert_eq!(rnx_type_from_id(Constellation::GPS, 99), "");
    }

    #[test]
    fn update_interval_table_matches_spec() {
        assert_eq!(update_interval_seconds(0), 1);
        assert_eq!(update_interval_seconds(9), 300);
        assert_eq!(update_interval_seconds(15), 10800);
    }
}
