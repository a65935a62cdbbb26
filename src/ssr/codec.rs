//! Bit-level encode/decode for the SSR message family (C3), both the
//! legacy RTCM-SSR message numbers and the IGS-SSR common message with
//! its per-constellation subtype byte (spec §4.3).

use gnss_rs::prelude::Constellation;

use crate::bits::{BitReader, BitWriter};
use crate::prn::SatellitePrn;
use crate::ssr::records::{
    ClockCorrection, OrbitCorrection, PhaseBiasEntry, SatCodeBias, SatPhaseBias, SsrProviderId,
    VtecLayer, VtecModel,
};
use crate::ssr::tables::{rnx_type_from_id, rnx_type_to_id, RTCM_SSR_RANGE, IGS_SSR_RANGE, RangeGate};
use crate::ssr::SsrError;
use crate::time::GnssTime;

pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Orbit,
    Clock,
    Combined,
    HrClock,
    CodeBias,
    PhaseBias,
    Ura,
    Vtec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageId {
    pub system: Constellation,
    pub content: ContentKind,
}

/// Which bit-stream family produced/consumes a message: the per-satellite
/// field widths and the clock/orbit range gate both depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    RtcmSsr,
    IgsSsr,
}

impl Encoding {
    fn range_gate(self) -> RangeGate {
        match self {
            Encoding::RtcmSsr => RTCM_SSR_RANGE,
            Encoding::IgsSsr => IGS_SSR_RANGE,
        }
    }
}

const RTCM_SYSTEMS: [(Constellation, u16); 6] = [
    (Constellation::GPS, 1057),
    (Constellation::Glonass, 1063),
    (Constellation::Galileo, 1240),
    (Constellation::QZSS, 1246),
    (Constellation::SBAS, 1252),
    (Constellation::BeiDou, 1258),
];

const CONTENT_OFFSETS: [(ContentKind, u16); 6] = [
    (ContentKind::Orbit, 0),
    (ContentKind::Clock, 1),
    (ContentKind::CodeBias, 2),
    (ContentKind::Combined, 3),
    (ContentKind::Ura, 4),
    (ContentKind::HrClock, 5),
];

const RTCM_PHASE_BIAS_BASE: u16 = 1265;
const RTCM_VTEC: u16 = 1264;

/// Maps an RTCM-SSR message number to the `(system, content)` it carries.
/// Returns `None` for numbers outside the SSR family (`UnknownType`).
pub fn rtcm_message_id(number: u16) -> Option<MessageId> {
    if number == RTCM_VTEC {
        return Some(MessageId {
            system: Constellation::GPS,
            content: ContentKind::Vtec,
        });
    }
    if (RTCM_PHASE_BIAS_BASE..RTCM_PHASE_BIAS_BASE + 6).contains(&number) {
        let system = RTCM_SYSTEMS[(number - RTCM_PHASE_BIAS_BASE) as usize].0;
        return Some(MessageId {
            system,
            content: ContentKind::PhaseBias,
        });
    }
    for (system, base) in RTCM_SYSTEMS {
        if (base..base + 6).contains(&number) {
            let offset = number - base;
            let content = CONTENT_OFFSETS
                .iter()
                .find(|(_, o)| *o == offset)
                .map(|(c, _)| *c)?;
            return Some(MessageId { system, content });
        }
    }
    None
}

/// Inverse of [`rtcm_message_id`].
pub fn rtcm_message_number(id: MessageId) -> Option<u16> {
    if id.content == ContentKind::Vtec {
        return Some(RTCM_VTEC);
    }
    if id.content == ContentKind::PhaseBias {
        let idx = RTCM_SYSTEMS.iter().position(|(s, _)| *s == id.system)?;
        return Some(RTCM_PHASE_BIAS_BASE + idx as u16);
    }
    let (_, base) = RTCM_SYSTEMS.iter().find(|(s, _)| *s == id.system)?;
    let (_, offset) = CONTENT_OFFSETS.iter().find(|(c, _)| *c == id.content)?;
    Some(base + offset)
}

const IGS_SYSTEM_BASE: [(Constellation, u8); 6] = [
    (Constellation::GPS, 1),
    (Constellation::Glonass, 11),
    (Constellation::Galileo, 21),
    (Constellation::QZSS, 31),
    (Constellation::SBAS, 41),
    (Constellation::BeiDou, 51),
];

const IGS_CONTENT_OFFSET: [(ContentKind, u8); 7] = [
    (ContentKind::Orbit, 1),
    (ContentKind::Clock, 2),
    (ContentKind::Combined, 3),
    (ContentKind::HrClock, 4),
    (ContentKind::CodeBias, 5),
    (ContentKind::PhaseBias, 6),
    (ContentKind::Ura, 7),
];

const IGS_VTEC_SUBTYPE: u8 = 60;

pub fn igs_message_id(subtype: u8) -> Option<MessageId> {
    if subtype == IGS_VTEC_SUBTYPE {
        return Some(MessageId {
            system: Constellation::GPS,
            content: ContentKind::Vtec,
        });
    }
    for (system, base) in IGS_SYSTEM_BASE {
        if subtype >= base && subtype < base + 10 {
            let offset = subtype - base;
            let content = IGS_CONTENT_OFFSET
                .iter()
                .find(|(_, o)| *o == offset)
                .map(|(c, _)| *c)?;
            return Some(MessageId { system, content });
        }
    }
    None
}

pub fn igs_subtype(id: MessageId) -> Option<u8> {
    if id.content == ContentKind::Vtec {
        return Some(IGS_VTEC_SUBTYPE);
    }
    let (_, base) = IGS_SYSTEM_BASE.iter().find(|(s, _)| *s == id.system)?;
    let (_, offset) = IGS_CONTENT_OFFSET.iter().find(|(c, _)| *c == id.content)?;
    Some(base + offset)
}

fn epoch_bits(system: Constellation) -> u32 {
    if system == Constellation::Glonass {
        17
    } else {
        20
    }
}

fn sat_id_bits(system: Constellation) -> u32 {
    match system {
        Constellation::QZSS => 4,
        Constellation::Glonass => 5,
        _ => 6,
    }
}

fn iod_bits(system: Constellation) -> u32 {
    match system {
        Constellation::Galileo | Constellation::BeiDou => 10,
        Constellation::SBAS => 24,
        _ => 8,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsrHeader {
    pub epoch_time_sec: u32,
    pub update_interval_tag: u8,
    pub multiple_message: bool,
    pub iod: u8,
    pub provider_id: SsrProviderId,
    pub satellite_reference_datum: bool,
    pub num_satellites: u8,
}

fn decode_header(
    r: &mut BitReader<'_>,
    system: Constellation,
    has_reference_datum: bool,
) -> Result<SsrHeader, SsrError> {
    let epoch_time_sec = r.take_bits(epoch_bits(system))? as u32;
    let update_interval_tag = r.take_bits(4)? as u8;
    let multiple_message = r.take_bits(1)? != 0;
    let satellite_reference_datum = if has_reference_datum {
        r.take_bits(1)? != 0
    } else {
        false
    };
    let iod = r.take_bits(4)? as u8;
    let provider_id = r.take_bits(16)? as u16;
    let solution_id = r.take_bits(4)? as u8;
    let num_satellites = r.take_bits(6)? as u8;
    Ok(SsrHeader {
        epoch_time_sec,
        update_interval_tag,
        multiple_message,
        iod,
        provider_id: SsrProviderId {
            provider_id,
            solution_id,
            issue_of_data: iod,
        },
        satellite_reference_datum,
        num_satellites,
    })
}

fn encode_header(
    w: &mut BitWriter,
    system: Constellation,
    has_reference_datum: bool,
    h: &SsrHeader,
) {
    w.push_bits(h.epoch_time_sec as u64, epoch_bits(system));
    w.push_bits(h.update_interval_tag as u64, 4);
    w.push_bits(h.multiple_message as u64, 1);
    if has_reference_datum {
        w.push_bits(h.satellite_reference_datum as u64, 1);
    }
    w.push_bits(h.iod as u64, 4);
    w.push_bits(h.provider_id.provider_id as u64, 16);
    w.push_bits(h.provider_id.solution_id as u64, 4);
    w.push_bits(h.num_satellites as u64, 6);
}

fn header_time(h: &SsrHeader, week: i64) -> GnssTime {
    GnssTime::new(week, h.epoch_time_sec as i64)
}

fn decode_sat_id(r: &mut BitReader<'_>, system: Constellation) -> Result<SatellitePrn, SsrError> {
    let raw = r.take_bits(sat_id_bits(system))? as u16;
    let number = raw + 1;
    if number > SatellitePrn::max_per_system(system) {
        return Err(SsrError::DataMismatch);
    }
    Ok(SatellitePrn::new(system, number))
}

fn encode_sat_id(w: &mut BitWriter, system: Constellation, prn: SatellitePrn) {
    w.push_bits((prn.number - 1) as u64, sat_id_bits(system));
}

fn gate(v: f64, limit: f64) -> Result<(), SsrError> {
    if v.abs() > limit {
        Err(SsrError::RangeViolation)
    } else {
        Ok(())
    }
}

fn decode_orbit_entry(
    r: &mut BitReader<'_>,
    system: Constellation,
    encoding: Encoding,
    sta_id: u32,
    time: GnssTime,
    header: &SsrHeader,
) -> Result<OrbitCorrection, SsrError> {
    let prn = decode_sat_id(r, system)?;
    let iod = r.take_bits(iod_bits(system))? as u32;
    let delta_radial = r.take_signed_scaled(22, 1e-4)?;
    let delta_along = r.take_signed_scaled(20, 2.5e-4)?;
    let delta_cross = r.take_signed_scaled(20, 2.5e-4)?;
    let dot_delta_radial = r.take_signed_scaled(21, 1e-6)?;
    let dot_delta_along = r.take_signed_scaled(19, 4e-6)?;
    let dot_delta_cross = r.take_signed_scaled(19, 4e-6)?;

    let range = encoding.range_gate();
    gate(delta_radial, range.delta_radial)?;
    gate(delta_along, range.delta_along)?;
    gate(delta_cross, range.delta_cross)?;
    gate(dot_delta_radial, range.dot_delta_radial)?;
    gate(dot_delta_along, range.dot_delta_along)?;
    gate(dot_delta_cross, range.dot_delta_cross)?;

    Ok(OrbitCorrection {
        prn,
        sta_id,
        time,
        update_interval_tag: header.update_interval_tag,
        iod,
        delta_rsw: [delta_radial, delta_along, delta_cross],
        dot_delta_rsw: [dot_delta_radial, dot_delta_along, dot_delta_cross],
    })
}

fn encode_orbit_entry(w: &mut BitWriter, system: Constellation, rec: &OrbitCorrection) {
    encode_sat_id(w, system, rec.prn);
    w.push_bits(rec.iod as u64, iod_bits(system));
    w.push_signed_scaled(rec.delta_rsw[0], 1e-4, 22);
    w.push_signed_scaled(rec.delta_rsw[1], 2.5e-4, 20);
    w.push_signed_scaled(rec.delta_rsw[2], 2.5e-4, 20);
    w.push_signed_scaled(rec.dot_delta_rsw[0], 1e-6, 21);
    w.push_signed_scaled(rec.dot_delta_rsw[1], 4e-6, 19);
    w.push_signed_scaled(rec.dot_delta_rsw[2], 4e-6, 19);
}

fn decode_clock_entry(
    r: &mut BitReader<'_>,
    system: Constellation,
    encoding: Encoding,
    sta_id: u32,
    time: GnssTime,
    header: &SsrHeader,
) -> Result<ClockCorrection, SsrError> {
    let prn = decode_sat_id(r, system)?;
    let delta_a0 = r.take_signed_scaled(22, 1e-4)?;
    let delta_a1 = r.take_signed_scaled(21, 1e-6)?;
    let delta_a2 = r.take_signed_scaled(27, 2e-8)?;

    let range = encoding.range_gate();
    gate(delta_a0, range.delta_a0)?;
    gate(delta_a1, range.delta_a1)?;
    gate(delta_a2, range.delta_a2)?;

    Ok(ClockCorrection {
        prn,
        sta_id,
        time,
        update_interval_tag: header.update_interval_tag,
        iod: header.iod as u32,
        d_clk: delta_a0 / SPEED_OF_LIGHT,
        dot_d_clk: delta_a1 / SPEED_OF_LIGHT,
        dot_dot_d_clk: delta_a2 / SPEED_OF_LIGHT,
    })
}

fn encode_clock_entry(w: &mut BitWriter, system: Constellation, rec: &ClockCorrection) {
    encode_sat_id(w, system, rec.prn);
    w.push_signed_scaled(rec.d_clk * SPEED_OF_LIGHT, 1e-4, 22);
    w.push_signed_scaled(rec.dot_d_clk * SPEED_OF_LIGHT, 1e-6, 21);
    w.push_signed_scaled(rec.dot_dot_d_clk * SPEED_OF_LIGHT, 2e-8, 27);
}

pub fn decode_orbit(
    data: &[u8],
    system: Constellation,
    encoding: Encoding,
    sta_id: u32,
    week: i64,
) -> Result<(SsrHeader, Vec<OrbitCorrection>), SsrError> {
    let mut r = BitReader::new(data);
    let header = decode_header(&mut r, system, true)?;
    let time = header_time(&header, week);
    let mut out = Vec::with_capacity(header.num_satellites as usize);
    for _ in 0..header.num_satellites {
        out.push(decode_orbit_entry(&mut r, system, encoding, sta_id, time, &header)?);
    }
    Ok((header, out))
}

pub fn encode_orbit(system: Constellation, header: &SsrHeader, entries: &[OrbitCorrection]) -> Vec<u8> {
    let mut w = BitWriter::new();
    encode_header(&mut w, system, true, header);
    for e in entries {
        encode_orbit_entry(&mut w, system, e);
    }
    w.finish()
}

pub fn decode_clock(
    data: &[u8],
    system: Constellation,
    encoding: Encoding,
    sta_id: u32,
    week: i64,
) -> Result<(SsrHeader, Vec<ClockCorrection>), SsrError> {
    let mut r = BitReader::new(data);
    let header = decode_header(&mut r, system, false)?;
    let time = header_time(&header, week);
    let mut out = Vec::with_capacity(header.num_satellites as usize);
    for _ in 0..header.num_satellites {
        out.push(decode_clock_entry(&mut r, system, encoding, sta_id, time, &header)?);
    }
    Ok((header, out))
}

pub fn encode_clock(system: Constellation, header: &SsrHeader, entries: &[ClockCorrection]) -> Vec<u8> {
    let mut w = BitWriter::new();
    encode_header(&mut w, system, false, header);
    for e in entries {
        encode_clock_entry(&mut w, system, e);
    }
    w.finish()
}

pub fn decode_combined(
    data: &[u8],
    system: Constellation,
    encoding: Encoding,
    sta_id: u32,
    week: i64,
) -> Result<(SsrHeader, Vec<OrbitCorrection>, Vec<ClockCorrection>), SsrError> {
    let mut r = BitReader::new(data);
    let header = decode_header(&mut r, system, true)?;
    let time = header_time(&header, week);
    let mut orbits = Vec::with_capacity(header.num_satellites as usize);
    let mut clocks = Vec::with_capacity(header.num_satellites as usize);
    for _ in 0..header.num_satellites {
        orbits.push(decode_orbit_entry(&mut r, system, encoding, sta_id, time, &header)?);
        clocks.push(decode_clock_entry(&mut r, system, encoding, sta_id, time, &header)?);
    }
    Ok((header, orbits, clocks))
}

pub fn encode_combined(
    system: Constellation,
    header: &SsrHeader,
    orbits: &[OrbitCorrection],
    clocks: &[ClockCorrection],
) -> Vec<u8> {
    let mut w = BitWriter::new();
    encode_header(&mut w, system, true, header);
    for (o, c) in orbits.iter().zip(clocks.iter()) {
        encode_orbit_entry(&mut w, system, o);
        encode_clock_entry(&mut w, system, c);
    }
    w.finish()
}

/// High-rate clock delta, meters; the stream decoder adds `delta_m / c` to
/// the last known clock correction for this prn (spec §4.6 step 2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HrClockDelta {
    pub prn: SatellitePrn,
    pub sta_id: u32,
    pub time: GnssTime,
    pub update_interval_tag: u8,
    pub delta_m: f64,
}

pub fn decode_hr_clock(
    data: &[u8],
    system: Constellation,
    sta_id: u32,
    week: i64,
) -> Result<(SsrHeader, Vec<HrClockDelta>), SsrError> {
    let mut r = BitReader::new(data);
    let header = decode_header(&mut r, system, false)?;
    let time = header_time(&header, week);
    let mut out = Vec::with_capacity(header.num_satellites as usize);
    for _ in 0..header.num_satellites {
        let prn = decode_sat_id(&mut r, system)?;
        let delta_m = r.take_signed_scaled(22, 1e-4)?;
        out.push(HrClockDelta {
            prn,
            sta_id,
            time,
            update_interval_tag: header.update_interval_tag,
            delta_m,
        });
    }
    Ok((header, out))
}

pub fn encode_hr_clock(system: Constellation, header: &SsrHeader, entries: &[HrClockDelta]) -> Vec<u8> {
    let mut w = BitWriter::new();
    encode_header(&mut w, system, false, header);
    for e in entries {
        encode_sat_id(&mut w, system, e.prn);
        w.push_signed_scaled(e.delta_m, 1e-4, 22);
    }
    w.finish()
}

pub fn decode_code_bias(
    data: &[u8],
    system: Constellation,
    sta_id: u32,
    week: i64,
) -> Result<(SsrHeader, Vec<SatCodeBias>), SsrError> {
    let mut r = BitReader::new(data);
    let header = decode_header(&mut r, system, false)?;
    let time = header_time(&header, week);
    let mut out = Vec::with_capacity(header.num_satellites as usize);
    for _ in 0..header.num_satellites {
        let prn = decode_sat_id(&mut r, system)?;
        let num_biases = r.take_bits(5)? as usize;
        let mut biases = Vec::with_capacity(num_biases);
        for _ in 0..num_biases {
            let signal_id = r.take_bits(5)? as u8;
            let bias = r.take_signed_scaled(14, 1e-2)?;
            let rnx = rnx_type_from_id(system, signal_id);
            if !rnx.is_empty() {
                biases.push((rnx.to_string(), bias));
            }
        }
        out.push(SatCodeBias {
            prn,
            sta_id,
            time,
            update_interval_tag: header.update_interval_tag,
            biases,
        });
    }
    Ok((header, out))
}

pub fn encode_code_bias(system: Constellation, header: &SsrHeader, entries: &[SatCodeBias]) -> Vec<u8> {
    let mut w = BitWriter::new();
    encode_header(&mut w, system, false, header);
    for e in entries {
        encode_sat_id(&mut w, system, e.prn);
        w.push_bits(e.biases.len() as u64, 5);
        for (rnx, bias) in &e.biases {
            let id = rnx_type_to_id(system, rnx).unwrap_or(0);
            w.push_bits(id as u64, 5);
            w.push_signed_scaled(*bias, 1e-2, 14);
        }
    }
    w.finish()
}

pub fn decode_phase_bias(
    data: &[u8],
    system: Constellation,
    sta_id: u32,
    week: i64,
) -> Result<(SsrHeader, Vec<SatPhaseBias>), SsrError> {
    let mut r = BitReader::new(data);
    let header = decode_header(&mut r, system, false)?;
    let time = header_time(&header, week);
    let dispersive_bias_consistency = r.take_bits(1)? != 0;
    let mw_consistency = r.take_bits(1)? != 0;
    let mut out = Vec::with_capacity(header.num_satellites as usize);
    for _ in 0..header.num_satellites {
        let prn = decode_sat_id(&mut r, system)?;
        let yaw_angle = r.take_scaled(9, std::f64::consts::PI / 256.0)?;
        let yaw_rate = r.take_signed_scaled(8, std::f64::consts::PI / 8192.0)?;
        let num_biases = r.take_bits(5)? as usize;
        let mut entries = Vec::with_capacity(num_biases);
        for _ in 0..num_biases {
            let signal_id = r.take_bits(5)? as u8;
            let integer_indicator = r.take_bits(1)? != 0;
            let wide_lane_integer_indicator = r.take_bits(2)? as u8;
            let discontinuity_counter = r.take_bits(4)? as u8;
            let bias = r.take_signed_scaled(20, 1e-4)?;
            let rnx = rnx_type_from_id(system, signal_id);
            if rnx.is_empty() {
                continue;
            }
            let bytes = rnx.as_bytes();
            entries.push(PhaseBiasEntry {
                rinex_signal: [bytes[0], bytes[1]],
                integer_indicator,
                wide_lane_integer_indicator,
                discontinuity_counter,
                bias,
            });
        }
        out.push(SatPhaseBias {
            prn,
            sta_id,
            time,
            update_interval_tag: header.update_interval_tag,
            dispersive_bias_consistency,
            mw_consistency,
            yaw_angle,
            yaw_rate,
            entries,
        });
    }
    Ok((header, out))
}

pub fn encode_phase_bias(system: Constellation, header: &SsrHeader, entries: &[SatPhaseBias]) -> Vec<u8> {
    let mut w = BitWriter::new();
    encode_header(&mut w, system, false, header);
    let (dispersive, mw) = entries
        .first()
        .map(|e| (e.dispersive_bias_consistency, e.mw_consistency))
        .unwrap_or((false, false));
    w.push_bits(dispersive as u64, 1);
    w.push_bits(mw as u64, 1);
    for e in entries {
        encode_sat_id(&mut w, system, e.prn);
        w.push_scaled(e.yaw_angle, std::f64::consts::PI / 256.0, 9);
        w.push_signed_scaled(e.yaw_rate, std::f64::consts::PI / 8192.0, 8);
        w.push_bits(e.entries.len() as u64, 5);
        for signal in &e.entries {
            let rnx = std::str::from_utf8(&signal.rinex_signal).unwrap_or("");
            let id = rnx_type_to_id(system, rnx).unwrap_or(0);
            w.push_bits(id as u64, 5);
            w.push_bits(signal.integer_indicator as u64, 1);
            w.push_bits(signal.wide_lane_integer_indicator as u64, 2);
            w.push_bits(signal.discontinuity_counter as u64, 4);
            w.push_signed_scaled(signal.bias, 1e-4, 20);
        }
    }
    w.finish()
}

pub fn decode_vtec(data: &[u8], sta_id: u32, week: i64) -> Result<VtecModel, SsrError> {
    let mut r = BitReader::new(data);
    let epoch_time_sec = r.take_bits(20)? as i64;
    let update_interval_tag = r.take_bits(4)? as u8;
    let multiple_message = r.take_bits(1)? != 0;
    let _iod = r.take_bits(4)?;
    let quality = r.take_scaled(9, 1.0 / 20.0)?;
    let num_layers = r.take_bits(2)? as usize + 1;

    let mut layers = Vec::with_capacity(num_layers);
    for _ in 0..num_layers {
        let height = r.take_scaled(8, 1e4)?;
        let degree = r.take_bits(4)? as u8 + 1;
        let order = r.take_bits(4)? as u8 + 1;

        let mut layer = VtecLayer {
            height,
            degree,
            order,
            ..Default::default()
        };

        for d in 0..=degree as usize {
            for o in 0..=(order as usize).min(d) {
                layer.cosine[d][o] = r.take_signed_scaled(16, 5e-3)?;
            }
        }
        for d in 0..=degree as usize {
            for o in 1..=(order as usize).min(d) {
                layer.sine[d][o] = r.take_signed_scaled(16, 5e-3)?;
            }
        }
        layers.push(layer);
    }

    Ok(VtecModel {
        time: GnssTime::new(week, epoch_time_sec),
        update_interval_tag,
        sta_id,
        quality,
        layers,
        multiple_message,
    })
}

pub fn encode_vtec(model: &VtecModel) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.push_bits(model.time.seconds_of_week as u64, 20);
    w.push_bits(model.update_interval_tag as u64, 4);
    w.push_bits(model.multiple_message as u64, 1);
    w.push_bits(0, 4);
    w.push_scaled(model.quality, 1.0 / 20.0, 9);
    w.push_bits((model.layers.len() - 1) as u64, 2);

    for layer in &model.layers {
        w.push_scaled(layer.height, 1e4, 8);
        w.push_bits((layer.degree - 1) as u64, 4);
        w.push_bits((layer.order - 1) as u64, 4);

        let degree = layer.degree as usize;
        let order = layer.order as usize;
        for d in 0..=degree {
            for o in 0..=order.min(d) {
                w.push_signed_scaled(layer.cosine[d][o], 5e-3, 16);
            }
        }
        for d in 0..=degree {
            for o in 1..=order.min(d) {
                w.push_signed_scaled(layer.sine[d][o], 5e-3, 16);
            }
        }
    }
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(num_satellites: u8) -> SsrHeader {
        SsrHeader {
            epoch_time_sec: 518_430,
            update_interval_tag: 9,
            multiple_message: false,
            iod: 3,
            provider_id: SsrProviderId {
                provider_id: 123,
                solution_id: 0,
                issue_of_data: 7,
            },
            satellite_reference_datum: false,
            num_satellites,
        }
    }

    #[test]
    fn orbit_roundtrip_scenario_1() {
        let header = sample_header(1);
        let rec = OrbitCorrection {
            prn: SatellitePrn::new(Constellation::GPS, 1),
            sta_id: 1,
            time: GnssTime::new(2296, 518_430),
            update_interval_tag: header.update_interval_tag,
            iod: 42,
            delta_rsw: [0.1234, -0.0500, 0.0010],
            dot_delta_rsw: [1e-5, 0.0, 0.0],
        };
        let bytes = encode_orbit(Constellation::GPS, &header, &[rec]);
        let (decoded_header, entries) =
            decode_orbit(&bytes, Constellation::GPS, Encoding::RtcmSsr, 1, 2296).unwrap();
        assert_eq!(decoded_header.epoch_time_sec, 518_430);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].iod, 42);
        assert!((entries[0].delta_rsw[0] - 0.1234).abs() < 1e-3);
        assert!((entries[0].delta_rsw[1] - (-0.0500)).abs() < 1e-3);
    }

    #[test]
    fn clock_roundtrip_scenario_1() {
        let header = sample_header(1);
        let rec = ClockCorrection {
            prn: SatellitePrn::new(Constellation::GPS, 1),
            sta_id: 1,
            time: GnssTime::new(2296, 518_430),
            update_interval_tag: header.update_interval_tag,
            iod: 42,
            d_clk: 0.25 / SPEED_OF_LIGHT,
            dot_d_clk: 1e-6 / SPEED_OF_LIGHT,
            dot_dot_d_clk: 0.0,
        };
        let bytes = encode_clock(Constellation::GPS, &header, &[rec]);
        let (_, entries) = decode_clock(&bytes, Constellation::GPS, Encoding::RtcmSsr, 1, 2296).unwrap();
        assert!((entries[0].d_clk - 0.25 / SPEED_OF_LIGHT).abs() < 1e-4 / SPEED_OF_LIGHT);
    }

    #[test]
    fn code_bias_drops_unknown_signal_silently() {
        let header = sample_header(1);
        let rec = SatCodeBias {
            prn: SatellitePrn::new(Constellation::GPS, 1),
            sta_id: 1,
            time: GnssTime::new(2296, 0),
            update_interval_tag: 0,
            biases: vec![("1C".to_string(), 0.5)],
        };
        let bytes = encode_code_bias(Constellation::GPS, &header, &[rec]);
        let (_, entries) = decode_code_bias(&bytes, Constellation::GPS, 1, 2296).unwrap();
        assert_eq!(entries[0].biases.len(), 1);
        assert_eq!(entries[0].biases[0].0, "1C");
    }

    #[test]
    fn vtec_roundtrip_scenario_5() {
        let mut layer0 = VtecLayer {
            height: 450_000.0,
            degree: 3,
            order: 3,
            ..Default::default()
        };
        layer0.cosine[0][0] = 25.0;
        let layer1 = VtecLayer {
            height: 800_000.0,
            degree: 3,
            order: 3,
            ..Default::default()
        };
        let model = VtecModel {
            time: GnssTime::new(2296, 0),
            update_interval_tag: 0,
            sta_id: 1,
            quality: 1.0,
            layers: vec![layer0, layer1],
            multiple_message: true,
        };
        let bytes = encode_vtec(&model);
        let decoded = decode_vtec(&bytes, 1, 2296).unwrap();
        assert_eq!(decoded.layers.len(), 2);
        assert!((decoded.layers[0].cosine[0][0] - 25.0).abs() < 5e-3);
        assert!(decoded.multiple_message);
    }

    #[test]
    fn orbit_range_violation_is_rejected() {
        let header = sample_header(1);
        let prn = SatellitePrn::new(Constellation::GPS, 1);

        // minimum representable 22-bit two's-complement value decodes to
        // -209.7152 m, one step past the +-209.7151 gate (spec §4.9).
        let mut w = BitWriter::new();
        encode_header(&mut w, Constellation::GPS, true, &header);
        encode_sat_id(&mut w, Constellation::GPS, prn);
        w.push_bits(0, iod_bits(Constellation::GPS));
        w.push_bits(0x0020_0000, 22);
        w.push_bits(0, 20);
        w.push_bits(0, 20);
        w.push_bits(0, 21);
        w.push_bits(0, 19);
        w.push_bits(0, 19);
        let bytes = w.finish();

        let result = decode_orbit(&bytes, Constellation::GPS, Encoding::RtcmSsr, 1, 2296);
        assert_eq!(result, Err(SsrError::RangeViolation));
    }

    #[test]
    fn rtcm_message_number_table_matches_spec() {
        assert_eq!(
            rtcm_message_number(MessageId {
                system: Constellation::GPS,
                content: ContentKind::Combined
            }),
            Some(1060)
        );
        assert_eq!(
            rtcm_message_number(MessageId {
                system: Constellation::GPS,
                content: ContentKind::HrClock
            }),
            Some(1062)
        );
        assert_eq!(
            rtcm_message_number(MessageId {
                system: Constellation::BeiDou,
                content: ContentKind::PhaseBias
            }),
            Some(1270)
        );
        assert_eq!(
            rtcm_message_number(MessageId {
                system: Constellation::GPS,
                content: ContentKind::Vtec
            }),
            Some(1264)
        );
        assert_eq!(rtcm_message_id(1060).unwrap().content, ContentKind::Combined);
        assert_eq!(rtcm_message_id(9999), None);
    }

    #[test]
    fn igs_subtype_table_roundtrips() {
        let id = MessageId {
            system: Constellation::Galileo,
            content: ContentKind::PhaseBias,
        };
        let subtype = igs_subtype(id).unwrap();
        assert_eq!(igs_message_id(subtype), Some(id));
        assert_eq!(igs_message_id(IGS_VTEC_SUBTYPE).unwrap().content, ContentKind::Vtec);
    }
}
