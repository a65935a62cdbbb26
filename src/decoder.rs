//! Stream decoder (C6): per-mountpoint framing, SSR message routing, and
//! the epoch-ordered drain that turns decoded messages into dispatched
//! artifacts (spec §4.6).

use std::collections::{BTreeMap, HashMap};
#[cfg(feature = "nav")]
use std::sync::Arc;

use gnss_rs::prelude::Constellation;
use log::{debug, info, warn};

use crate::bits::{BitError, BitReader, BitWriter};
use crate::dispatcher::{Artifact, Dispatcher};
#[cfg(feature = "nav")]
use crate::ephemeris::pool::EphemerisPool;
use crate::frame::{self, FrameError};
use crate::prn::SatellitePrn;
use crate::ssr::codec::{self, ContentKind, Encoding, MessageId, SPEED_OF_LIGHT};
use crate::ssr::records::{ClockCorrection, OrbitCorrection, SatCodeBias, SatPhaseBias, SsrProviderId, VtecModel};
use crate::time::{resolve_last_epoch, GnssTime, SsrEncoding, SystemEpochSeconds};

const IGS_MESSAGE_NUMBER: u16 = 4076;

/// Re-packs the bits of `payload` starting at `skip_bits` into a freshly
/// byte-aligned buffer, so the result can be handed to the C3 codec
/// functions, which all assume their input starts at bit 0 of an SSR
/// header (spec §4.3). Zero-pads the final byte, same as the original
/// frame's own trailing pad.
fn rebitpack(payload: &[u8], skip_bits: u32) -> Result<Vec<u8>, BitError> {
    let mut reader = BitReader::new(payload);
    reader.skip(skip_bits)?;
    let mut writer = BitWriter::new();
    let mut remaining = reader.bits_remaining();
    while remaining > 0 {
        let take = remaining.min(32) as u32;
        let bits = reader.take_bits(take)?;
        writer.push_bits(bits, take);
        remaining -= take as usize;
    }
    Ok(writer.finish())
}

/// Classifies a raw RTCM3 payload's leading message-number (and, for
/// IGS-SSR, subtype byte) and returns the bit offset at which the SSR
/// header itself begins.
fn classify(payload: &[u8]) -> Option<(MessageId, Encoding, u32)> {
    let mut reader = BitReader::new(payload);
    let number = reader.take_bits(12).ok()? as u16;
    if number == IGS_MESSAGE_NUMBER {
        let subtype = reader.take_bits(8).ok()? as u8;
        let id = codec::igs_message_id(subtype)?;
        Some((id, Encoding::IgsSsr, 20))
    } else {
        let id = codec::rtcm_message_id(number)?;
        Some((id, Encoding::RtcmSsr, 12))
    }
}

type EpochMap<T> = BTreeMap<GnssTime, Vec<T>>;

/// Per-epoch, per-satellite bucket: a later message for the same `(prn,
/// time)` pair within a multi-message group (spec §4.6's "per-satellite
/// merging rule") replaces the earlier one rather than accumulating a
/// second entry, which is what keeps the §8 at-most-one-IOD invariant
/// ("for any (prn,time) at most one OrbitCorrection and one
/// ClockCorrection") from being violated when a plain ORBIT message and a
/// COMBINED message both carry the same satellite in one epoch group.
type PrnEpochMap<T> = BTreeMap<GnssTime, HashMap<SatellitePrn, T>>;

/// Per-stream decode state, spec §4.6.
pub struct StreamDecoder {
    sta_id: u32,
    buf: Vec<u8>,
    iods: std::collections::HashMap<SatellitePrn, u32>,
    last_clock_by_prn: std::collections::HashMap<SatellitePrn, ClockCorrection>,
    provider_id: SsrProviderId,
    last_time: Option<GnssTime>,

    orbit_queue: PrnEpochMap<OrbitCorrection>,
    clock_queue: PrnEpochMap<ClockCorrection>,
    code_bias_queue: EpochMap<SatCodeBias>,
    phase_bias_queue: EpochMap<SatPhaseBias>,
    vtec_queue: EpochMap<VtecModel>,

    /// C5, consulted to drop corrections for satellites whose current
    /// broadcast ephemeris marks them unhealthy (spec §2). `None` means
    /// no nav data was loaded for this hub instance; every satellite is
    /// then treated as healthy.
    #[cfg(feature = "nav")]
    ephemeris_pool: Option<Arc<EphemerisPool>>,
}

impl StreamDecoder {
    pub fn new(sta_id: u32) -> Self {
        Self {
            sta_id,
            buf: Vec::new(),
            iods: Default::default(),
            last_clock_by_prn: Default::default(),
            provider_id: SsrProviderId::default(),
            last_time: None,
            orbit_queue: BTreeMap::new(),
            clock_queue: BTreeMap::new(),
            code_bias_queue: BTreeMap::new(),
            phase_bias_queue: BTreeMap::new(),
            vtec_queue: BTreeMap::new(),
            #[cfg(feature = "nav")]
            ephemeris_pool: None,
        }
    }

    /// Attaches the shared ephemeris pool this decoder should consult
    /// when publishing orbit/clock corrections (spec §2).
    #[cfg(feature = "nav")]
    pub fn with_ephemeris_pool(mut self, pool: Arc<EphemerisPool>) -> Self {
        self.ephemeris_pool = Some(pool);
        self
    }

    #[cfg(feature = "nav")]
    fn is_healthy(&self, prn: SatellitePrn) -> bool {
        match &self.ephemeris_pool {
            Some(pool) => pool.is_healthy(prn.system, prn.number),
            None => true,
        }
    }

    #[cfg(not(feature = "nav"))]
    fn is_healthy(&self, _prn: SatellitePrn) -> bool {
        true
    }

    /// Appends `bytes` and processes as many complete frames as are
    /// available, publishing epoch-drained artifacts to `dispatcher`.
    /// `current_wall_gps` anchors epoch resolution (spec §4.4).
    pub fn decode(&mut self, bytes: &[u8], current_wall_gps: GnssTime, dispatcher: &Dispatcher) {
        self.buf.extend_from_slice(bytes);

        loop {
            match frame::decode(&self.buf) {
                Ok(frame) => {
                    let consumed = frame.consumed;
                    let payload = frame.payload.to_vec();
                    self.buf.drain(..consumed);
                    self.handle_payload(&payload, current_wall_gps, dispatcher);
                }
                Err(FrameError::ShortBuffer) | Err(FrameError::MessageExceedsBuffer) => break,
                Err(_) => {
                    if self.buf.is_empty() {
                        break;
                    }
                    self.buf.remove(0);
                }
            }
        }
    }

    fn handle_payload(&mut self, payload: &[u8], current_wall_gps: GnssTime, dispatcher: &Dispatcher) {
        let Some((id, encoding, skip_bits)) = classify(payload) else {
            debug!("{}: frame: unrecognised SSR message", self.sta_id);
            return;
        };
        let Ok(body) = rebitpack(payload, skip_bits) else {
            warn!("{}: frame: truncated SSR body", self.sta_id);
            return;
        };

        if let Err(err) = self.decode_content(id, encoding, &body, current_wall_gps, dispatcher) {
            warn!("{}: ssr: {err}", self.sta_id);
        }
    }

    fn decode_content(
        &mut self,
        id: MessageId,
        encoding: Encoding,
        body: &[u8],
        current_wall_gps: GnssTime,
        dispatcher: &Dispatcher,
    ) -> Result<(), crate::ssr::SsrError> {
        let week = current_wall_gps.week;

        match id.content {
            ContentKind::Orbit => {
                let (header, entries) = codec::decode_orbit(body, id.system, encoding, self.sta_id, week)?;
                let time = self.resolve(id.system, header.epoch_time_sec, false, current_wall_gps, encoding);
                for entry in entries {
                    self.iods.insert(entry.prn, entry.iod);
                    self.put_orbit(time, entry);
                }
                if !header.multiple_message {
                    self.close_orbit_group(time, dispatcher);
                }
                self.check_provider(header.provider_id, dispatcher);
            }
            ContentKind::Clock => {
                let (header, entries) = codec::decode_clock(body, id.system, encoding, self.sta_id, week)?;
                let time = self.resolve(id.system, header.epoch_time_sec, false, current_wall_gps, encoding);
                for mut entry in entries {
                    if let Some(iod) = self.iods.get(&entry.prn) {
                        entry.iod = *iod;
                        self.last_clock_by_prn.insert(entry.prn, entry);
                        self.put_clock(time, entry);
                    }
                }
                if !header.multiple_message {
                    self.close_clock_group(time, dispatcher);
                }
                self.check_provider(header.provider_id, dispatcher);
            }
            ContentKind::Combined => {
                let (header, orbits, clocks) = codec::decode_combined(body, id.system, encoding, self.sta_id, week)?;
                let time = self.resolve(id.system, header.epoch_time_sec, false, current_wall_gps, encoding);
                for entry in orbits {
                    self.iods.insert(entry.prn, entry.iod);
                    self.put_orbit(time, entry);
                }
                for mut entry in clocks {
                    entry.iod = self.iods.get(&entry.prn).copied().unwrap_or(entry.iod);
                    self.last_clock_by_prn.insert(entry.prn, entry);
                    self.put_clock(time, entry);
                }
                if !header.multiple_message {
                    self.close_orbit_group(time, dispatcher);
                    self.close_clock_group(time, dispatcher);
                }
                self.check_provider(header.provider_id, dispatcher);
            }
            ContentKind::HrClock => {
                let (header, deltas) = codec::decode_hr_clock(body, id.system, self.sta_id, week)?;
                let time = self.resolve(id.system, header.epoch_time_sec, false, current_wall_gps, encoding);
                for delta in deltas {
                    if let Some(mut base) = self.last_clock_by_prn.get(&delta.prn).copied() {
                        base.d_clk += delta.delta_m / SPEED_OF_LIGHT;
                        base.time = time;
                        self.last_clock_by_prn.insert(delta.prn, base);
                        self.put_clock(time, base);
                    }
                }
                if !header.multiple_message {
                    self.close_clock_group(time, dispatcher);
                }
                self.check_provider(header.provider_id, dispatcher);
            }
            ContentKind::CodeBias => {
                let (header, entries) = codec::decode_code_bias(body, id.system, self.sta_id, week)?;
                let time = self.resolve(id.system, header.epoch_time_sec, false, current_wall_gps, encoding);
                for mut entry in entries {
                    entry.time = time;
                    self.code_bias_queue.entry(time).or_default().push(entry);
                }
                self.check_provider(header.provider_id, dispatcher);
            }
            ContentKind::PhaseBias => {
                let (header, entries) = codec::decode_phase_bias(body, id.system, self.sta_id, week)?;
                let time = self.resolve(id.system, header.epoch_time_sec, false, current_wall_gps, encoding);
                for mut entry in entries {
                    entry.time = time;
                    self.phase_bias_queue.entry(time).or_default().push(entry);
                }
                self.check_provider(header.provider_id, dispatcher);
            }
            ContentKind::Vtec => {
                let model = codec::decode_vtec(body, self.sta_id, week)?;
                let time = self.resolve(
                    id.system,
                    model.time.seconds_of_week as u32,
                    true,
                    current_wall_gps,
                    encoding,
                );
                let multiple_message = model.multiple_message;
                let mut model = model;
                model.time = time;
                if !model.layers.is_empty() {
                    self.vtec_queue.entry(time).or_default().push(model);
                }
                if !multiple_message {
                    if let Some(batch) = self.vtec_queue.remove(&time) {
                        for model in batch {
                            dispatcher.publish(Artifact::Vtec(model));
                        }
                    }
                }
            }
            ContentKind::Ura => {
                // URA-only messages carry no orbit/clock/bias payload the
                // hub re-broadcasts on its own; header parsed and dropped.
            }
        }

        self.last_time = Some(current_wall_gps);
        self.drain(dispatcher);
        Ok(())
    }

    fn resolve(
        &self,
        system: Constellation,
        epoch_time_sec: u32,
        is_vtec: bool,
        current_wall_gps: GnssTime,
        encoding: Encoding,
    ) -> GnssTime {
        let mut per_system = SystemEpochSeconds::default();
        let secs = epoch_time_sec as i64;
        if is_vtec {
            per_system.vtec = Some(secs);
        } else {
            match system {
                Constellation::GPS => per_system.gps = Some(secs),
                Constellation::Glonass => per_system.glonass = Some(secs),
                Constellation::Galileo => per_system.galileo = Some(secs),
                Constellation::QZSS => per_system.qzss = Some(secs),
                Constellation::SBAS => per_system.sbas = Some(secs),
                Constellation::BeiDou => per_system.beidou = Some(secs),
                _ => per_system.gps = Some(secs),
            }
        }
        let ssr_encoding = match encoding {
            Encoding::RtcmSsr => SsrEncoding::RtcmSsr,
            Encoding::IgsSsr => SsrEncoding::IgsSsr,
        };
        resolve_last_epoch(&per_system, current_wall_gps, ssr_encoding).unwrap_or(current_wall_gps)
    }

    fn check_provider(&mut self, observed: SsrProviderId, dispatcher: &Dispatcher) {
        if !observed.is_zero() && observed != self.provider_id {
            self.provider_id = observed;
            info!("{}: ssr: provider id changed to {:?}", self.sta_id, observed);
            dispatcher.publish(Artifact::ProviderIdChanged { sta_id: self.sta_id });
        }
    }

    /// Inserts/overwrites `entry` keyed by `(time, entry.prn)`: a later
    /// message for the same satellite in the same epoch group replaces the
    /// earlier one instead of appending a duplicate (spec §4.6).
    fn put_orbit(&mut self, time: GnssTime, entry: OrbitCorrection) {
        let mut entry = entry;
        entry.time = time;
        self.orbit_queue.entry(time).or_default().insert(entry.prn, entry);
    }

    fn put_clock(&mut self, time: GnssTime, entry: ClockCorrection) {
        let mut entry = entry;
        entry.time = time;
        self.clock_queue.entry(time).or_default().insert(entry.prn, entry);
    }

    /// Flushes the orbit bucket for `time` immediately, without waiting
    /// for a later epoch to trigger the generic drain — used when
    /// `header.multiple_message` signals this was the last message of the
    /// group (spec §4.6).
    fn close_orbit_group(&mut self, time: GnssTime, dispatcher: &Dispatcher) {
        if let Some(batch) = self.orbit_queue.remove(&time) {
            let batch: Vec<OrbitCorrection> = batch.into_values().filter(|e| self.is_healthy(e.prn)).collect();
            if !batch.is_empty() {
                dispatcher.publish(Artifact::OrbitCorrections(batch));
            }
        }
    }

    fn close_clock_group(&mut self, time: GnssTime, dispatcher: &Dispatcher) {
        if let Some(batch) = self.clock_queue.remove(&time) {
            let batch: Vec<ClockCorrection> = batch.into_values().filter(|e| self.is_healthy(e.prn)).collect();
            if !batch.is_empty() {
                dispatcher.publish(Artifact::ClockCorrections(batch));
            }
        }
    }

    /// Emits every queue entry whose key is strictly less than `lastTime`,
    /// in key order, then removes it (spec §4.6 step 6). This is the
    /// fallback path for groups whose closing (`multiple_message == false`)
    /// message never arrives.
    fn drain(&mut self, dispatcher: &Dispatcher) {
        let Some(last_time) = self.last_time else { return };

        #[cfg(feature = "nav")]
        let ephemeris_pool = self.ephemeris_pool.clone();
        #[cfg(feature = "nav")]
        let is_healthy = move |prn: SatellitePrn| -> bool {
            ephemeris_pool.as_ref().map(|p| p.is_healthy(prn.system, prn.number)).unwrap_or(true)
        };
        #[cfg(not(feature = "nav"))]
        let is_healthy = |_prn: SatellitePrn| -> bool { true };

        drain_before_prn_map(&mut self.orbit_queue, last_time, |batch| {
            let batch: Vec<OrbitCorrection> = batch.into_iter().filter(|e| is_healthy(e.prn)).collect();
            if !batch.is_empty() {
                dispatcher.publish(Artifact::OrbitCorrections(batch));
            }
        });
        drain_before_prn_map(&mut self.clock_queue, last_time, |batch| {
            let batch: Vec<ClockCorrection> = batch.into_iter().filter(|e| is_healthy(e.prn)).collect();
            if !batch.is_empty() {
                dispatcher.publish(Artifact::ClockCorrections(batch));
            }
        });
        drain_before(&mut self.code_bias_queue, last_time, |batch| {
            dispatcher.publish(Artifact::CodeBiases(batch));
        });
        drain_before(&mut self.phase_bias_queue, last_time, |batch| {
            dispatcher.publish(Artifact::PhaseBiases(batch));
        });
        drain_before(&mut self.vtec_queue, last_time, |batch| {
            for model in batch {
                dispatcher.publish(Artifact::Vtec(model));
            }
        });
    }
}

fn drain_before<T>(queue: &mut EpochMap<T>, last_time: GnssTime, mut emit: impl FnMut(Vec<T>)) {
    let ready_keys: Vec<GnssTime> = queue.range(..last_time).map(|(k, _)| *k).collect();
    for key in ready_keys {
        if let Some(batch) = queue.remove(&key) {
            emit(batch);
        }
    }
}

fn drain_before_prn_map<T>(queue: &mut PrnEpochMap<T>, last_time: GnssTime, mut emit: impl FnMut(Vec<T>)) {
    let ready_keys: Vec<GnssTime> = queue.range(..last_time).map(|(k, _)| *k).collect();
    for key in ready_keys {
        if let Some(batch) = queue.remove(&key) {
            if !batch.is_empty() {
                emit(batch.into_values().collect());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssr::codec::{encode_orbit, SsrHeader};
    use crate::ssr::records::SsrProviderId as Pid;

    fn framed_orbit(week: i64, epoch: u32, prn: u16, multiple_message: bool) -> Vec<u8> {
        let header = SsrHeader {
            epoch_time_sec: epoch,
            update_interval_tag: 5,
            multiple_message,
            iod: 1,
            provider_id: Pid {
                provider_id: 7,
                solution_id: 0,
                issue_of_data: 1,
            },
            satellite_reference_datum: false,
            num_satellites: 1,
        };
        let rec = OrbitCorrection {
            prn: SatellitePrn::new(Constellation::GPS, prn),
            sta_id: 0,
            time: GnssTime::new(week, epoch as i64),
            update_interval_tag: header.update_interval_tag,
            iod: 1,
            delta_rsw: [0.1, 0.0, 0.0],
            dot_delta_rsw: [0.0, 0.0, 0.0],
        };
        let body = encode_orbit(Constellation::GPS, &header, &[rec]);

        let mut writer = BitWriter::new();
        writer.push_bits(1057, 12);
        for byte in body {
            writer.push_bits(byte as u64, 8);
        }
        let payload = writer.finish();
        frame::encode(&payload).unwrap()
    }

    #[test]
    fn closes_group_immediately_when_multiple_message_is_false() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.subscribe();
        let mut decoder = StreamDecoder::new(1);

        let wall = GnssTime::new(2296, 100);
        decoder.decode(&framed_orbit(2296, 100, 1, false), wall, &dispatcher);
        let pending = dispatcher.take_pending(sub);
        assert!(pending
            .iter()
            .any(|a| matches!(a, Artifact::OrbitCorrections(v) if v[0].prn.number == 1)));
    }

    #[test]
    fn waits_for_later_epoch_when_multiple_message_is_true() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.subscribe();
        let mut decoder = StreamDecoder::new(1);

        let wall = GnssTime::new(2296, 100);
        decoder.decode(&framed_orbit(2296, 100, 1, true), wall, &dispatcher);
        // still open: no closing message arrived, so only the later epoch's
        // generic drain should flush it.
        assert!(!dispatcher
            .take_pending(sub)
            .iter()
            .any(|a| matches!(a, Artifact::OrbitCorrections(_))));

        let wall2 = GnssTime::new(2296, 105);
        decoder.decode(&framed_orbit(2296, 105, 2, false), wall2, &dispatcher);
        let pending = dispatcher.take_pending(sub);
        assert!(pending
            .iter()
            .any(|a| matches!(a, Artifact::OrbitCorrections(v) if v[0].prn.number == 1)));
    }

    #[test]
    fn later_message_in_group_supersedes_earlier_one_for_same_prn() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.subscribe();
        let mut decoder = StreamDecoder::new(1);

        let wall = GnssTime::new(2296, 100);
        // two messages at the same epoch, same prn: first keeps the group
        // open, second closes it. Only one OrbitCorrection must survive
        // (spec §8's at-most-one-per-(prn,time) invariant).
        decoder.decode(&framed_orbit(2296, 100, 1, true), wall, &dispatcher);
        decoder.decode(&framed_orbit(2296, 100, 1, false), wall, &dispatcher);

        let pending = dispatcher.take_pending(sub);
        let corrections: Vec<_> = pending
            .iter()
            .filter_map(|a| match a {
                Artifact::OrbitCorrections(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].len(), 1);
    }

    #[test]
    fn provider_id_change_is_published() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.subscribe();
        let mut decoder = StreamDecoder::new(1);
        decoder.decode(&framed_orbit(2296, 100, 1, false), GnssTime::new(2296, 100), &dispatcher);
        let pending = dispatcher.take_pending(sub);
        assert!(pending
            .iter()
            .any(|a| matches!(a, Artifact::ProviderIdChanged { .. })));
    }
}
