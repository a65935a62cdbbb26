//! Output sinks (spec §6): the rolling per-mountpoint correction log and a
//! `RawByteSink` trait object for passthrough consumers (TCP re-broadcast,
//! serial, etc — the concrete transports are out of scope, spec §9).
//!
//! Grounded on BNC's `bncrinex.cpp` rolling-file convention (hour/day-of-
//! year naming, `_MC.ssr`/`_ION.ssr` suffix), minus its GUI-only parts.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::dispatcher::Artifact;
#[cfg(feature = "nav")]
use crate::ephemeris;
use crate::time::GnssTime;

/// Rolling interval choices for the correction log (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollInterval {
    OneMin,
    TwoMin,
    FiveMin,
    TenMin,
    FifteenMin,
    ThirtyMin,
    OneHour,
    OneDay,
}

impl RollInterval {
    fn minutes(self) -> i64 {
        match self {
            RollInterval::OneMin => 1,
            RollInterval::TwoMin => 2,
            RollInterval::FiveMin => 5,
            RollInterval::TenMin => 10,
            RollInterval::FifteenMin => 15,
            RollInterval::ThirtyMin => 30,
            RollInterval::OneHour => 60,
            RollInterval::OneDay => 24 * 60,
        }
    }
}

/// A rough GPS-time-to-calendar conversion used only for file naming;
/// not precise UTC, adequate for a roll-boundary filename stamp.
fn calendar_stamp(time: GnssTime) -> (i32, u32, u32, u32) {
    const GPS_EPOCH_UNIX: i64 = 315_964_800;
    let unix = GPS_EPOCH_UNIX + time.total_seconds();
    let days_since_epoch = unix.div_euclid(86_400);
    let secs_of_day = unix.rem_euclid(86_400);
    let hour = (secs_of_day / 3600) as u32;
    let minute = ((secs_of_day % 3600) / 60) as u32;

    // Days since 1970-01-01 -> (year, day-of-year), proleptic Gregorian.
    let mut year = 1970i32;
    let mut remaining = days_since_epoch;
    loop {
        let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
        let days_in_year = if leap { 366 } else { 365 };
        if remaining < days_in_year {
            break;
        }
        remaining -= days_in_year;
        year += 1;
    }
    (year, remaining as u32 + 1, hour, minute)
}

/// Rolling correction log for one mountpoint. Opens a fresh file each
/// time the roll boundary is crossed.
pub struct CorrectionLog {
    dir: PathBuf,
    sta_id: String,
    is_ionosphere: bool,
    interval: RollInterval,
    current_file: Option<File>,
    current_boundary: Option<i64>,
}

impl CorrectionLog {
    pub fn new(dir: impl Into<PathBuf>, sta_id: impl Into<String>, interval: RollInterval) -> Self {
        let sta_id = sta_id.into();
        Self {
            dir: dir.into(),
            is_ionosphere: sta_id.contains("ION"),
            sta_id,
            interval,
            current_file: None,
            current_boundary: None,
        }
    }

    fn boundary_for(&self, time: GnssTime) -> i64 {
        time.total_seconds().div_euclid(self.interval.minutes() * 60)
    }

    fn file_name(&self, time: GnssTime) -> String {
        let (year, doy, hour, minute) = calendar_stamp(time);
        let suffix = if self.is_ionosphere { "_ION.ssr" } else { "_MC.ssr" };
        format!("{}{:03}{:02}{:02}_{}{}", year % 100, doy, hour, minute, self.sta_id, suffix)
    }

    fn ensure_file(&mut self, time: GnssTime) -> std::io::Result<&mut File> {
        let boundary = self.boundary_for(time);
        if self.current_boundary != Some(boundary) {
            fs::create_dir_all(&self.dir)?;
            let path = self.dir.join(self.file_name(time));
            self.current_file = Some(OpenOptions::new().create(true).append(true).open(path)?);
            self.current_boundary = Some(boundary);
        }
        Ok(self.current_file.as_mut().expect("just opened"))
    }

    /// Appends one self-delimited text block for `artifact`. Round-trip
    /// layout: a `> <kind> <week> <sow> <count>` header line followed by
    /// one line per record, machine-parseable by a symmetric reader.
    pub fn write_artifact(&mut self, artifact: &Artifact) -> std::io::Result<()> {
        let (time, block) = match artifact {
            Artifact::OrbitCorrections(entries) => {
                let Some(first) = entries.first() else { return Ok(()) };
                let mut block = format!("> ORBIT {} {} {}\n", first.time.week, first.time.seconds_of_week, entries.len());
                for e in entries {
                    block.push_str(&format!(
                        "{:?} {} {} {:.4} {:.4} {:.4} {:.6} {:.6} {:.6}\n",
                        e.prn.system,
                        e.prn.number,
                        e.iod,
                        e.delta_rsw[0],
                        e.delta_rsw[1],
                        e.delta_rsw[2],
                        e.dot_delta_rsw[0],
                        e.dot_delta_rsw[1],
                        e.dot_delta_rsw[2],
                    ));
                }
                (first.time, block)
            }
            Artifact::ClockCorrections(entries) => {
                let Some(first) = entries.first() else { return Ok(()) };
                let mut block = format!("> CLOCK {} {} {}\n", first.time.week, first.time.seconds_of_week, entries.len());
                for e in entries {
                    block.push_str(&format!(
                        "{:?} {} {:.9} {:.12} {:.12}\n",
                        e.prn.system, e.prn.number, e.d_clk, e.dot_d_clk, e.dot_dot_d_clk
                    ));
                }
                (first.time, block)
            }
            Artifact::Vtec(model) => {
                let block = format!(
                    "> VTEC {} {} {}\n",
                    model.time.week,
                    model.time.seconds_of_week,
                    model.layers.len()
                );
                (model.time, block)
            }
            Artifact::CodeBiases(entries) => {
                let Some(first) = entries.first() else { return Ok(()) };
                let mut block = format!("> CODEBIAS {} {} {}\n", first.time.week, first.time.seconds_of_week, entries.len());
                for e in entries {
                    block.push_str(&format!("{:?} {}", e.prn.system, e.prn.number));
                    for (rnx, bias) in &e.biases {
                        block.push_str(&format!(" {rnx}:{bias:.4}"));
                    }
                    block.push('\n');
                }
                (first.time, block)
            }
            Artifact::PhaseBiases(entries) => {
                let Some(first) = entries.first() else { return Ok(()) };
                let mut block = format!("> PHASEBIAS {} {} {}\n", first.time.week, first.time.seconds_of_week, entries.len());
                for e in entries {
                    block.push_str(&format!(
                        "{:?} {} {:.6} {:.9}",
                        e.prn.system, e.prn.number, e.yaw_angle, e.yaw_rate
                    ));
                    for signal in &e.entries {
                        let rnx = std::str::from_utf8(&signal.rinex_signal).unwrap_or("??");
                        block.push_str(&format!(" {rnx}:{:.4}", signal.bias));
                    }
                    block.push('\n');
                }
                (first.time, block)
            }
            #[cfg(feature = "nav")]
            Artifact::Ephemeris(eph) => {
                let toc = ephemeris::Ephemeris::toc(eph);
                let prn = ephemeris::Ephemeris::prn(eph);
                let block = format!("> EPHEMERIS {} {} 1\n{:?} {} {}\n", toc.week, toc.seconds_of_week, prn.system, prn.number, toc.seconds_of_week);
                (toc, block)
            }
            _ => return Ok(()),
        };

        let file = self.ensure_file(time)?;
        file.write_all(block.as_bytes())
    }
}

/// Passthrough consumer for raw decoded bytes (spec §9 design note: kept
/// as a trait object in place of the teacher's concrete serial/TCP
/// outputs, which are outside this core's scope).
pub trait RawByteSink: Send {
    fn send(&mut self, sta_id: u32, bytes: &[u8]);
}

/// A `RawByteSink` that appends to a plain file, useful for tests and for
/// the simplest possible `outFile` configuration.
pub struct FileRawByteSink {
    file: File,
}

impl FileRawByteSink {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            file: OpenOptions::new().create(true).append(true).open(path)?,
        })
    }
}

impl RawByteSink for FileRawByteSink {
    fn send(&mut self, _sta_id: u32, bytes: &[u8]) {
        let _ = self.file.write_all(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prn::SatellitePrn;
    use crate::ssr::records::{OrbitCorrection, SatCodeBias};
    use gnss_rs::prelude::Constellation;

    #[test]
    fn ionosphere_suffix_selected_from_sta_id() {
        let log = CorrectionLog::new("/tmp", "RION1", RollInterval::OneMin);
        assert!(log.is_ionosphere);
        let log = CorrectionLog::new("/tmp", "RSTD1", RollInterval::OneMin);
        assert!(!log.is_ionosphere);
    }

    #[test]
    fn writes_and_rolls_correction_log() {
        let tmp = std::env::temp_dir().join(format!("gnss-ssr-hub-test-{}", std::process::id()));
        let mut log = CorrectionLog::new(&tmp, "STD1", RollInterval::OneMin);

        let artifact = Artifact::OrbitCorrections(vec![OrbitCorrection {
            prn: SatellitePrn::new(Constellation::GPS, 5),
            sta_id: 1,
            time: GnssTime::new(2296, 100),
            update_interval_tag: 0,
            iod: 1,
            delta_rsw: [0.1, 0.2, 0.3],
            dot_delta_rsw: [0.0, 0.0, 0.0],
        }]);
        log.write_artifact(&artifact).unwrap();
        assert!(log.current_file.is_some());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn writes_code_bias_block() {
        let tmp = std::env::temp_dir().join(format!("gnss-ssr-hub-test-bias-{}", std::process::id()));
        let mut log = CorrectionLog::new(&tmp, "STD1", RollInterval::OneMin);

        let artifact = Artifact::CodeBiases(vec![SatCodeBias {
            prn: SatellitePrn::new(Constellation::GPS, 5),
            sta_id: 1,
            time: GnssTime::new(2296, 100),
            update_interval_tag: 0,
            biases: vec![("1C".to_string(), 0.5)],
        }]);
        log.write_artifact(&artifact).unwrap();
        assert!(log.current_file.is_some());

        let _ = fs::remove_dir_all(&tmp);
    }
}
