//! Time model (C4): GPS week/seconds-of-week arithmetic and the
//! multi-constellation epoch resolution algorithm from spec §4.4.

use gnss_rs::prelude::Constellation;

pub const SECONDS_PER_WEEK: i64 = 604_800;

/// GPS week counter plus seconds-of-week. Ordered; arithmetic in seconds.
/// Invariant: `0 <= seconds_of_week < SECONDS_PER_WEEK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GnssTime {
    pub week: i64,
    pub seconds_of_week: i64,
}

impl GnssTime {
    pub fn new(week: i64, seconds_of_week: i64) -> Self {
        let mut t = Self {
            week,
            seconds_of_week,
        };
        t.normalize();
        t
    }

    fn normalize(&mut self) {
        while self.seconds_of_week < 0 {
            self.seconds_of_week += SECONDS_PER_WEEK;
            self.week -= 1;
        }
        while self.seconds_of_week >= SECONDS_PER_WEEK {
            self.seconds_of_week -= SECONDS_PER_WEEK;
            self.week += 1;
        }
    }

    /// Total seconds since the GPS time origin.
    pub fn total_seconds(&self) -> i64 {
        self.week * SECONDS_PER_WEEK + self.seconds_of_week
    }

    pub fn add_seconds(&self, secs: i64) -> Self {
        Self::new(self.week, self.seconds_of_week + secs)
    }

    pub fn diff_seconds(&self, other: &Self) -> i64 {
        self.total_seconds() - other.total_seconds()
    }
}

/// Leap second steps (GPS-UTC), immutable after load, most recent first:
/// (GPS week, leap seconds valid
/// from that week onward). GPS-UTC was 18s from 2017-01-01 onward.
const LEAP_SECOND_STEPS: &[(i64, i64)] = &[
    (1930, 18), // 2017-01-01
    (1851, 17), // 2015-07-01
    (1762, 16), // 2012-07-01
    (1669, 15), // 2009-01-01
    (1512, 14), // 2006-01-01
    (0, 13),
];

/// Current GPS-UTC leap second count for a given GPS week.
pub fn leap_seconds(gps_week: i64) -> i64 {
    for (week, leap) in LEAP_SECOND_STEPS {
        if gps_week >= *week {
            return *leap;
        }
    }
    0
}

/// BDS time runs 14 seconds behind GPS time (constant offset, no leap
/// second drift of its own since BDS epoch January 2006).
pub const BDS_GPS_OFFSET_SECONDS: i64 = 14;

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Proleptic-Gregorian day count from the GPS epoch, 1980-01-06 (a
/// Sunday, day 0 of GPS week 0).
fn days_since_gps_epoch(year: i32, month: u32, day: u32) -> i64 {
    let mut days: i64 = 0;
    if year >= 1980 {
        for y in 1980..year {
            days += if is_leap_year(y) { 366 } else { 365 };
        }
    } else {
        for y in year..1980 {
            days -= if is_leap_year(y) { 366 } else { 365 };
        }
    }
    const MONTH_DAYS: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    for (index, len) in MONTH_DAYS.iter().enumerate().take(month as usize - 1) {
        days += len;
        if index == 1 && is_leap_year(year) {
            days += 1;
        }
    }
    days + day as i64 - 1 - 5
}

/// Day-of-week within the GPS week (0 = Sunday) for a civil date, used to
/// resolve a RINEX nav epoch's seconds-of-week (spec §4.5).
pub fn gps_day_of_week(year: i32, month: u32, day: u32) -> i64 {
    days_since_gps_epoch(year, month, day).rem_euclid(7)
}

/// Absolute GPS week number for a civil date. Used when loading a RINEX
/// navigation file offline, where there is no live wall clock to anchor
/// epoch resolution the way decoded SSR streams have (spec §4.5).
pub fn gps_week_of(year: i32, month: u32, day: u32) -> i64 {
    days_since_gps_epoch(year, month, day).div_euclid(7)
}

/// Per-system epoch seconds observed in a single SSR frame, in the
/// priority order used by [`resolve_last_epoch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEpochSeconds {
    pub gps: Option<i64>,
    pub gps_code_phase_bias: Option<i64>,
    pub vtec: Option<i64>,
    pub glonass: Option<i64>,
    pub galileo: Option<i64>,
    pub qzss: Option<i64>,
    pub sbas: Option<i64>,
    pub beidou: Option<i64>,
}

/// Which SSR bit-stream encoding produced the epoch fields: the GLONASS
/// and BeiDou adjustment rules differ slightly between the two (§4.4,
/// and the Open Question about the IGS encoder-bug workaround).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsrEncoding {
    RtcmSsr,
    IgsSsr,
}

/// Resolves the wall-clock-anchored [`GnssTime`] for one decoded SSR
/// message, per spec §4.4.
pub fn resolve_last_epoch(
    per_system: &SystemEpochSeconds,
    current_wall_gps: GnssTime,
    encoding: SsrEncoding,
) -> Option<GnssTime> {
    // Step 1: first available system in priority order, remembering which
    // constellation's seconds won (needed for the GLONASS/BDS rules below).
    let (chosen_seconds, chosen_system) = [
        (per_system.gps, Constellation::GPS),
        (per_system.gps_code_phase_bias, Constellation::GPS),
        (per_system.vtec, Constellation::GPS),
        (per_system.glonass, Constellation::Glonass),
        (per_system.galileo, Constellation::Galileo),
        (per_system.qzss, Constellation::QZSS),
        (per_system.sbas, Constellation::SBAS),
        (per_system.beidou, Constellation::BeiDou),
    ]
    .into_iter()
    .find_map(|(secs, sys)| secs.map(|s| (s, sys)))?;

    let mut last_time = GnssTime::new(current_wall_gps.week, chosen_seconds);

    let leap = leap_seconds(current_wall_gps.week);

    match chosen_system {
        Constellation::Glonass => match encoding {
            SsrEncoding::RtcmSsr => {
                last_time = last_time.add_seconds(-3 * 3600 + leap);
            }
            SsrEncoding::IgsSsr => {
                // encoder-bug workaround: only apply when GLONASS seconds
                // actually differ from the (possibly absent) GPS epoch.
                if per_system.gps.is_none() || per_system.gps != Some(chosen_seconds) {
                    last_time = last_time.add_seconds(leap);
                }
            }
        },
        Constellation::BeiDou => {
            let apply = match encoding {
                SsrEncoding::RtcmSsr => true,
                SsrEncoding::IgsSsr => per_system.gps.is_none() || per_system.gps != Some(chosen_seconds),
            };
            if apply {
                last_time = last_time.add_seconds(BDS_GPS_OFFSET_SECONDS);
            }
        }
        _ => {}
    }

    // Step 5: normalise to within +/-12h of the current wall clock.
    let half_week = SECONDS_PER_WEEK / 2;
    let quarter_day = 12 * 3600;
    while last_time.diff_seconds(&current_wall_gps) > quarter_day && half_week > quarter_day {
        last_time = last_time.add_seconds(-2 * quarter_day);
    }
    while last_time.diff_seconds(&current_wall_gps) < -quarter_day {
        last_time = last_time.add_seconds(2 * quarter_day);
    }
    while last_time.diff_seconds(&current_wall_gps) > quarter_day {
        last_time = last_time.add_seconds(-2 * quarter_day);
    }

    Some(last_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gps_epoch_is_day_zero_sunday() {
        assert_eq!(gps_day_of_week(1980, 1, 6), 0);
        assert_eq!(gps_day_of_week(1980, 1, 7), 1);
        assert_eq!(gps_day_of_week(1980, 1, 12), 6);
        assert_eq!(gps_day_of_week(1980, 1, 13), 0);
    }

    #[test]
    fn gps_day_of_week_matches_known_date() {
        // 2024-01-08 was a Monday.
        assert_eq!(gps_day_of_week(2024, 1, 8), 1);
    }

    #[test]
    fn gps_week_of_matches_known_date() {
        // 2024-01-08 fell in GPS week 2296 (week 0 started 1980-01-06).
        assert_eq!(gps_week_of(2024, 1, 8), 2296);
        assert_eq!(gps_week_of(1980, 1, 6), 0);
        assert_eq!(gps_week_of(1980, 1, 13), 1);
    }

    #[test]
    fn fixpoint() {
        let wall = GnssTime::new(2296, 518430);
        let per_system = SystemEpochSeconds {
            gps: Some(518430),
            ..Default::default()
        };
        let resolved = resolve_last_epoch(&per_system, wall, SsrEncoding::RtcmSsr).unwrap();
        assert_eq!(resolved, wall);
    }

    #[test]
    fn glonass_rtcm_ssr_offset() {
        // scenario 4 from spec.md: SsrEpoch GLO=3600, leap=18
        let wall = GnssTime::new(2296, 5);
        let per_system = SystemEpochSeconds {
            glonass: Some(3600),
            ..Default::default()
        };
        let resolved = resolve_last_epoch(&per_system, wall, SsrEncoding::RtcmSsr).unwrap();
        assert!(resolved.diff_seconds(&wall).abs() <= 12 * 3600);
    }

    #[test]
    fn beidou_offset_wraps() {
        let wall = GnssTime::new(2296, SECONDS_PER_WEEK - 1);
        let per_system = SystemEpochSeconds {
            beidou: Some(SECONDS_PER_WEEK - 1),
            ..Default::default()
        };
        let resolved = resolve_last_epoch(&per_system, wall, SsrEncoding::RtcmSsr).unwrap();
        assert!(resolved.diff_seconds(&wall).abs() <= 12 * 3600);
    }

    #[test]
    fn no_system_present_is_invalid() {
        let wall = GnssTime::new(2296, 0);
        let per_system = SystemEpochSeconds::default();
        assert!(resolve_last_epoch(&per_system, wall, SsrEncoding::RtcmSsr).is_none());
    }
}
