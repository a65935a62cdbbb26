//! Ephemeris pool: the one piece of shared mutable state C6 consults to
//! annotate and health-gate correction records (spec §2, §5: "no global
//! mutable state beyond the dispatcher singleton, the ephemeris pool, and
//! the leap-second table"). Readers far outnumber writers (every decode
//! call looks a satellite up; only RINEX nav ingestion writes), so a
//! `RwLock` is used rather than the dispatcher's single `Mutex`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use gnss_rs::prelude::Constellation;

use super::Ephemeris;

/// Keyed on (system, number) rather than the full `SatellitePrn`: a
/// decoded `OrbitCorrection`/`ClockCorrection` carries an undefined
/// `nav_message_type`, so the lookup must ignore it to find the
/// satellite's current ephemeris regardless of which message type last
/// updated it.
type Key = (Constellation, u16);

#[derive(Default)]
struct Inner {
    latest: HashMap<Key, Ephemeris>,
}

/// Shared, thread-safe registry of the most recently loaded ephemeris per
/// satellite (spec §4.5, §5).
#[derive(Default)]
pub struct EphemerisPool {
    inner: RwLock<Inner>,
}

impl EphemerisPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replaces the stored ephemeris for this satellite if `eph` is newer
    /// (by `toc`) than what is already there, or if nothing is stored yet.
    pub fn update(&self, eph: Ephemeris) {
        let key = (eph.prn().system, eph.prn().number);
        let mut inner = self.inner.write().expect("ephemeris pool poisoned");
        match inner.latest.get(&key) {
            Some(existing) if existing.toc() >= eph.toc() => {}
            _ => {
                inner.latest.insert(key, eph);
            }
        }
    }

    pub fn get(&self, system: Constellation, number: u16) -> Option<Ephemeris> {
        let inner = self.inner.read().expect("ephemeris pool poisoned");
        inner.latest.get(&(system, number)).copied()
    }

    /// Health-gate used by C6 (spec §2: "C5 is consulted by C6 to
    /// annotate correction records with system flags"). A satellite with
    /// no ephemeris on file is treated as healthy — C5 has nothing to say
    /// about it, so C6 still forwards the correction.
    pub fn is_healthy(&self, system: Constellation, number: u16) -> bool {
        self.get(system, number).map(|eph| super::is_healthy(&eph)).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("ephemeris pool poisoned").latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::KeplerEphemeris;
    use crate::prn::{NavMessageType, SatellitePrn};
    use crate::time::GnssTime;

    fn sample(prn: u16, toc: i64, sv_health: u32) -> Ephemeris {
        Ephemeris::Gps(KeplerEphemeris {
            prn: SatellitePrn::new(Constellation::GPS, prn).with_nav_message_type(NavMessageType::Lnav),
            toc: GnssTime::new(2296, toc),
            clock_bias: 0.0,
            clock_drift: 0.0,
            clock_drift_rate: 0.0,
            keplerian: crate::ephemeris::kepler::Keplerian {
                toe: GnssTime::new(2296, toc),
                sma_m: 26_560_000.0,
                ecc: 0.01,
                inc_rad: 0.9,
                longan_rad: 0.0,
                ma_rad: 0.0,
                aop_rad: 0.0,
                dn_rad: 0.0,
                i_dot_rad_s: 0.0,
                omega_dot_rad_s: 0.0,
                cus_rad: 0.0,
                cuc_rad: 0.0,
                cis_rad: 0.0,
                cic_rad: 0.0,
                crs_m: 0.0,
                crc_m: 0.0,
            },
            iode: 1,
            iodc: 1,
            sv_health,
            ura_m: 2.0,
            group_delay_s: 0.0,
        })
    }

    #[test]
    fn newer_toc_replaces_older_entry() {
        let pool = EphemerisPool::new();
        pool.update(sample(1, 100, 0));
        pool.update(sample(1, 50, 0));
        let stored = pool.get(Constellation::GPS, 1).unwrap();
        assert_eq!(stored.toc(), GnssTime::new(2296, 100));
    }

    #[test]
    fn unhealthy_flag_is_surfaced() {
        let pool = EphemerisPool::new();
        pool.update(sample(2, 100, 1));
        assert!(!pool.is_healthy(Constellation::GPS, 2));
    }

    #[test]
    fn unknown_satellite_is_treated_as_healthy() {
        let pool = EphemerisPool::new();
        assert!(pool.is_healthy(Constellation::GPS, 9));
    }
}
