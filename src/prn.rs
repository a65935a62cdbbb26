//! Satellite identity shared by the SSR codec (C3) and the ephemeris
//! registry (C5).

use gnss_rs::prelude::Constellation;

/// The active broadcast navigation message type for a satellite, carried
/// alongside its PRN so the ephemeris registry can disambiguate modern
/// multi-message constellations (e.g. GPS LNAV vs CNAV vs CNAV2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NavMessageType {
    Lnav,
    Cnav,
    Cnv1,
    Cnv2,
    Cnv3,
    Fdma,
    Fnav,
    Inav,
    D1,
    D2,
    SbasL1,
    L1Nv,
    L1Oc,
    L3Oc,
    #[default]
    Undefined,
}

/// A tagged (system, number) satellite identifier, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SatellitePrn {
    pub system: Constellation,
    pub number: u16,
    pub nav_message_type: NavMessageType,
}

impl SatellitePrn {
    pub fn new(system: Constellation, number: u16) -> Self {
        Self {
            system,
            number,
            nav_message_type: NavMessageType::Undefined,
        }
    }

    pub fn with_nav_message_type(mut self, nav_message_type: NavMessageType) -> Self {
        self.nav_message_type = nav_message_type;
        self
    }

    /// Maximum valid satellite number for this system, used to range-gate
    /// decoded satellite ids.
    pub fn max_per_system(system: Constellation) -> u16 {
        match system {
            Constellation::GPS => 32,
            Constellation::Glonass => 24,
            Constellation::Galileo => 36,
            Constellation::QZSS => 10,
            Constellation::SBAS => 39,
            Constellation::BeiDou => 63,
            Constellation::IRNSS => 14,
            _ => 0,
        }
    }
}
