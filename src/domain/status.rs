//! Telemetry status codes
//!
//! Codes follow the common fleet-tracking code table: 0xF0xx location,
//! 0xF1xx motion, 0xF2xx geofence, 0xF4xx digital I/O, 0xF9xx OBD/fuel and
//! 0xFFxx rule triggers.

use serde::{Deserialize, Serialize};

/// Newtype wrapper for a telemetry status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const NONE: StatusCode = StatusCode(0x0000);

    pub const LOCATION: StatusCode = StatusCode(0xF020);

    pub const MOTION_START: StatusCode = StatusCode(0xF111);
    pub const MOTION_IN_MOTION: StatusCode = StatusCode(0xF112);
    pub const MOTION_STOP: StatusCode = StatusCode(0xF113);
    pub const MOTION_DORMANT: StatusCode = StatusCode(0xF114);
    pub const MOTION_STOPPED: StatusCode = StatusCode(0xF115);
    pub const MOTION_MOVING: StatusCode = StatusCode(0xF11C);

    pub const GEOFENCE_ARRIVE: StatusCode = StatusCode(0xF210);
    pub const GEOFENCE_DEPART: StatusCode = StatusCode(0xF230);
    pub const CORRIDOR_ACTIVE: StatusCode = StatusCode(0xF278);
    pub const CORRIDOR_INACTIVE: StatusCode = StatusCode(0xF288);

    pub const IGNITION_ON: StatusCode = StatusCode(0xF401);
    pub const IGNITION_OFF: StatusCode = StatusCode(0xF403);
    pub const ENGINE_START: StatusCode = StatusCode(0xF40C);
    pub const ENGINE_STOP: StatusCode = StatusCode(0xF40D);

    pub const OBD_FAULT: StatusCode = StatusCode(0xF911);
    pub const FUEL_REFILL: StatusCode = StatusCode(0xF951);
    pub const FUEL_THEFT: StatusCode = StatusCode(0xF952);

    pub const RULE_TRIGGER_0: StatusCode = StatusCode(0xFF00);
    pub const RULE_TRIGGER_7: StatusCode = StatusCode(0xFF07);

    /// Heartbeat-only code: accepted, never processed
    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    #[inline]
    pub fn is_motion_start(self) -> bool {
        matches!(self, Self::MOTION_START | Self::MOTION_IN_MOTION | Self::MOTION_MOVING)
    }

    #[inline]
    pub fn is_motion_stop(self) -> bool {
        matches!(self, Self::MOTION_STOP | Self::MOTION_STOPPED | Self::MOTION_DORMANT)
    }

    #[inline]
    pub fn is_ignition_on(self) -> bool {
        self == Self::IGNITION_ON
    }

    #[inline]
    pub fn is_ignition_off(self) -> bool {
        self == Self::IGNITION_OFF
    }

    #[inline]
    pub fn is_engine_start(self) -> bool {
        self == Self::ENGINE_START
    }

    #[inline]
    pub fn is_engine_stop(self) -> bool {
        self == Self::ENGINE_STOP
    }

    #[inline]
    pub fn is_geozone_arrive(self) -> bool {
        self == Self::GEOFENCE_ARRIVE
    }

    #[inline]
    pub fn is_geozone_depart(self) -> bool {
        self == Self::GEOFENCE_DEPART
    }

    /// Codes emitted by rule actions; these never re-enter rule evaluation
    #[inline]
    pub fn is_rule_trigger(self) -> bool {
        (Self::RULE_TRIGGER_0.0..=Self::RULE_TRIGGER_7.0).contains(&self.0)
    }

    /// Short mnemonic used in logs and notification text
    pub fn name(self) -> &'static str {
        match self {
            Self::NONE => "NONE",
            Self::LOCATION => "LOCATION",
            Self::MOTION_START => "MOTION.START",
            Self::MOTION_IN_MOTION => "MOTION.INMOTION",
            Self::MOTION_STOP => "MOTION.STOP",
            Self::MOTION_DORMANT => "MOTION.DORMANT",
            Self::MOTION_STOPPED => "MOTION.STOPPED",
            Self::MOTION_MOVING => "MOTION.MOVING",
            Self::GEOFENCE_ARRIVE => "GEO.ARR",
            Self::GEOFENCE_DEPART => "GEO.DEP",
            Self::CORRIDOR_ACTIVE => "COR.ACTIVE",
            Self::CORRIDOR_INACTIVE => "COR.INACTIVE",
            Self::IGNITION_ON => "IGN.ON",
            Self::IGNITION_OFF => "IGN.OFF",
            Self::ENGINE_START => "ENG.START",
            Self::ENGINE_STOP => "ENG.STOP",
            Self::OBD_FAULT => "OBD.FAULT",
            Self::FUEL_REFILL => "FUEL.REFILL",
            Self::FUEL_THEFT => "FUEL.THEFT",
            code if code.is_rule_trigger() => "RULE",
            _ => "CODE",
        }
    }

    /// Parse a code from hex (`0xF210`), decimal (`61968`) or mnemonic (`GEO.ARR`)
    pub fn parse(s: &str) -> Option<StatusCode> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u32::from_str_radix(hex, 16).ok().map(StatusCode);
        }
        if let Ok(dec) = s.parse::<u32>() {
            return Some(StatusCode(dec));
        }
        KNOWN_CODES.iter().copied().find(|code| code.name().eq_ignore_ascii_case(s))
    }
}

const KNOWN_CODES: [StatusCode; 19] = [
    StatusCode::LOCATION,
    StatusCode::MOTION_START,
    StatusCode::MOTION_IN_MOTION,
    StatusCode::MOTION_STOP,
    StatusCode::MOTION_DORMANT,
    StatusCode::MOTION_STOPPED,
    StatusCode::MOTION_MOVING,
    StatusCode::GEOFENCE_ARRIVE,
    StatusCode::GEOFENCE_DEPART,
    StatusCode::CORRIDOR_ACTIVE,
    StatusCode::CORRIDOR_INACTIVE,
    StatusCode::IGNITION_ON,
    StatusCode::IGNITION_OFF,
    StatusCode::ENGINE_START,
    StatusCode::ENGINE_STOP,
    StatusCode::OBD_FAULT,
    StatusCode::FUEL_REFILL,
    StatusCode::FUEL_THEFT,
    StatusCode::NONE,
];

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}
