//! Instrument status: the fixed status table and the IEEE 488.2 event status register.

use core::fmt;

use modular_bitfield::prelude::*;
use strum_macros::EnumIter;

/// Named status reported by the status query.
///
/// Integers missing from the table are kept as [`StatusCode::Unknown`].
///
/// The table is applied to the whole integer, whatever the status command. With the default
/// `*ESR?` that integer is a bit register: a lone operation-complete bit (1) reads as
/// [`StatusCode::Fault`] and a lone command-error bit (32) as `Unknown(32)`. Use
/// [`Session::event_status`](crate::session::Session::event_status) to decode the register, or
/// configure a model specific status command whose values follow the table.
#[derive(Debug, EnumIter, PartialEq, Eq, Clone, Copy)]
pub enum StatusCode {
    /// 0: No fault.
    Ok,
    /// 1: Generic fault.
    Fault,
    /// 2: Over-current protection.
    OverCurrent,
    /// 3: Over-voltage protection.
    OverVoltage,
    /// Any other code.
    Unknown(i64),
}

impl StatusCode {
    const TABLE: [(i64, StatusCode); 4] = [
        (0, StatusCode::Ok),
        (1, StatusCode::Fault),
        (2, StatusCode::OverCurrent),
        (3, StatusCode::OverVoltage),
    ];

    /// The integer reported by the instrument.
    pub fn code(&self) -> i64 {
        match *self {
            StatusCode::Unknown(code) => code,
            known => Self::TABLE
                .iter()
                .find(|(_, status)| *status == known)
                .map(|(code, _)| *code)
                .unwrap_or_default(),
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == StatusCode::Ok
    }
}

impl From<i64> for StatusCode {
    fn from(value: i64) -> Self {
        Self::TABLE
            .iter()
            .find(|(code, _)| *code == value)
            .map(|(_, status)| *status)
            .unwrap_or(StatusCode::Unknown(value))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Ok => f.write_str("OK"),
            StatusCode::Fault => f.write_str("FAULT"),
            StatusCode::OverCurrent => f.write_str("OVER_CURRENT"),
            StatusCode::OverVoltage => f.write_str("OVER_VOLTAGE"),
            StatusCode::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

/// Standard event status register, as returned by `*ESR?`. Bit 0 first.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStatus {
    /// Bit 0: all pending operations completed.
    pub operation_complete: bool,
    /// Bit 1: request control.
    pub request_control: bool,
    /// Bit 2: query error.
    pub query_error: bool,
    /// Bit 3: device dependent error.
    pub device_error: bool,
    /// Bit 4: execution error.
    pub execution_error: bool,
    /// Bit 5: command error.
    pub command_error: bool,
    /// Bit 6: user request.
    pub user_request: bool,
    /// Bit 7: power on.
    pub power_on: bool,
}

impl EventStatus {
    pub fn from_register(value: u8) -> Self {
        Self::from_bytes([value])
    }

    pub fn register(&self) -> u8 {
        self.into_bytes()[0]
    }

    /// True when any of the four error bits is set.
    pub fn has_error(&self) -> bool {
        self.query_error() || self.device_error() || self.execution_error() || self.command_error()
    }
}
