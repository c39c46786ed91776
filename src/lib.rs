//! This crate provides sessions for talking SCPI to bench instruments over a serial link, and a
//! driver for single-channel programmable power supplies built on top of them.
//!
//! A [`Session`] owns one byte transport (anything implementing [embedded_io::Read] &
//! [embedded_io::Write]) and exchanges newline terminated ASCII lines with the instrument in lock
//! step: a command is written, then at most one response line is read back before the next
//! command goes out.
//!
//! Device drivers such as [`PowerSupply`] are generic over the [`ScpiBase`] trait and take a
//! [`DeviceProfile`] describing the command headers and set-point limits of a model.
//!
//! Power supply models with a built-in profile:
//! * AXIOMET AX-6003P
//!
//! The serial port used for instrument comms defaults to:
//! * Baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! The `serial` feature (on by default) adds [`serial::SerialTransport`] and `Session::open`.

pub mod calibration;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod response;
#[cfg(feature = "serial")]
pub mod serial;
pub mod session;
pub mod status;

#[cfg(test)]
mod mock_serial;

pub use config::{DriverConfig, SerialConfig, SessionConfig};
pub use device::{DeviceProfile, PowerSupply};
pub use error::{Error, ErrorKind, Result};
pub use response::{Response, ReturnKind, State, Value};
pub use session::{ScpiBase, Session};
pub use status::{EventStatus, StatusCode};
