//! Serial port transport, built on the `serialport` crate.

use std::time::Duration;

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use tracing::debug;

use crate::{
    config::{ParityConfig, SerialConfig, SessionConfig},
    error::{Error, Result},
    session::Session,
};

/// An open serial port usable as a session transport.
pub struct SerialTransport(Box<dyn SerialPort>);

impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self(port)
    }

    pub fn name(&self) -> Option<String> {
        self.0.name()
    }
}

/// I/O failure on the serial port.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct SerialError(#[from] std::io::Error);

impl embedded_io::Error for SerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        use std::io::ErrorKind as Io;
        match self.0.kind() {
            // Nothing arrived within the port's read timeout. The session keeps polling.
            Io::TimedOut | Io::WouldBlock => embedded_io::ErrorKind::TimedOut,
            Io::Interrupted => embedded_io::ErrorKind::Interrupted,
            // The adapter was unplugged or the port closed under us.
            Io::BrokenPipe | Io::NotConnected | Io::UnexpectedEof => {
                embedded_io::ErrorKind::NotConnected
            }
            Io::NotFound => embedded_io::ErrorKind::NotFound,
            Io::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            Io::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for SerialTransport {
    type Error = SerialError;
}

impl embedded_io::Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(SerialError::from)
    }
}

impl embedded_io::Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(SerialError::from)
    }

    fn flush(&mut self) -> core::result::Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(SerialError::from)
    }
}

impl<const L: usize> Session<SerialTransport, L> {
    /// Open the serial port described by `serial` and start a session on it.
    ///
    /// Anything already waiting in the port's input buffer is discarded.
    pub fn open(serial: &SerialConfig, config: SessionConfig) -> Result<Self, SerialError> {
        serial.validate()?;
        config.validate()?;

        let mut port = serialport::new(&serial.port, serial.baud_rate)
            .data_bits(data_bits(serial.data_bits))
            .parity(parity(serial.parity))
            .stop_bits(stop_bits(serial.stop_bits))
            .timeout(Duration::from_millis(serial.poll_interval_ms.into()))
            .open()
            .map_err(|e| Error::Connection(format!("Failed to open {}: {e}", serial.port)))?;
        port.clear(ClearBuffer::Input)
            .map_err(|e| Error::Connection(format!("Failed to clear {}: {e}", serial.port)))?;

        debug!(
            port = %serial.port,
            baud_rate = serial.baud_rate,
            "Opened serial session"
        );
        Session::new(SerialTransport(port), config)
    }
}

fn data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn parity(parity: ParityConfig) -> Parity {
    match parity {
        ParityConfig::None => Parity::None,
        ParityConfig::Odd => Parity::Odd,
        ParityConfig::Even => Parity::Even,
    }
}

fn stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}
