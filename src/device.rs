//! Device profiles, and a single-channel power supply driver built from one.
//!
//! A profile is plain data: the command headers a model understands and the ranges its set-points
//! accept. The built-in profile describes the AXIOMET AX-6003P, 0-60 V / 0-3 A, one output.
//!
//! We use the nomenclature that "set" means to write a configuration and "get" means to read back
//! a configuration value. Where as "read" means to get a measured value.

use fugit::SecsDurationU32;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumCount, EnumIter, IntoStaticStr};

use crate::{
    calibration::Calibrations,
    command::{Command, CommonQuery},
    config::ConfigError,
    error::{Error, ParseError, Result},
    response::{ReturnKind, State},
    session::ScpiBase,
    status::StatusCode,
};

/// Measured quantities of a power supply output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Quantity {
    Voltage,
    Current,
    Power,
}

/// Inclusive range of accepted set-point values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Pass `value` through if it lies within this range.
    pub fn check<I: embedded_io::Error>(&self, quantity: &'static str, value: f64) -> Result<f64, I> {
        if self.contains(value) {
            Ok(value)
        } else {
            Err(Error::OutOfRange {
                quantity,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }

    fn validate(&self, name: &str) -> core::result::Result<(), ConfigError> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(ConfigError::Invalid(format!(
                "{name} range {}..={} is empty or not finite",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Set-point limits of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Output voltage in volts.
    pub voltage: Range,
    /// Output current in amps.
    pub current: Range,
    /// Over-voltage protection level in volts.
    pub voltage_protection: Range,
    /// Over-current protection level in amps.
    pub current_protection: Range,
    /// Delay after an apply command, in seconds.
    pub delay: Range,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            voltage: Range::new(0.0, 60.0),
            current: Range::new(0.0, 3.0),
            voltage_protection: Range::new(0.0, 60.0),
            current_protection: Range::new(0.0, 3.0),
            delay: Range::new(1.0, 3600.0),
        }
    }
}

impl Limits {
    pub fn validate(&self) -> core::result::Result<(), ConfigError> {
        self.voltage.validate("voltage")?;
        self.current.validate("current")?;
        self.voltage_protection.validate("voltage_protection")?;
        self.current_protection.validate("current_protection")?;
        self.delay.validate("delay")
    }
}

/// Command headers of one model. Query forms append `?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTable {
    pub voltage: String,
    pub current: String,
    pub apply: String,
    pub measure_voltage: String,
    pub measure_current: String,
    pub measure_power: String,
    pub output: String,
    pub delay: String,
    pub current_protection_level: String,
    pub current_protection_state: String,
    pub current_protection_trip: String,
    pub current_protection_clear: String,
    pub voltage_protection_level: String,
    pub voltage_protection_state: String,
    pub voltage_protection_trip: String,
    pub voltage_protection_clear: String,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self {
            voltage: ":VOLT".into(),
            current: ":CURR".into(),
            apply: ":APPL".into(),
            measure_voltage: ":MEAS:VOLT".into(),
            measure_current: ":MEAS:CURR".into(),
            measure_power: ":MEAS:POW".into(),
            output: ":OUTP".into(),
            delay: ":SYST:AUTO:DEL".into(),
            current_protection_level: ":CURR:PROT:LEV".into(),
            current_protection_state: ":CURR:PROT:STAT".into(),
            current_protection_trip: ":CURR:PROT:TRIP".into(),
            current_protection_clear: ":CURR:PROT:CLE".into(),
            voltage_protection_level: ":VOLT:PROT:LEV".into(),
            voltage_protection_state: ":VOLT:PROT:STAT".into(),
            voltage_protection_trip: ":VOLT:PROT:TRIP".into(),
            voltage_protection_clear: ":VOLT:PROT:CLE".into(),
        }
    }
}

/// Everything model specific about a power supply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub manufacturer: String,
    pub model: String,
    #[serde(default)]
    pub commands: CommandTable,
    #[serde(default)]
    pub limits: Limits,
}

impl DeviceProfile {
    /// AXIOMET AX-6003P, single output, 60 V / 3 A, USB serial at 9600 baud.
    pub fn ax6003p() -> Self {
        Self {
            manufacturer: "AXIOMET".into(),
            model: "AX6003P".into(),
            commands: CommandTable::default(),
            limits: Limits::default(),
        }
    }
}

/// Which protection circuit an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protection {
    Voltage,
    Current,
}

/// A single-channel programmable power supply.
///
/// Works over anything implementing [`ScpiBase`], usually a [`Session`](crate::session::Session).
pub struct PowerSupply<B: ScpiBase> {
    base: B,
    profile: DeviceProfile,
    calibrations: Calibrations,
}

impl<B: ScpiBase> PowerSupply<B> {
    pub fn new(base: B, profile: DeviceProfile) -> Self {
        Self {
            base,
            profile,
            calibrations: Calibrations::default(),
        }
    }

    /// Apply these calibrations to every measurement.
    pub fn with_calibrations(mut self, calibrations: Calibrations) -> Self {
        self.calibrations = calibrations;
        self
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn calibrations_mut(&mut self) -> &mut Calibrations {
        &mut self.calibrations
    }

    /// Direct access to the underlying session.
    pub fn base_mut(&mut self) -> &mut B {
        &mut self.base
    }

    pub fn into_inner(self) -> B {
        self.base
    }

    /// Read the identification string.
    pub fn identify(&mut self) -> Result<String, B::IoError> {
        Ok(self.base.query(CommonQuery::Identify.as_str())?.into_text())
    }

    pub fn status(&mut self) -> Result<StatusCode, B::IoError> {
        self.base.status()
    }

    pub fn reset(&mut self) -> Result<(), B::IoError> {
        self.base.reset()
    }

    /// Set the output target voltage in volts.
    pub fn set_voltage(&mut self, volts: f64) -> Result<(), B::IoError> {
        let volts = self.profile.limits.voltage.check::<B::IoError>("voltage", volts)?;
        let command = Command::new(self.profile.commands.voltage.as_str()).arg(volts);
        self.base.write_command(command.as_str())
    }

    /// Get the output target voltage in volts.
    pub fn get_voltage(&mut self) -> Result<f64, B::IoError> {
        Ok(self.get_applied()?.0)
    }

    /// Set the output current limit in amps.
    pub fn set_current(&mut self, amps: f64) -> Result<(), B::IoError> {
        let amps = self.profile.limits.current.check::<B::IoError>("current", amps)?;
        let command = Command::new(self.profile.commands.current.as_str()).arg(amps);
        self.base.write_command(command.as_str())
    }

    /// Get the output current limit in amps.
    pub fn get_current(&mut self) -> Result<f64, B::IoError> {
        Ok(self.get_applied()?.1)
    }

    /// Set voltage and current limit together.
    pub fn apply(&mut self, volts: f64, amps: f64) -> Result<(), B::IoError> {
        let limits = &self.profile.limits;
        let volts = limits.voltage.check::<B::IoError>("voltage", volts)?;
        let amps = limits.current.check::<B::IoError>("current", amps)?;
        let command = Command::new(self.profile.commands.apply.as_str())
            .arg(volts)
            .arg(amps);
        self.base.write_command(command.as_str())
    }

    /// Get the applied voltage and current limit, `(volts, amps)`.
    pub fn get_applied(&mut self) -> Result<(f64, f64), B::IoError> {
        let response = self.base.query(Command::query(&self.profile.commands.apply).as_str())?;
        match response.numbers()?.as_slice() {
            [volts, amps, ..] => Ok((*volts, *amps)),
            _ => Err(ParseError {
                command: response.command().to_string(),
                payload: response.text().to_string(),
                expected: ReturnKind::Numbers,
            }
            .into()),
        }
    }

    /// Return the measured output voltage in volts.
    pub fn read_voltage(&mut self) -> Result<f64, B::IoError> {
        self.measure(Quantity::Voltage)
    }

    /// Return the measured output current in amps.
    pub fn read_current(&mut self) -> Result<f64, B::IoError> {
        self.measure(Quantity::Current)
    }

    /// Return the measured output power in watts.
    pub fn read_power(&mut self) -> Result<f64, B::IoError> {
        self.measure(Quantity::Power)
    }

    /// Enable/disable the output.
    pub fn set_output(&mut self, state: impl Into<State>) -> Result<(), B::IoError> {
        let state: State = state.into();
        let command = Command::new(self.profile.commands.output.as_str()).arg(state);
        self.base.write_command(command.as_str())
    }

    /// Read whether the output is enabled or disabled.
    pub fn get_output(&mut self) -> Result<State, B::IoError> {
        self.query_state(&self.profile.commands.output.clone())
    }

    /// Set the delay the supply waits after an apply command.
    pub fn set_delay(&mut self, delay: SecsDurationU32) -> Result<(), B::IoError> {
        let secs = delay.to_secs();
        self.profile.limits.delay.check::<B::IoError>("delay", secs.into())?;
        let command = Command::new(self.profile.commands.delay.as_str()).arg(secs);
        self.base.write_command(command.as_str())
    }

    /// Get the delay the supply waits after an apply command.
    pub fn get_delay(&mut self) -> Result<SecsDurationU32, B::IoError> {
        let response = self.base.query(Command::query(&self.profile.commands.delay).as_str())?;
        let secs = response.number()?;
        if secs < 0.0 || secs.fract() != 0.0 || secs > u32::MAX as f64 {
            return Err(ParseError {
                command: response.command().to_string(),
                payload: response.text().to_string(),
                expected: ReturnKind::Number,
            }
            .into());
        }
        Ok(SecsDurationU32::secs(secs as u32))
    }

    /// Set the over-current protection level in amps.
    pub fn set_current_protection_level(&mut self, amps: f64) -> Result<(), B::IoError> {
        self.set_protection_level(Protection::Current, amps)
    }

    /// Get the over-current protection level in amps.
    pub fn get_current_protection_level(&mut self) -> Result<f64, B::IoError> {
        self.get_protection_level(Protection::Current)
    }

    /// Enable/disable over-current protection.
    pub fn set_current_protection_state(&mut self, state: impl Into<State>) -> Result<(), B::IoError> {
        self.set_protection_state(Protection::Current, state.into())
    }

    /// Get whether over-current protection is enabled.
    pub fn get_current_protection_state(&mut self) -> Result<State, B::IoError> {
        self.get_protection_state(Protection::Current)
    }

    /// Whether over-current protection has been triggered.
    pub fn is_current_protection_tripped(&mut self) -> Result<bool, B::IoError> {
        self.is_protection_tripped(Protection::Current)
    }

    /// Clear a tripped over-current protection. Returns whether it is still tripped.
    pub fn clear_current_protection(&mut self) -> Result<bool, B::IoError> {
        self.clear_protection(Protection::Current)
    }

    /// Set the over-voltage protection level in volts.
    pub fn set_voltage_protection_level(&mut self, volts: f64) -> Result<(), B::IoError> {
        self.set_protection_level(Protection::Voltage, volts)
    }

    /// Get the over-voltage protection level in volts.
    pub fn get_voltage_protection_level(&mut self) -> Result<f64, B::IoError> {
        self.get_protection_level(Protection::Voltage)
    }

    /// Enable/disable over-voltage protection.
    pub fn set_voltage_protection_state(&mut self, state: impl Into<State>) -> Result<(), B::IoError> {
        self.set_protection_state(Protection::Voltage, state.into())
    }

    /// Get whether over-voltage protection is enabled.
    pub fn get_voltage_protection_state(&mut self) -> Result<State, B::IoError> {
        self.get_protection_state(Protection::Voltage)
    }

    /// Whether over-voltage protection has been triggered.
    pub fn is_voltage_protection_tripped(&mut self) -> Result<bool, B::IoError> {
        self.is_protection_tripped(Protection::Voltage)
    }

    /// Clear a tripped over-voltage protection. Returns whether it is still tripped.
    pub fn clear_voltage_protection(&mut self) -> Result<bool, B::IoError> {
        self.clear_protection(Protection::Voltage)
    }

    fn measure(&mut self, quantity: Quantity) -> Result<f64, B::IoError> {
        let commands = &self.profile.commands;
        let header = match quantity {
            Quantity::Voltage => &commands.measure_voltage,
            Quantity::Current => &commands.measure_current,
            Quantity::Power => &commands.measure_power,
        };
        let raw = self.base.query_number(Command::query(header).as_str())?;
        Ok(self.calibrations.apply(quantity, raw))
    }

    fn query_state(&mut self, header: &str) -> Result<State, B::IoError> {
        Ok(self.base.query(Command::query(header).as_str())?.state()?)
    }

    fn set_protection_level(&mut self, protection: Protection, value: f64) -> Result<(), B::IoError> {
        let (header, range, quantity) = match protection {
            Protection::Current => (
                &self.profile.commands.current_protection_level,
                &self.profile.limits.current_protection,
                "current protection level",
            ),
            Protection::Voltage => (
                &self.profile.commands.voltage_protection_level,
                &self.profile.limits.voltage_protection,
                "voltage protection level",
            ),
        };
        let value = range.check::<B::IoError>(quantity, value)?;
        let command = Command::new(header.as_str()).arg(value);
        self.base.write_command(command.as_str())
    }

    fn get_protection_level(&mut self, protection: Protection) -> Result<f64, B::IoError> {
        let header = match protection {
            Protection::Current => &self.profile.commands.current_protection_level,
            Protection::Voltage => &self.profile.commands.voltage_protection_level,
        };
        self.base.query_number(Command::query(header).as_str())
    }

    fn set_protection_state(&mut self, protection: Protection, state: State) -> Result<(), B::IoError> {
        let header = match protection {
            Protection::Current => &self.profile.commands.current_protection_state,
            Protection::Voltage => &self.profile.commands.voltage_protection_state,
        };
        let command = Command::new(header.as_str()).arg(state);
        self.base.write_command(command.as_str())
    }

    fn get_protection_state(&mut self, protection: Protection) -> Result<State, B::IoError> {
        let header = match protection {
            Protection::Current => self.profile.commands.current_protection_state.clone(),
            Protection::Voltage => self.profile.commands.voltage_protection_state.clone(),
        };
        self.query_state(&header)
    }

    fn is_protection_tripped(&mut self, protection: Protection) -> Result<bool, B::IoError> {
        let header = match protection {
            Protection::Current => self.profile.commands.current_protection_trip.clone(),
            Protection::Voltage => self.profile.commands.voltage_protection_trip.clone(),
        };
        self.query_state(&header).map(bool::from)
    }

    fn clear_protection(&mut self, protection: Protection) -> Result<bool, B::IoError> {
        let header = match protection {
            Protection::Current => &self.profile.commands.current_protection_clear,
            Protection::Voltage => &self.profile.commands.voltage_protection_clear,
        };
        self.base.write_command(header.as_str())?;
        self.is_protection_tripped(protection)
    }
}

#[cfg(test)]
mod tests {
    use fugit::MillisDurationU32;

    use super::*;
    use crate::{
        calibration::Polynomial, config::SessionConfig, error::ErrorKind, mock_serial::MockSerial,
        session::Session,
    };

    fn psu(mock: MockSerial) -> PowerSupply<Session<MockSerial>> {
        let config = SessionConfig::default().with_timeout(MillisDurationU32::millis(30));
        let session = Session::new(mock, config).unwrap();
        PowerSupply::new(session, DeviceProfile::ax6003p())
    }

    fn written(psu: PowerSupply<Session<MockSerial>>) -> String {
        psu.into_inner()
            .into_inner()
            .map(|mock| mock.written_text())
            .unwrap_or_default()
    }

    #[test]
    fn test_set_points() {
        let mut psu = psu(MockSerial::new());
        psu.set_voltage(5.0).unwrap();
        psu.set_current(1.5).unwrap();
        psu.apply(12.0, 0.25).unwrap();
        assert_eq!(written(psu), ":VOLT 5\n:CURR 1.5\n:APPL 12,0.25\n");
    }

    #[test]
    fn test_out_of_range_writes_nothing() {
        let mut psu = psu(MockSerial::new());
        let err = psu.set_voltage(61.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
        assert!(err.to_string().contains("voltage"));
        assert!(psu.set_current(-0.1).is_err());
        assert!(psu.apply(5.0, 3.5).is_err());
        assert!(psu.set_current_protection_level(4.0).is_err());
        assert!(psu.set_delay(SecsDurationU32::secs(0)).is_err());
        assert_eq!(written(psu), "");
    }

    #[test]
    fn test_get_applied() {
        let mock = MockSerial::new()
            .respond_to(":APPL?", "5.00,1.000\n")
            .respond_to(":APPL?", "5.00,1.000\n")
            .respond_to(":APPL?", "5.00,1.000\n");
        let mut psu = psu(mock);
        assert_eq!(psu.get_applied().unwrap(), (5.0, 1.0));
        assert_eq!(psu.get_voltage().unwrap(), 5.0);
        assert_eq!(psu.get_current().unwrap(), 1.0);
    }

    #[test]
    fn test_get_applied_needs_two_values() {
        let mut psu = psu(MockSerial::new().respond_to(":APPL?", "5.00\n"));
        assert_eq!(psu.get_applied().unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_measurements() {
        let mock = MockSerial::new()
            .respond_to(":MEAS:VOLT?", "4.98\n")
            .respond_to(":MEAS:CURR?", "0.101\n")
            .respond_to(":MEAS:POW?", "0.503\n");
        let mut psu = psu(mock);
        assert_eq!(psu.read_voltage().unwrap(), 4.98);
        assert_eq!(psu.read_current().unwrap(), 0.101);
        assert_eq!(psu.read_power().unwrap(), 0.503);
    }

    #[test]
    fn test_calibrated_measurement() {
        let mock = MockSerial::new().respond_to(":MEAS:VOLT?", "10\n");
        let mut calibrations = Calibrations::default();
        calibrations.set(Quantity::Voltage, Polynomial::linear(0.5, 1.0));
        let mut psu = psu(mock).with_calibrations(calibrations);
        assert_eq!(psu.read_voltage().unwrap(), 6.0);
    }

    #[test]
    fn test_output() {
        let mock = MockSerial::new()
            .respond_to(":OUTP?", "ON\n")
            .respond_to(":OUTP?", "OFF\n");
        let mut psu = psu(mock);
        psu.set_output(true).unwrap();
        assert_eq!(psu.get_output().unwrap(), State::On);
        psu.set_output(State::Off).unwrap();
        assert_eq!(psu.get_output().unwrap(), State::Off);
        assert_eq!(
            written(psu),
            ":OUTP ON\n:OUTP?\n:OUTP OFF\n:OUTP?\n"
        );
    }

    #[test]
    fn test_delay() {
        let mock = MockSerial::new()
            .respond_to(":SYST:AUTO:DEL?", "2\n")
            .respond_to(":SYST:AUTO:DEL?", "1.5\n");
        let mut psu = psu(mock);
        psu.set_delay(SecsDurationU32::secs(2)).unwrap();
        assert_eq!(psu.get_delay().unwrap().to_secs(), 2);
        assert_eq!(psu.get_delay().unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_current_protection() {
        let mock = MockSerial::new()
            .respond_to(":CURR:PROT:LEV?", "1.200\n")
            .respond_to(":CURR:PROT:STAT?", "ON\n")
            .respond_to(":CURR:PROT:TRIP?", "ON\n")
            .respond_to(":CURR:PROT:TRIP?", "OFF\n");
        let mut psu = psu(mock);
        psu.set_current_protection_level(1.2).unwrap();
        assert_eq!(psu.get_current_protection_level().unwrap(), 1.2);
        psu.set_current_protection_state(true).unwrap();
        assert_eq!(psu.get_current_protection_state().unwrap(), State::On);
        assert!(psu.is_current_protection_tripped().unwrap());
        assert!(!psu.clear_current_protection().unwrap());
        assert_eq!(
            written(psu),
            ":CURR:PROT:LEV 1.2\n:CURR:PROT:LEV?\n:CURR:PROT:STAT ON\n:CURR:PROT:STAT?\n\
             :CURR:PROT:TRIP?\n:CURR:PROT:CLE\n:CURR:PROT:TRIP?\n"
        );
    }

    #[test]
    fn test_voltage_protection() {
        let mock = MockSerial::new()
            .respond_to(":VOLT:PROT:LEV?", "30\n")
            .respond_to(":VOLT:PROT:STAT?", "0\n")
            .respond_to(":VOLT:PROT:TRIP?", "OFF\n")
            .respond_to(":VOLT:PROT:TRIP?", "ON\n");
        let mut psu = psu(mock);
        psu.set_voltage_protection_level(30.0).unwrap();
        assert_eq!(psu.get_voltage_protection_level().unwrap(), 30.0);
        psu.set_voltage_protection_state(State::Off).unwrap();
        assert_eq!(psu.get_voltage_protection_state().unwrap(), State::Off);
        assert!(!psu.is_voltage_protection_tripped().unwrap());
        // Still tripped after clearing.
        assert!(psu.clear_voltage_protection().unwrap());
    }

    #[test]
    fn test_passthrough() {
        let mock = MockSerial::new()
            .respond_to("*IDN?", "AXIOMET,AX-6003P\n")
            .respond_to("*ESR?", "1\n");
        let mut psu = psu(mock);
        assert_eq!(psu.identify().unwrap(), "AXIOMET,AX-6003P");
        assert_eq!(psu.status().unwrap(), StatusCode::Fault);
        psu.reset().unwrap();
        assert!(written(psu).ends_with("*RST\n"));
    }

    #[test]
    fn test_profile_from_toml() {
        let profile: DeviceProfile = toml::from_str(
            r#"
            manufacturer = "ACME"
            model = "PS-3010"

            [commands]
            voltage = "VSET1"

            [limits]
            voltage = { min = 0.0, max = 30.0 }
            "#,
        )
        .unwrap();
        assert_eq!(profile.commands.voltage, "VSET1");
        assert_eq!(profile.commands.current, ":CURR");
        assert_eq!(profile.limits.voltage, Range::new(0.0, 30.0));
        assert_eq!(profile.limits.current, Range::new(0.0, 3.0));
        assert!(profile.limits.validate().is_ok());

        let mut psu = PowerSupply::new(
            Session::<MockSerial>::new(MockSerial::new(), SessionConfig::default()).unwrap(),
            profile,
        );
        assert!(psu.set_voltage(45.0).is_err());
        psu.set_voltage(12.5).unwrap();
        assert_eq!(written(psu), "VSET1 12.5\n");
    }

    #[test]
    fn test_invalid_limits() {
        let mut limits = Limits::default();
        limits.current = Range::new(3.0, 0.0);
        assert!(limits.validate().is_err());
    }
}
