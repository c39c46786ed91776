//! Responses read back from the instrument and their typed interpretations.

use core::str::FromStr;

use fugit::MillisDurationU32;
use strum_macros::{Display, EnumString};

use crate::{error::ParseError, status::StatusCode};

/// The kind of value a command is declared to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReturnKind {
    Number,
    Numbers,
    Boolean,
    Status,
    Text,
}

/// A response coerced into its declared [`ReturnKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Numbers(Vec<f64>),
    Boolean(bool),
    Status(StatusCode),
    Text(String),
}

/// Used to be less ambiguous about whether something is on or off.
///
/// Parses the SCPI boolean forms `ON`, `OFF`, `1` and `0`, ignoring case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum State {
    /// Disabled.
    #[default]
    #[strum(to_string = "OFF", serialize = "0")]
    Off,
    /// Enabled.
    #[strum(to_string = "ON", serialize = "1")]
    On,
}

impl From<State> for bool {
    fn from(value: State) -> Self {
        match value {
            State::Off => false,
            State::On => true,
        }
    }
}

impl From<bool> for State {
    fn from(value: bool) -> Self {
        match value {
            true => State::On,
            false => State::Off,
        }
    }
}

/// One line read back from the instrument, with the terminator stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    command: String,
    text: String,
    elapsed: MillisDurationU32,
}

impl Response {
    pub fn new(command: impl Into<String>, text: impl Into<String>, elapsed: MillisDurationU32) -> Self {
        Self {
            command: command.into(),
            text: text.into(),
            elapsed,
        }
    }

    /// The command this is a response to.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The decoded payload, exactly as received.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Time between writing the command and reading the terminator.
    pub fn elapsed(&self) -> MillisDurationU32 {
        self.elapsed
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Interpret the payload as a single decimal number.
    ///
    /// A trailing unit suffix is tolerated, so `12.34V` reads as `12.34`.
    pub fn number(&self) -> Result<f64, ParseError> {
        parse_number(&self.text).ok_or_else(|| self.parse_error(ReturnKind::Number))
    }

    /// Interpret the payload as a list of numbers separated by commas, semicolons or whitespace.
    pub fn numbers(&self) -> Result<Vec<f64>, ParseError> {
        let values: Option<Vec<f64>> = self
            .text
            .split(|c: char| c == ',' || c == ';' || c.is_ascii_whitespace())
            .filter(|token| !token.is_empty())
            .map(parse_number)
            .collect();
        match values {
            Some(values) if !values.is_empty() => Ok(values),
            _ => Err(self.parse_error(ReturnKind::Numbers)),
        }
    }

    /// Interpret the payload as an integer, e.g. a status code or register value.
    pub fn integer(&self) -> Result<i64, ParseError> {
        i64::from_str(self.text.trim()).map_err(|_| self.parse_error(ReturnKind::Status))
    }

    /// Interpret the payload as an SCPI boolean.
    pub fn state(&self) -> Result<State, ParseError> {
        State::from_str(self.text.trim()).map_err(|_| self.parse_error(ReturnKind::Boolean))
    }

    /// Map the payload through the fixed status table.
    pub fn status(&self) -> Result<StatusCode, ParseError> {
        self.integer().map(StatusCode::from)
    }

    /// Coerce the payload into the declared kind of value.
    pub fn value(&self, kind: ReturnKind) -> Result<Value, ParseError> {
        match kind {
            ReturnKind::Number => self.number().map(Value::Number),
            ReturnKind::Numbers => self.numbers().map(Value::Numbers),
            ReturnKind::Boolean => self.state().map(|state| Value::Boolean(state.into())),
            ReturnKind::Status => self.status().map(Value::Status),
            ReturnKind::Text => Ok(Value::Text(self.text.clone())),
        }
    }

    fn parse_error(&self, expected: ReturnKind) -> ParseError {
        ParseError {
            command: self.command.clone(),
            payload: self.text.clone(),
            expected,
        }
    }
}

fn parse_number(token: &str) -> Option<f64> {
    let token = token.trim();
    // A bare unit is allowed, a prefixed one (`mA`, `kW`) is not.
    let numeric = token.strip_suffix(['V', 'A', 'W']).unwrap_or(token);
    let value = f64::from_str(numeric).ok()?;
    // Rejects the `inf` and `NaN` spellings.
    value.is_finite().then_some(value)
}
