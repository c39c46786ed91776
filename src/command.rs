//! Construction of outbound SCPI command lines.

use core::fmt::{self, Display, Write};

use strum_macros::{Display as StrumDisplay, IntoStaticStr};

/// A single command line, without its terminator.
///
/// Arguments are appended the way the instrument firmware expects them: one space after the
/// header, then commas between values. E.g. `:APPL 5,1.5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    line: String,
    args: usize,
}

impl Command {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            line: header.into(),
            args: 0,
        }
    }

    /// The query form of a command header, `header?`.
    pub fn query(header: &str) -> Self {
        let mut line = String::with_capacity(header.len() + 1);
        line.push_str(header);
        line.push('?');
        Self { line, args: 0 }
    }

    /// Append one argument.
    pub fn arg(mut self, value: impl Display) -> Self {
        self.line.push(if self.args == 0 { ' ' } else { ',' });
        // Writing into a String cannot fail.
        let _ = write!(self.line, "{value}");
        self.args += 1;
        self
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }

    pub fn into_string(self) -> String {
        self.line
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

impl AsRef<str> for Command {
    fn as_ref(&self) -> &str {
        &self.line
    }
}

impl From<CommonCommand> for Command {
    fn from(value: CommonCommand) -> Self {
        Command::new(value.as_str())
    }
}

impl From<CommonQuery> for Command {
    fn from(value: CommonQuery) -> Self {
        Command::new(value.as_str())
    }
}

/// IEEE 488.2 common queries understood by every SCPI device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, IntoStaticStr)]
pub enum CommonQuery {
    /// Identification query.
    #[strum(serialize = "*IDN?")]
    Identify,
    /// Standard event status register query.
    #[strum(serialize = "*ESR?")]
    EventStatus,
    /// Operation complete query.
    #[strum(serialize = "*OPC?")]
    OperationComplete,
    /// Power-on status clear flag query.
    #[strum(serialize = "*PSC?")]
    PowerOnClear,
}

impl CommonQuery {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// IEEE 488.2 common commands. None of these produce a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, IntoStaticStr)]
pub enum CommonCommand {
    /// Reset.
    #[strum(serialize = "*RST")]
    Reset,
    /// Clear status.
    #[strum(serialize = "*CLS")]
    ClearStatus,
    /// Power-on status clear. Takes `0` or `1`.
    #[strum(serialize = "*PSC")]
    PowerOnClear,
}

impl CommonCommand {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}
