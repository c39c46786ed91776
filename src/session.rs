//! The SCPI session: lock-step command/response exchange over a byte transport.

use std::time::{Duration, Instant};

use embedded_io::Error as _;
use fugit::MillisDurationU32;
use tracing::{debug, error, trace, warn};

use crate::{
    command::{Command, CommonCommand, CommonQuery},
    config::SessionConfig,
    error::{Error, LastError, ParseError, ProtocolFault, Result},
    response::{Response, ReturnKind, State, Value},
    status::{EventStatus, StatusCode},
};

/// The capability set every SCPI device driver is built on.
///
/// Drivers take any `ScpiBase` rather than a concrete session, so the device-specific part of a
/// driver stays plain configuration data.
pub trait ScpiBase {
    /// Error type of the underlying transport.
    type IoError: embedded_io::Error;

    /// Send a command which produces no response.
    fn write_command(&mut self, command: &str) -> Result<(), Self::IoError>;

    /// Send a command and read back its single response line.
    fn query(&mut self, command: &str) -> Result<Response, Self::IoError>;

    /// Query the status and map it through the fixed status table.
    fn status(&mut self) -> Result<StatusCode, Self::IoError>;

    /// Send the reset command. The instrument does not acknowledge it.
    fn reset(&mut self) -> Result<(), Self::IoError>;

    /// Query and parse the response as a decimal number.
    fn query_number(&mut self, command: &str) -> Result<f64, Self::IoError> {
        Ok(self.query(command)?.number()?)
    }
}

/// An open session with one instrument.
///
/// You can create a session using any interface which implements [embedded_io::Read] &
/// [embedded_io::Write]. The session owns the transport exclusively; it is released by
/// [`Session::close`] or when the session is dropped.
///
/// Every exchange takes `&mut self`, so a command is never written while a previous response is
/// still being read. To share a session between threads, put it behind a mutex.
///
/// `L` is the capacity of the receive buffer, i.e. the longest response line accepted.
pub struct Session<S: embedded_io::Read + embedded_io::Write, const L: usize = 256> {
    transport: Option<S>,
    config: SessionConfig,
    rx: heapless::Vec<u8, L>,
    faulted: bool,
    /// An exchange was abandoned mid-reply; drain the transport before the next one.
    resync: bool,
    last_error: Option<LastError>,
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> Session<S, L> {
    /// Wrap an already acquired transport.
    pub fn new(transport: S, config: SessionConfig) -> Result<Self, S::Error> {
        config.validate()?;
        debug!(
            timeout_ms = config.timeout_ms,
            command_terminator = %config.command_terminator.escape_default(),
            response_terminator = %config.response_terminator.escape_default(),
            "SCPI session opened"
        );
        Ok(Self {
            transport: Some(transport),
            config,
            rx: heapless::Vec::new(),
            faulted: false,
            resync: false,
            last_error: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// True until the session is closed.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// True once a transport failure has made the session unusable.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// The most recent failure, if any.
    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    pub fn take_last_error(&mut self) -> Option<LastError> {
        self.last_error.take()
    }

    /// Send a command which produces no response.
    pub fn write_command(&mut self, command: &str) -> Result<(), S::Error> {
        let result = self.send(command);
        self.record(result)
    }

    /// Send a command and wait up to the configured timeout for its response.
    pub fn query(&mut self, command: &str) -> Result<Response, S::Error> {
        self.query_with_timeout(command, self.config.timeout())
    }

    /// Send a command and wait up to `timeout` for its response.
    pub fn query_with_timeout(
        &mut self,
        command: &str,
        timeout: MillisDurationU32,
    ) -> Result<Response, S::Error> {
        let result = self.exchange(command, timeout);
        self.record(result)
    }

    /// Send a command and collect every response line that arrives within `timeout`.
    ///
    /// For replies spanning several lines. Always waits out the full timeout, and fails with
    /// [`Error::Timeout`] only when no line arrived at all.
    pub fn query_lines(
        &mut self,
        command: &str,
        timeout: MillisDurationU32,
    ) -> Result<Vec<String>, S::Error> {
        let result = self.exchange_lines(command, timeout);
        self.record(result)
    }

    /// Query and parse the response as a decimal number.
    pub fn query_number(&mut self, command: &str) -> Result<f64, S::Error> {
        self.query_as(command, Response::number)
    }

    /// Query and parse the response as a list of numbers.
    pub fn query_numbers(&mut self, command: &str) -> Result<Vec<f64>, S::Error> {
        self.query_as(command, Response::numbers)
    }

    /// Query and coerce the response into the declared kind of value.
    pub fn query_value(&mut self, command: &str, kind: ReturnKind) -> Result<Value, S::Error> {
        self.query_as(command, |response| response.value(kind))
    }

    /// Query and parse the response as an SCPI boolean.
    pub fn query_state(&mut self, command: &str) -> Result<State, S::Error> {
        self.query_as(command, Response::state)
    }

    /// Query the status and map it through the fixed status table.
    pub fn status(&mut self) -> Result<StatusCode, S::Error> {
        let command = self.config.status_command.clone();
        self.query_as(&command, Response::status)
    }

    /// Send the reset command. No response is read and success is not verified.
    pub fn reset(&mut self) -> Result<(), S::Error> {
        self.write_command(CommonCommand::Reset.as_str())
    }

    /// Read the identification string, `*IDN?`.
    pub fn identify(&mut self) -> Result<String, S::Error> {
        self.query(CommonQuery::Identify.as_str())
            .map(Response::into_text)
    }

    /// Read and decode the standard event status register, `*ESR?`.
    ///
    /// Reading the register clears it on the instrument.
    pub fn event_status(&mut self) -> Result<EventStatus, S::Error> {
        self.query_as(CommonQuery::EventStatus.as_str(), |response| {
            let value = response.integer()?;
            u8::try_from(value)
                .map(EventStatus::from_register)
                .map_err(|_| ParseError {
                    command: response.command().to_string(),
                    payload: response.text().to_string(),
                    expected: ReturnKind::Status,
                })
        })
    }

    /// Wait for pending operations to complete, `*OPC?`.
    pub fn operation_complete(&mut self) -> Result<bool, S::Error> {
        self.query_state(CommonQuery::OperationComplete.as_str())
            .map(bool::from)
    }

    /// Clear the status registers, then return the event status read afterwards.
    pub fn clear_status(&mut self) -> Result<EventStatus, S::Error> {
        self.write_command(CommonCommand::ClearStatus.as_str())?;
        self.event_status()
    }

    /// Set whether the status registers are cleared at power on, `*PSC`.
    pub fn set_power_on_clear(&mut self, state: impl Into<State>) -> Result<(), S::Error> {
        let flag = bool::from(state.into()) as u8;
        let command = Command::from(CommonCommand::PowerOnClear).arg(flag);
        self.write_command(command.as_str())
    }

    /// Read whether the status registers are cleared at power on.
    pub fn get_power_on_clear(&mut self) -> Result<State, S::Error> {
        self.query_state(CommonQuery::PowerOnClear.as_str())
    }

    /// Release the transport. Calling this again does nothing.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            drop(transport);
            self.rx.clear();
            debug!("SCPI session closed");
        }
    }

    /// Give the transport back, closing the session.
    pub fn into_inner(mut self) -> Option<S> {
        self.transport.take()
    }

    fn query_as<T>(
        &mut self,
        command: &str,
        parse: impl FnOnce(&Response) -> core::result::Result<T, ParseError>,
    ) -> Result<T, S::Error> {
        let response = self.query(command)?;
        let parsed = parse(&response).map_err(Error::from);
        self.record(parsed)
    }

    fn record<T>(&mut self, result: Result<T, S::Error>) -> Result<T, S::Error> {
        if let Err(err) = &result {
            // A closed session has nothing left to fault.
            if err.kind().is_terminal() && !self.faulted && self.transport.is_some() {
                error!(%err, "SCPI session faulted");
                self.faulted = true;
            }
            self.last_error = Some(LastError::from(err));
        }
        result
    }

    fn transport(&mut self, command: &str) -> Result<&mut S, S::Error> {
        if self.faulted {
            return Err(Error::Connection(format!(
                "`{command}` not sent, session faulted by an earlier transport failure"
            )));
        }
        self.transport
            .as_mut()
            .ok_or_else(|| Error::Connection(format!("`{command}` not sent, session is closed")))
    }

    fn exchange(&mut self, command: &str, timeout: MillisDurationU32) -> Result<Response, S::Error> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(timeout.to_millis().into());

        self.prepare(command, started, deadline)?;
        self.send(command)?;
        loop {
            let Some(line) = self.read_line(command, deadline)? else {
                return Err(self.timed_out(command, started));
            };
            if self.config.skip_echo && line == command {
                trace!(command, "skipping echo");
                continue;
            }
            let elapsed = millis_since(started);
            trace!(command, response = %line.escape_default(), elapsed_ms = elapsed.to_millis(), "rx");
            return Ok(Response::new(command, line, elapsed));
        }
    }

    fn exchange_lines(
        &mut self,
        command: &str,
        timeout: MillisDurationU32,
    ) -> Result<Vec<String>, S::Error> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(timeout.to_millis().into());

        self.prepare(command, started, deadline)?;
        self.send(command)?;
        let mut lines = Vec::new();
        while let Some(line) = self.read_line(command, deadline)? {
            if self.config.skip_echo && line == command && lines.is_empty() {
                trace!(command, "skipping echo");
                continue;
            }
            trace!(command, response = %line.escape_default(), "rx");
            lines.push(line);
        }
        if lines.is_empty() {
            return Err(self.timed_out(command, started));
        }
        Ok(lines)
    }

    /// Get the line clean for a new exchange: drop buffered leftovers, and drain the transport when
    /// an earlier exchange was abandoned mid-reply.
    fn prepare(&mut self, command: &str, started: Instant, deadline: Instant) -> Result<(), S::Error> {
        self.discard_stale();
        if self.resync {
            self.drain(command, started, deadline)?;
        }
        Ok(())
    }

    fn timed_out(&mut self, command: &str, started: Instant) -> Error<S::Error> {
        let elapsed = millis_since(started);
        warn!(command, elapsed_ms = elapsed.to_millis(), "SCPI query timed out");
        // The reply may still arrive after we stop waiting.
        self.resync = true;
        Error::Timeout {
            command: command.to_string(),
            elapsed,
        }
    }

    fn send(&mut self, command: &str) -> Result<(), S::Error> {
        if !command.is_ascii() || command.contains(['\r', '\n']) {
            return Err(Error::Protocol {
                command: command.to_string(),
                fault: ProtocolFault::InvalidCommand,
            });
        }

        let mut frame = String::with_capacity(command.len() + self.config.command_terminator.len());
        frame.push_str(command);
        frame.push_str(&self.config.command_terminator);
        trace!(command = %frame.escape_default(), "tx");

        let transport = self.transport(command)?;
        let bytes = frame.as_bytes();
        let mut written = 0;
        while written < bytes.len() {
            match transport.write(&bytes[written..]) {
                Ok(0) => {
                    return Err(Error::ShortWrite {
                        command: command.to_string(),
                        written,
                        expected: bytes.len(),
                    });
                }
                Ok(count) => written += count,
                Err(error) => {
                    return Err(Error::Io {
                        command: command.to_string(),
                        error,
                    });
                }
            }
        }
        transport.flush().map_err(|error| Error::Io {
            command: command.to_string(),
            error,
        })
    }

    /// Read one transport chunk into `buf`. `Ok(None)` means no data arrived within the transport's
    /// own poll timeout.
    fn read_chunk(&mut self, command: &str, buf: &mut [u8]) -> Result<Option<usize>, S::Error> {
        match self.transport(command)?.read(buf) {
            Ok(0) => Err(Error::Disconnected {
                command: command.to_string(),
            }),
            Ok(count) => Ok(Some(count)),
            Err(error)
                if matches!(
                    error.kind(),
                    embedded_io::ErrorKind::TimedOut | embedded_io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(error) => Err(Error::Io {
                command: command.to_string(),
                error,
            }),
        }
    }

    /// Read up to and excluding the response terminator. `Ok(None)` once `deadline` has passed.
    fn read_line(&mut self, command: &str, deadline: Instant) -> Result<Option<String>, S::Error> {
        let mut chunk = [0u8; 32];
        loop {
            if let Some(line) = self.take_line(command)? {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Never read more than the buffer can hold, so nothing read is ever dropped.
            let room = chunk.len().min(L - self.rx.len());
            if room == 0 {
                return Err(self.overflowed(command, deadline));
            }
            if let Some(count) = self.read_chunk(command, &mut chunk[..room])? {
                if self.rx.extend_from_slice(&chunk[..count]).is_err() {
                    return Err(self.overflowed(command, deadline));
                }
            }
        }
    }

    /// The receive buffer filled up without a terminator. Skip the rest of the line so the next
    /// exchange starts on a line boundary.
    fn overflowed(&mut self, command: &str, deadline: Instant) -> Error<S::Error> {
        let overflow = Error::Protocol {
            command: command.to_string(),
            fault: ProtocolFault::Overflow { capacity: L },
        };
        let terminator = self.config.response_terminator.clone().into_bytes();
        let mut matched = self
            .rx
            .iter()
            .fold(0, |matched, &byte| advance(&terminator, matched, byte));
        self.rx.clear();

        let mut chunk = [0u8; 32];
        while Instant::now() < deadline {
            let count = match self.read_chunk(command, &mut chunk) {
                Ok(Some(count)) => count,
                Ok(None) => continue,
                Err(err) => return err,
            };
            for (index, &byte) in chunk[..count].iter().enumerate() {
                matched = advance(&terminator, matched, byte);
                if matched == terminator.len() {
                    // Anything after the terminator was not asked for.
                    self.resync = index + 1 < count;
                    return overflow;
                }
            }
        }
        self.resync = true;
        overflow
    }

    /// Remove one terminated line from the receive buffer, if there is one.
    fn take_line(&mut self, command: &str) -> Result<Option<String>, S::Error> {
        let terminator = self.config.response_terminator.as_bytes();
        let Some(end) = self
            .rx
            .windows(terminator.len())
            .position(|window| window == terminator)
        else {
            return Ok(None);
        };

        let decoded = match self.rx[..end].iter().position(|byte| !byte.is_ascii()) {
            Some(offset) => Err(Error::Protocol {
                command: command.to_string(),
                fault: ProtocolFault::NonAscii {
                    byte: self.rx[offset],
                    offset,
                },
            }),
            // ASCII is always valid UTF-8.
            None => Ok(String::from_utf8_lossy(&self.rx[..end]).into_owned()),
        };

        let consumed = end + terminator.len();
        let remaining = self.rx.len() - consumed;
        self.rx.copy_within(consumed.., 0);
        self.rx.truncate(remaining);

        decoded.map(Some)
    }

    fn discard_stale(&mut self) {
        if !self.rx.is_empty() {
            warn!(
                bytes = self.rx.len(),
                data = %String::from_utf8_lossy(&self.rx).escape_default(),
                "discarding unsolicited input"
            );
            self.rx.clear();
        }
    }

    /// Read and throw away whatever the transport still holds, until it goes quiet.
    fn drain(&mut self, command: &str, started: Instant, deadline: Instant) -> Result<(), S::Error> {
        let mut chunk = [0u8; 32];
        let mut discarded = 0;
        loop {
            if Instant::now() >= deadline {
                // Still receiving; resync stays set for the next attempt.
                return Err(self.timed_out(command, started));
            }
            match self.read_chunk(command, &mut chunk)? {
                Some(count) => discarded += count,
                None => break,
            }
        }
        if discarded > 0 {
            warn!(command, bytes = discarded, "drained late reply before sending");
        }
        self.resync = false;
        Ok(())
    }
}

/// Step a terminator match by one byte. Returns the number of terminator bytes matched so far.
fn advance(terminator: &[u8], matched: usize, byte: u8) -> usize {
    if terminator.get(matched) == Some(&byte) {
        matched + 1
    } else if terminator.first() == Some(&byte) {
        1
    } else {
        0
    }
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> ScpiBase for Session<S, L> {
    type IoError = S::Error;

    fn write_command(&mut self, command: &str) -> Result<(), S::Error> {
        Session::write_command(self, command)
    }

    fn query(&mut self, command: &str) -> Result<Response, S::Error> {
        Session::query(self, command)
    }

    fn status(&mut self) -> Result<StatusCode, S::Error> {
        Session::status(self)
    }

    fn reset(&mut self) -> Result<(), S::Error> {
        Session::reset(self)
    }

    fn query_number(&mut self, command: &str) -> Result<f64, S::Error> {
        Session::query_number(self, command)
    }
}

fn millis_since(started: Instant) -> MillisDurationU32 {
    let millis = u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX);
    MillisDurationU32::millis(millis)
}
