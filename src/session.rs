//! One request/reply exchange at a time against a half-duplex transport.
//!
//! # Example
//!
//! ```no_run
//! use cumeter_lib::serialport::SerialTransport;
//! use cumeter_lib::session::{Session, DEFAULT_TIMEOUT};
//!
//! let transport = SerialTransport::open("/dev/ttyUSB0", DEFAULT_TIMEOUT)?;
//! let mut session = Session::new(transport);
//! for step in session.execute("characteristics")?.steps() {
//!     match &step.reading {
//!         Ok(reading) => println!("{}: {reading}", step.command.description),
//!         Err(err) => println!("{}: {err}", step.command.description),
//!     }
//! }
//! # Ok::<(), cumeter_lib::Error>(())
//! ```

use crate::commands::{self, Command, Entry};
use crate::protocol::{Reading, MAX_RESPONSE_LENGTH};
use crate::Error;
use std::io;
use std::time::Duration;

/// Pause between writing a request and reading, so the meter can start
/// replying.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// How long a transport read waits for reply bytes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Byte transport to the meter.
pub trait Transport {
    /// Discards pending input and output.
    fn reset_buffers(&mut self) -> io::Result<()>;
    /// Returns the number of bytes written.
    fn write(&mut self, frame: &[u8]) -> io::Result<usize>;
    /// Reads up to `max_bytes`, blocking at most the transport timeout.
    /// An empty result means nothing arrived in time.
    fn read(&mut self, max_bytes: usize) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sending,
    AwaitingResponse,
    Parsed,
    TimedOut,
    TransportError,
}

/// Result of one exchange within a command execution.
#[derive(Debug)]
pub struct Step {
    pub command: &'static Command,
    pub reading: Result<Reading, Error>,
}

#[derive(Debug)]
pub enum Outcome {
    Single(Step),
    Composite(Vec<Step>),
}

impl Outcome {
    pub fn steps(&self) -> &[Step] {
        match self {
            Outcome::Single(step) => std::slice::from_ref(step),
            Outcome::Composite(steps) => steps,
        }
    }

    pub fn into_steps(self) -> Vec<Step> {
        match self {
            Outcome::Single(step) => vec![step],
            Outcome::Composite(steps) => steps,
        }
    }

    /// True when not a single step produced a reading.
    pub fn all_failed(&self) -> bool {
        self.steps().iter().all(|step| step.reading.is_err())
    }
}

impl Step {
    pub(crate) fn new(command: &'static Command, reading: Result<Reading, Error>) -> Self {
        if let Err(err) = &reading {
            if err.is_decode_error() {
                log::warn!("Cannot decode '{}': {err}", command.id);
            }
        }
        Self { command, reading }
    }
}

/// Fails with `WriteZero` unless the whole request went out.
pub(crate) fn check_written(written: usize, expected: usize) -> io::Result<()> {
    if written != expected {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("incomplete write: {written} of {expected} bytes"),
        ));
    }
    Ok(())
}

/// Maps the transport result of an exchange to its final state and reading.
pub(crate) fn conclude(
    command: &Command,
    response: io::Result<Vec<u8>>,
) -> (ExchangeState, Result<Reading, Error>) {
    match response {
        Err(err) => {
            log::error!("Exchange '{}' failed: {err}", command.id);
            (ExchangeState::TransportError, Err(Error::Transport(err)))
        }
        Ok(response) if response.is_empty() => {
            log::debug!("No response to '{}'", command.id);
            (ExchangeState::TimedOut, Err(Error::NoResponse))
        }
        Ok(response) => (ExchangeState::Parsed, command.interpret(&response)),
    }
}

/// Owns the transport for a sequence of exchanges. Dropping the session
/// releases the transport.
#[derive(Debug)]
pub struct Session<T> {
    transport: T,
    settle_delay: Duration,
    state: ExchangeState,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            settle_delay: DEFAULT_SETTLE_DELAY,
            state: ExchangeState::Idle,
        }
    }

    pub fn set_settle_delay(&mut self, delay: Duration) {
        log::trace!("set settle delay to {delay:?}");
        self.settle_delay = delay;
    }

    /// State reached by the last exchange.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn transition(&mut self, state: ExchangeState) {
        log::trace!("exchange state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn send_and_receive(&mut self, request: &[u8]) -> io::Result<Vec<u8>> {
        self.transition(ExchangeState::Sending);
        self.transport.reset_buffers()?;
        log::trace!("write bytes: {request:02X?}");
        let written = self.transport.write(request)?;
        check_written(written, request.len())?;

        self.transition(ExchangeState::AwaitingResponse);
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }
        let response = self.transport.read(MAX_RESPONSE_LENGTH)?;
        log::trace!("receive_bytes: {response:02X?}");
        Ok(response)
    }

    /// Sends the request of `command` and interprets the reply.
    ///
    /// There is no retry: a timeout is reported as [`Error::NoResponse`].
    pub fn exchange(&mut self, command: &Command) -> Result<Reading, Error> {
        self.transition(ExchangeState::Idle);
        let response = self.send_and_receive(command.request);
        let (state, reading) = conclude(command, response);
        self.transition(state);
        reading
    }

    fn step(&mut self, command: &'static Command) -> Step {
        let reading = self.exchange(command);
        Step::new(command, reading)
    }

    /// Runs a single command or every step of a composite, in order.
    /// A failing step does not stop the remaining ones.
    pub fn execute(&mut self, key: &str) -> Result<Outcome, Error> {
        match commands::lookup(key) {
            Some(Entry::Single(command)) => Ok(Outcome::Single(self.step(command))),
            Some(Entry::Composite(composite)) => {
                log::debug!(
                    "Running '{}' with {} steps",
                    composite.id,
                    composite.steps.len()
                );
                Ok(Outcome::Composite(
                    composite
                        .steps
                        .iter()
                        .map(|&command| self.step(command))
                        .collect(),
                ))
            }
            None => Err(Error::UnknownCommand(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CHARACTERISTICS, CURRENT, POWER, VOLTAGE};
    use crate::protocol::tests::{bcd_le, response_frame};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockTransport {
        written: Vec<Vec<u8>>,
        responses: VecDeque<io::Result<Vec<u8>>>,
        resets: usize,
        max_bytes: Vec<usize>,
    }

    impl MockTransport {
        fn with_responses(responses: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                responses: responses.into(),
                ..Default::default()
            }
        }
    }

    impl Transport for MockTransport {
        fn reset_buffers(&mut self) -> io::Result<()> {
            self.resets += 1;
            Ok(())
        }

        fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
            self.written.push(frame.to_vec());
            Ok(frame.len())
        }

        fn read(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
            self.max_bytes.push(max_bytes);
            self.responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn session(responses: Vec<io::Result<Vec<u8>>>) -> Session<MockTransport> {
        let mut session = Session::new(MockTransport::with_responses(responses));
        session.set_settle_delay(Duration::ZERO);
        session
    }

    #[test]
    fn single_exchange() {
        let mut session = session(vec![Ok(response_frame(&[0x30, 0x02]))]);
        assert_eq!(session.state(), ExchangeState::Idle);

        let outcome = session.execute("voltage").unwrap();
        let Outcome::Single(step) = &outcome else {
            panic!("expected a single step");
        };
        assert_eq!(step.command.id, "voltage");
        assert_eq!(step.reading.as_ref().unwrap().to_string(), "230.00 V");
        assert_eq!(session.state(), ExchangeState::Parsed);

        let transport = session.into_inner();
        assert_eq!(transport.resets, 1);
        assert_eq!(transport.written, vec![VOLTAGE.request.to_vec()]);
        assert_eq!(transport.max_bytes, vec![MAX_RESPONSE_LENGTH]);
    }

    #[test]
    fn timeout_is_no_response() {
        let mut session = session(vec![Ok(Vec::new())]);
        assert!(matches!(session.exchange(&POWER), Err(Error::NoResponse)));
        assert_eq!(session.state(), ExchangeState::TimedOut);
        // no retry
        assert_eq!(session.into_inner().written.len(), 1);
    }

    #[test]
    fn transport_failure() {
        let mut session = session(vec![Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "unplugged",
        ))]);
        assert!(matches!(session.exchange(&CURRENT), Err(Error::Transport(_))));
        assert_eq!(session.state(), ExchangeState::TransportError);
    }

    #[test]
    fn incomplete_write_is_transport_error() {
        struct ShortWrite;
        impl Transport for ShortWrite {
            fn reset_buffers(&mut self) -> io::Result<()> {
                Ok(())
            }
            fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
                Ok(frame.len() - 1)
            }
            fn read(&mut self, _max_bytes: usize) -> io::Result<Vec<u8>> {
                panic!("must not read after a failed write");
            }
        }
        let mut session = Session::new(ShortWrite);
        session.set_settle_delay(Duration::ZERO);
        match session.exchange(&VOLTAGE) {
            Err(Error::Transport(err)) => assert_eq!(err.kind(), io::ErrorKind::WriteZero),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn truncated_reply() {
        let mut session = session(vec![Ok(vec![0xfe; 10])]);
        assert!(matches!(
            session.exchange(&VOLTAGE),
            Err(Error::TruncatedFrame {
                required: 17,
                received: 10,
                ..
            })
        ));
        assert_eq!(session.state(), ExchangeState::Parsed);
    }

    #[test]
    fn unknown_command() {
        let mut session = session(Vec::new());
        assert!(matches!(
            session.execute("frequency"),
            Err(Error::UnknownCommand(key)) if key == "frequency"
        ));
        assert!(session.into_inner().written.is_empty());
    }

    #[test]
    fn characteristics_runs_every_step_in_order() {
        let mut session = session(vec![
            Ok(Vec::new()),
            Err(io::Error::new(io::ErrorKind::Other, "framing error")),
            Ok(response_frame(&bcd_le(15000, 3))),
        ]);
        let outcome = session.execute("characteristics").unwrap();
        let steps = outcome.steps();
        assert_eq!(steps.len(), 3);

        let ids: Vec<&str> = steps.iter().map(|s| s.command.id).collect();
        assert_eq!(ids, ["voltage", "current", "power"]);
        assert!(matches!(steps[0].reading, Err(Error::NoResponse)));
        assert!(matches!(steps[1].reading, Err(Error::Transport(_))));
        assert_eq!(steps[2].reading.as_ref().unwrap().to_string(), "1.5000 kW");

        let expected: Vec<Vec<u8>> = CHARACTERISTICS
            .steps
            .iter()
            .map(|c| c.request.to_vec())
            .collect();
        assert_eq!(session.into_inner().written, expected);
    }

    #[test]
    fn all_failed_covers_composites() {
        let mut silent = session(vec![Ok(Vec::new()), Ok(Vec::new()), Ok(Vec::new())]);
        let outcome = silent.execute("characteristics").unwrap();
        assert!(matches!(outcome, Outcome::Composite(_)));
        assert!(outcome.all_failed());

        let mut partial = session(vec![
            Ok(Vec::new()),
            Ok(response_frame(&[0x34, 0x12])),
            Ok(Vec::new()),
        ]);
        assert!(!partial.execute("characteristics").unwrap().all_failed());

        let mut single = session(vec![Ok(Vec::new())]);
        assert!(single.execute("voltage").unwrap().all_failed());
    }

    #[test]
    fn energy_composite() {
        let mut plain = Vec::new();
        for raw in [500, 200, 300, 0, 0] {
            plain.extend(bcd_le(raw, 4));
        }
        let mut session = session(vec![
            Ok(response_frame(&plain)),
            Ok(response_frame(&bcd_le(4200, 4))),
        ]);
        let steps = session.execute("energy").unwrap().into_steps();
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0].reading, Ok(Reading::Tariffs(ref t)) if t.len() == 5));
        assert_eq!(steps[1].reading.as_ref().unwrap().to_string(), "42.00 kvarh");
    }
}
