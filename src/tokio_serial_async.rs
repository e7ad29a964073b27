//! Asynchronous session for applications built on the Tokio runtime,
//! using the `tokio-serial` crate.
//!
//! Exchanges are still strictly sequential: every method takes
//! `&mut self`, so only one request is outstanding at a time.
//!
//! # Example
//!
//! ```no_run
//! use cumeter_lib::session::DEFAULT_TIMEOUT;
//! use cumeter_lib::tokio_serial_async::{AsyncSerialTransport, AsyncSession};
//!
//! # async fn run() -> Result<(), cumeter_lib::Error> {
//! let transport = AsyncSerialTransport::open("/dev/ttyUSB0", DEFAULT_TIMEOUT)?;
//! let mut session = AsyncSession::new(transport);
//! let outcome = session.execute("energy").await?;
//! for step in outcome.steps() {
//!     match &step.reading {
//!         Ok(reading) => println!("{}:\n{reading}", step.command.description),
//!         Err(err) => println!("{}: {err}", step.command.description),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::commands::{self, Command, Entry};
use crate::protocol::{Reading, BAUD_RATE, MAX_RESPONSE_LENGTH};
use crate::session::{self, ExchangeState, Outcome, Step, DEFAULT_SETTLE_DELAY};
use crate::Error;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt};

/// Asynchronous byte transport to the meter, see [`session::Transport`].
pub trait AsyncTransport {
    /// Discards pending input and output.
    fn reset_buffers(&mut self) -> io::Result<()>;
    /// Returns the number of bytes written.
    fn write(&mut self, frame: &[u8]) -> impl Future<Output = io::Result<usize>>;
    /// Reads up to `max_bytes`. An empty result means nothing arrived in time.
    fn read(&mut self, max_bytes: usize) -> impl Future<Output = io::Result<Vec<u8>>>;
}

/// `tokio_serial::SerialStream` with the meter line settings.
#[derive(Debug)]
pub struct AsyncSerialTransport {
    serial: tokio_serial::SerialStream,
    io_timeout: Duration,
}

impl AsyncSerialTransport {
    /// Opens the port at 2400 baud, 8E1 and asserts DTR and RTS.
    /// `timeout` bounds the write and every wait for the next reply byte.
    pub fn open(port: &str, timeout: Duration) -> Result<Self, Error> {
        let mut serial = tokio_serial::new(port, BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::Even)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(io::Error::from)?;
        serial
            .write_data_terminal_ready(true)
            .map_err(io::Error::from)?;
        serial.write_request_to_send(true).map_err(io::Error::from)?;
        log::info!("Serial port '{port}' opened at {BAUD_RATE} baud, timeout {timeout:?}");
        Ok(Self {
            serial,
            io_timeout: timeout,
        })
    }
}

impl AsyncTransport for AsyncSerialTransport {
    fn reset_buffers(&mut self) -> io::Result<()> {
        self.serial
            .clear(ClearBuffer::All)
            .map_err(io::Error::from)
    }

    async fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        tokio::time::timeout(self.io_timeout, self.serial.write_all(frame))
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;
        Ok(frame.len())
    }

    async fn read(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        let mut rx_buffer = vec![0; max_bytes];
        let mut received = 0;
        while received < max_bytes {
            match tokio::time::timeout(self.io_timeout, self.serial.read(&mut rx_buffer[received..]))
                .await
            {
                // the line stayed quiet for one timeout
                Err(_elapsed) => break,
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => received += n,
                Ok(Err(err)) if err.kind() == io::ErrorKind::TimedOut => break,
                Ok(Err(err)) => return Err(err),
            }
        }
        rx_buffer.truncate(received);
        Ok(rx_buffer)
    }
}

/// The asynchronous counterpart of [`session::Session`].
#[derive(Debug)]
pub struct AsyncSession<T> {
    transport: T,
    settle_delay: Duration,
    state: ExchangeState,
}

impl<T: AsyncTransport> AsyncSession<T> {
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

    async fn send_and_receive(&mut self, request: &[u8]) -> io::Result<Vec<u8>> {
        self.transition(ExchangeState::Sending);
        self.transport.reset_buffers()?;
        log::trace!("write bytes: {request:02X?}");
        let written = self.transport.write(request).await?;
        session::check_written(written, request.len())?;

        self.transition(ExchangeState::AwaitingResponse);
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        let response = self.transport.read(MAX_RESPONSE_LENGTH).await?;
        log::trace!("receive_bytes: {response:02X?}");
        Ok(response)
    }

    /// Sends the request of `command` and interprets the reply. No retry.
    pub async fn exchange(&mut self, command: &Command) -> Result<Reading, Error> {
        self.transition(ExchangeState::Idle);
        let response = self.send_and_receive(command.request).await;
        let (state, reading) = session::conclude(command, response);
        self.transition(state);
        reading
    }

    /// Runs a single command or every step of a composite, in order.
    /// A failing step does not stop the remaining ones.
    pub async fn execute(&mut self, key: &str) -> Result<Outcome, Error> {
        match commands::lookup(key) {
            Some(Entry::Single(command)) => {
                let reading = self.exchange(command).await;
                Ok(Outcome::Single(Step::new(command, reading)))
            }
            Some(Entry::Composite(composite)) => {
                let mut steps = Vec::with_capacity(composite.steps.len());
                for &command in composite.steps {
                    let reading = self.exchange(command).await;
                    steps.push(Step::new(command, reading));
                }
                Ok(Outcome::Composite(steps))
            }
            None => Err(Error::UnknownCommand(key.to_string())),
        }
    }
}
