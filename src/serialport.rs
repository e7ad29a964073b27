use crate::protocol::BAUD_RATE;
use crate::session::Transport;
use crate::Error;
use ::serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Serial port configured for the meter: 2400 baud, 8 data bits, even
/// parity, 1 stop bit, DTR and RTS asserted. The port is closed on drop.
#[derive(Debug)]
pub struct SerialTransport {
    serial: Box<dyn SerialPort>,
    port: String,
}

impl SerialTransport {
    pub fn open(port: &str, timeout: Duration) -> Result<Self, Error> {
        let mut serial = ::serialport::new(port, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(io::Error::from)?;
        serial
            .write_data_terminal_ready(true)
            .map_err(io::Error::from)?;
        serial.write_request_to_send(true).map_err(io::Error::from)?;
        log::info!("Serial port '{port}' opened at {BAUD_RATE} baud, timeout {timeout:?}");
        Ok(Self {
            serial,
            port: port.to_string(),
        })
    }
}

impl Transport for SerialTransport {
    fn reset_buffers(&mut self) -> io::Result<()> {
        self.serial.clear(ClearBuffer::All).map_err(io::Error::from)
    }

    fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.serial.write_all(frame)?;
        Ok(frame.len())
    }

    fn read(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        let mut rx_buffer = vec![0; max_bytes];
        let mut received = 0;
        // keep reading until the line stays quiet for one timeout
        while received < max_bytes {
            match self.serial.read(&mut rx_buffer[received..]) {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(err) => return Err(err),
            }
        }
        rx_buffer.truncate(received);
        Ok(rx_buffer)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        log::debug!("Closing serial port '{}'", self.port);
    }
}
