use std::fmt;

/// Raw bytes attached to an error so a failed decode can be compared
/// against a wire capture.
#[derive(Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl From<&[u8]> for HexBytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{self}]")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A byte has a nibble above 9 after the offset was removed.
    #[error("Malformed BCD byte {byte:#04X} in payload [{payload}]")]
    MalformedBcd { byte: u8, payload: HexBytes },
    /// The response is shorter than the payload window of its reading.
    #[error("Truncated frame: required={required} received={received} [{frame}]")]
    TruncatedFrame {
        required: usize,
        received: usize,
        frame: HexBytes,
    },
    /// The payload is empty or too long to form a numeric value.
    #[error("Invalid payload length {length} [{payload}]")]
    InvalidPayloadLength { length: usize, payload: HexBytes },
    /// Nothing was received before the read timeout expired.
    #[error("No response from meter")]
    NoResponse,
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),
    /// Open, write or read failure at the serial port.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl Error {
    /// Returns true for errors raised while interpreting response bytes.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedBcd { .. }
                | Error::TruncatedFrame { .. }
                | Error::InvalidPayloadLength { .. }
        )
    }
}
