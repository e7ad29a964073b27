use crate::error::HexBytes;
use crate::Error;
use std::fmt;

#[cfg(feature = "protocol_serde")]
use serde::Serialize;

/// Line speed the meter answers on (8 data bits, even parity, 1 stop bit).
pub const BAUD_RATE: u32 = 2400;

/// Constant the meter adds to every payload byte before sending it.
pub const OFFSET: u8 = 0x33;

/// Every reply carries its payload at this position, after the preamble,
/// address, control code, length and data identifier.
pub const PAYLOAD_START: usize = 15;

/// Largest reply read from the transport in one exchange.
pub const MAX_RESPONSE_LENGTH: usize = 100;

const DATETIME_LENGTH: usize = 7;
const TARIFF_FIELD_LENGTH: usize = 4;
// 18 decimal digits still fit in a u64
const MAX_VALUE_LENGTH: usize = 9;

/// Removes the transmission offset from every byte (modulo 256).
pub fn decode_offset(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| b.wrapping_sub(OFFSET)).collect()
}

/// Adds the transmission offset to every byte (modulo 256).
pub fn encode_offset(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| b.wrapping_add(OFFSET)).collect()
}

/// Decodes one packed BCD byte into a value between 0 and 99.
pub fn decode_bcd_digit(byte: u8) -> Result<u8, Error> {
    let (high, low) = (byte >> 4, byte & 0x0f);
    if high > 9 || low > 9 {
        return Err(Error::MalformedBcd {
            byte,
            payload: HexBytes(vec![byte]),
        });
    }
    Ok(high * 10 + low)
}

/// Packs a value between 0 and 99 into one BCD byte.
pub fn encode_bcd_digit(value: u8) -> Option<u8> {
    (value < 100).then(|| ((value / 10) << 4) | (value % 10))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize))]
pub enum Unit {
    Volt,
    Ampere,
    Kilowatt,
    KilowattHour,
    KilovarHour,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Unit::Volt => write!(f, "V"),
            Unit::Ampere => write!(f, "A"),
            Unit::Kilowatt => write!(f, "kW"),
            Unit::KilowattHour => write!(f, "kWh"),
            Unit::KilovarHour => write!(f, "kvarh"),
        }
    }
}

/// A decoded numeric reading. The meter sends an unsigned decimal
/// magnitude, the physical value is `raw / 10^divisor_power`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize))]
pub struct Quantity {
    pub raw: u64,
    pub divisor_power: u32,
    pub unit: Unit,
    pub display_places: usize,
}

impl Quantity {
    pub fn value(&self) -> f64 {
        self.raw as f64 / 10f64.powi(self.divisor_power as i32)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.*} {}", self.display_places, self.value(), self.unit)
    }
}

/// Decodes a payload sent least significant BCD byte first into a scaled
/// quantity.
///
/// Errors carry the payload as received, before the offset was removed.
pub fn decode_scaled_value(
    payload: &[u8],
    unit: Unit,
    divisor_power: u32,
    display_places: usize,
) -> Result<Quantity, Error> {
    if payload.is_empty() || payload.len() > MAX_VALUE_LENGTH {
        log::warn!("Invalid value payload length={} payload={payload:02X?}", payload.len());
        return Err(Error::InvalidPayloadLength {
            length: payload.len(),
            payload: payload.into(),
        });
    }
    let mut raw: u64 = 0;
    for byte in decode_offset(payload).into_iter().rev() {
        let digits = decode_bcd_digit(byte).map_err(|_| {
            log::warn!("Invalid BCD byte - decoded={byte:02X} payload={payload:02X?}");
            Error::MalformedBcd {
                byte,
                payload: payload.into(),
            }
        })?;
        raw = raw * 100 + u64::from(digits);
    }
    Ok(Quantity {
        raw,
        divisor_power,
        unit,
        display_places,
    })
}

/// Date and time as kept by the meter clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize))]
pub struct MeterDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl fmt::Display for MeterDateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02}.{:02}.{} {:02}:{:02}:{:02}",
            self.day, self.month, self.year, self.hour, self.minute, self.second
        )
    }
}

/// Decodes the 7 byte clock payload: second, minute, hour, weekday
/// (ignored), day, month, year since 2000.
pub fn decode_datetime(payload: &[u8]) -> Result<MeterDateTime, Error> {
    if payload.len() != DATETIME_LENGTH {
        return Err(Error::InvalidPayloadLength {
            length: payload.len(),
            payload: payload.into(),
        });
    }
    let decoded = decode_offset(payload);
    let field = |index: usize| {
        decode_bcd_digit(decoded[index]).map_err(|_| {
            log::warn!(
                "Invalid BCD byte in date/time - index={index} decoded={:02X} payload={payload:02X?}",
                decoded[index]
            );
            Error::MalformedBcd {
                byte: decoded[index],
                payload: payload.into(),
            }
        })
    };
    Ok(MeterDateTime {
        second: field(0)?,
        minute: field(1)?,
        hour: field(2)?,
        day: field(4)?,
        month: field(5)?,
        year: 2000 + u16::from(field(6)?),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize))]
pub enum Tariff {
    Total,
    T1,
    T2,
    T3,
    T4,
}

impl Tariff {
    /// Order of the tariff fields inside the active energy block.
    pub const ALL: [Tariff; 5] = [Tariff::Total, Tariff::T1, Tariff::T2, Tariff::T3, Tariff::T4];
}

impl fmt::Display for Tariff {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Tariff::Total => write!(f, "Total"),
            Tariff::T1 => write!(f, "T1"),
            Tariff::T2 => write!(f, "T2"),
            Tariff::T3 => write!(f, "T3"),
            Tariff::T4 => write!(f, "T4"),
        }
    }
}

#[derive(Debug)]
pub struct TariffReading {
    pub tariff: Tariff,
    pub value: Result<Quantity, Error>,
}

#[derive(Debug)]
pub enum Reading {
    Quantity(Quantity),
    DateTime(MeterDateTime),
    /// One result per tariff field; a bad field does not hide the others.
    Tariffs(Vec<TariffReading>),
    /// Reply to a command that has no parser bound.
    Unparsed { length: usize },
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reading::Quantity(quantity) => write!(f, "{quantity}"),
            Reading::DateTime(datetime) => write!(f, "{datetime}"),
            Reading::Tariffs(tariffs) => {
                for (i, reading) in tariffs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    let label = format!("{}:", reading.tariff);
                    match &reading.value {
                        Ok(quantity) => write!(f, "  {label:<7}{quantity}")?,
                        Err(err) => write!(f, "  {label:<7}error: {err}")?,
                    }
                }
                Ok(())
            }
            Reading::Unparsed { length } => write!(f, "unparsed response ({length} bytes)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scale {
    unit: Unit,
    divisor_power: u32,
    display_places: usize,
}

impl Scale {
    const fn new(unit: Unit, divisor_power: u32, display_places: usize) -> Self {
        Self {
            unit,
            divisor_power,
            display_places,
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<Quantity, Error> {
        decode_scaled_value(
            payload,
            self.unit,
            self.divisor_power,
            self.display_places,
        )
    }
}

/// The kinds of replies the meter sends, each with its own payload
/// length and scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    DateTime,
    Power,
    Voltage,
    Current,
    ActiveEnergyTariffs,
    ReactiveEnergyTotal,
}

impl ReadingKind {
    pub const fn payload_len(self) -> usize {
        match self {
            ReadingKind::Voltage | ReadingKind::Current => 2,
            ReadingKind::Power => 3,
            ReadingKind::ReactiveEnergyTotal => TARIFF_FIELD_LENGTH,
            ReadingKind::ActiveEnergyTariffs => TARIFF_FIELD_LENGTH * Tariff::ALL.len(),
            ReadingKind::DateTime => DATETIME_LENGTH,
        }
    }

    /// Shortest reply that still holds the complete payload window.
    pub const fn min_response_len(self) -> usize {
        PAYLOAD_START + self.payload_len()
    }

    const fn scale(self) -> Option<Scale> {
        match self {
            ReadingKind::Voltage => Some(Scale::new(Unit::Volt, 0, 2)),
            ReadingKind::Current => Some(Scale::new(Unit::Ampere, 2, 2)),
            ReadingKind::Power => Some(Scale::new(Unit::Kilowatt, 4, 4)),
            ReadingKind::ReactiveEnergyTotal => Some(Scale::new(Unit::KilovarHour, 2, 2)),
            ReadingKind::ActiveEnergyTariffs => Some(Scale::new(Unit::KilowattHour, 2, 2)),
            ReadingKind::DateTime => None,
        }
    }

    /// Validates the reply length and returns the payload window.
    pub fn payload(self, response: &[u8]) -> Result<&[u8], Error> {
        if response.is_empty() {
            return Err(Error::NoResponse);
        }
        let required = self.min_response_len();
        if response.len() < required {
            log::warn!(
                "Invalid buffer size - required={} received={}",
                required,
                response.len()
            );
            return Err(Error::TruncatedFrame {
                required,
                received: response.len(),
                frame: response.into(),
            });
        }
        Ok(&response[PAYLOAD_START..required])
    }

    pub fn parse(self, response: &[u8]) -> Result<Reading, Error> {
        let payload = self.payload(response)?;
        match (self, self.scale()) {
            (ReadingKind::ActiveEnergyTariffs, Some(scale)) => {
                Ok(Reading::Tariffs(decode_tariffs(payload, scale)))
            }
            (_, Some(scale)) => scale.decode(payload).map(Reading::Quantity),
            (_, None) => decode_datetime(payload).map(Reading::DateTime),
        }
    }
}

fn decode_tariffs(payload: &[u8], scale: Scale) -> Vec<TariffReading> {
    payload
        .chunks_exact(TARIFF_FIELD_LENGTH)
        .zip(Tariff::ALL)
        .map(|(field, tariff)| TariffReading {
            tariff,
            value: scale.decode(field),
        })
        .collect()
}
