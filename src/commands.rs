//! Static table of the requests understood by the meter.
//!
//! Request frames are sent exactly as stored here: wake-up preamble,
//! meter address, control code, data identifier (offset encoded),
//! checksum and end byte.

use crate::protocol::{Reading, ReadingKind};
use crate::Error;

#[derive(Debug)]
pub struct Command {
    pub id: &'static str,
    /// Short key used by the interactive menu.
    pub alias: Option<&'static str>,
    pub description: &'static str,
    pub request: &'static [u8],
    pub parser: Option<ReadingKind>,
}

impl Command {
    /// Interprets the reply with the bound parser.
    pub fn interpret(&self, response: &[u8]) -> Result<Reading, Error> {
        match self.parser {
            Some(kind) => kind.parse(response),
            None if response.is_empty() => Err(Error::NoResponse),
            None => Ok(Reading::Unparsed {
                length: response.len(),
            }),
        }
    }
}

/// A named sequence of commands run one after the other.
#[derive(Debug)]
pub struct Composite {
    pub id: &'static str,
    pub alias: Option<&'static str>,
    pub description: &'static str,
    pub steps: &'static [&'static Command],
}

#[derive(Debug, Clone, Copy)]
pub enum Entry {
    Single(&'static Command),
    Composite(&'static Composite),
}

impl Entry {
    pub fn id(&self) -> &'static str {
        match self {
            Entry::Single(command) => command.id,
            Entry::Composite(composite) => composite.id,
        }
    }

    pub fn alias(&self) -> Option<&'static str> {
        match self {
            Entry::Single(command) => command.alias,
            Entry::Composite(composite) => composite.alias,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Entry::Single(command) => command.description,
            Entry::Composite(composite) => composite.description,
        }
    }

    fn matches(&self, key: &str) -> bool {
        self.id().eq_ignore_ascii_case(key)
            || self
                .alias()
                .is_some_and(|alias| alias.eq_ignore_ascii_case(key))
    }
}

pub static DATETIME: Command = Command {
    id: "datetime",
    alias: Some("1"),
    description: "Date and time",
    request: &[
        0xFE, 0xFE, 0xFE, 0x68, 0x18, 0x47, 0x84, 0x00, 0x00, 0x00, 0x68, 0x01, 0x02, 0x45, 0xF3,
        0xEE, 0x16,
    ],
    parser: Some(ReadingKind::DateTime),
};

pub static POWER: Command = Command {
    id: "power",
    alias: Some("2"),
    description: "Instantaneous power",
    request: &[
        0xFE, 0xFE, 0xFE, 0x68, 0x18, 0x47, 0x84, 0x00, 0x00, 0x00, 0x68, 0x01, 0x02, 0x63, 0xE9,
        0x02, 0x16,
    ],
    parser: Some(ReadingKind::Power),
};

pub static VOLTAGE: Command = Command {
    id: "voltage",
    alias: Some("3"),
    description: "Voltage (phase A)",
    request: &[
        0xFE, 0xFE, 0xFE, 0x68, 0x18, 0x47, 0x84, 0x00, 0x00, 0x00, 0x68, 0x01, 0x02, 0x44, 0xE9,
        0xE3, 0x16,
    ],
    parser: Some(ReadingKind::Voltage),
};

pub static CURRENT: Command = Command {
    id: "current",
    alias: Some("4"),
    description: "Current (phase A)",
    request: &[
        0xFE, 0xFE, 0xFE, 0x68, 0x18, 0x47, 0x84, 0x00, 0x00, 0x00, 0x68, 0x01, 0x02, 0x54, 0xE9,
        0xF3, 0x16,
    ],
    parser: Some(ReadingKind::Current),
};

pub static ACTIVE_ENERGY: Command = Command {
    id: "active-energy",
    alias: Some("5"),
    description: "Active energy (total + tariffs)",
    request: &[
        0xFE, 0xFE, 0xFE, 0x68, 0x18, 0x47, 0x84, 0x00, 0x00, 0x00, 0x68, 0x01, 0x02, 0x52, 0xC3,
        0xCB, 0x16,
    ],
    parser: Some(ReadingKind::ActiveEnergyTariffs),
};

pub static REACTIVE_ENERGY: Command = Command {
    id: "reactive-energy",
    alias: Some("6"),
    description: "Reactive energy (total)",
    request: &[
        0xFE, 0xFE, 0xFE, 0x68, 0x18, 0x47, 0x84, 0x00, 0x00, 0x00, 0x68, 0x01, 0x02, 0x43, 0xC4,
        0xBD, 0x16,
    ],
    parser: Some(ReadingKind::ReactiveEnergyTotal),
};

pub static ENERGY: Composite = Composite {
    id: "energy",
    alias: None,
    description: "Full poll: all energy (active + reactive)",
    steps: &[&ACTIVE_ENERGY, &REACTIVE_ENERGY],
};

pub static CHARACTERISTICS: Composite = Composite {
    id: "characteristics",
    alias: Some("chars"),
    description: "Full poll: network characteristics (U, I, P)",
    steps: &[&VOLTAGE, &CURRENT, &POWER],
};

static ENTRIES: [Entry; 8] = [
    Entry::Single(&DATETIME),
    Entry::Single(&POWER),
    Entry::Single(&VOLTAGE),
    Entry::Single(&CURRENT),
    Entry::Single(&ACTIVE_ENERGY),
    Entry::Single(&REACTIVE_ENERGY),
    Entry::Composite(&ENERGY),
    Entry::Composite(&CHARACTERISTICS),
];

/// All commands in menu order.
pub fn entries() -> impl Iterator<Item = Entry> {
    ENTRIES.iter().copied()
}

/// Finds a command by id or alias, ignoring ASCII case.
pub fn lookup(key: &str) -> Option<Entry> {
    let key = key.trim();
    entries().find(|entry| entry.matches(key))
}
