use anyhow::{Context, Result};
use cumeter_lib::protocol::{Quantity, Reading, ReadingKind, Tariff};
use cumeter_lib::session::{Session, Step, Transport};
use cumeter_lib::Error;
use log::{error, info, warn};
use serde::Serialize;

use crate::{commandline, mqtt};

/// Composite commands run on every poll.
const POLLED_COMMANDS: [&str; 2] = ["characteristics", "energy"];

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ActiveEnergy {
    pub total: Option<f64>,
    pub t1: Option<f64>,
    pub t2: Option<f64>,
    pub t3: Option<f64>,
    pub t4: Option<f64>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReactiveEnergy {
    pub total: Option<f64>,
}

/// One poll of the meter, in the shape the downstream time-series bridge
/// expects. Values are in kW, V, A, kWh and kvarh; failed readings are
/// `null`.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct MeterRecord {
    pub power: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub active_energy: ActiveEnergy,
    pub reactive_energy: ReactiveEnergy,
}

impl MeterRecord {
    pub fn from_steps<'a>(steps: impl IntoIterator<Item = &'a Step>) -> Self {
        let mut record = Self::default();
        for step in steps {
            let Ok(reading) = &step.reading else {
                continue;
            };
            match (step.command.parser, reading) {
                (Some(ReadingKind::Power), Reading::Quantity(q)) => record.power = Some(q.value()),
                (Some(ReadingKind::Voltage), Reading::Quantity(q)) => {
                    record.voltage = Some(q.value())
                }
                (Some(ReadingKind::Current), Reading::Quantity(q)) => {
                    record.current = Some(q.value())
                }
                (Some(ReadingKind::ReactiveEnergyTotal), Reading::Quantity(q)) => {
                    record.reactive_energy.total = Some(q.value())
                }
                (Some(ReadingKind::ActiveEnergyTariffs), Reading::Tariffs(tariffs)) => {
                    for tariff in tariffs {
                        let value = tariff.value.as_ref().ok().map(Quantity::value);
                        let energy = &mut record.active_energy;
                        match tariff.tariff {
                            Tariff::Total => energy.total = value,
                            Tariff::T1 => energy.t1 = value,
                            Tariff::T2 => energy.t2 = value,
                            Tariff::T3 => energy.t3 = value,
                            Tariff::T4 => energy.t4 = value,
                        }
                    }
                }
                _ => {}
            }
        }
        record
    }

    /// True when no reading at all could be decoded.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn poll<T: Transport>(session: &mut Session<T>) -> MeterRecord {
    let mut steps = Vec::new();
    for id in POLLED_COMMANDS {
        info!("Polling '{id}'");
        match session.execute(id) {
            Ok(outcome) => steps.extend(outcome.into_steps()),
            Err(e) => error!("Error polling '{id}': {e}"),
        }
    }
    for step in &steps {
        if let Err(e) = &step.reading {
            if !logged_by_session(e) {
                warn!("'{}' failed: {e}", step.command.id);
            }
        }
    }
    MeterRecord::from_steps(&steps)
}

/// The session already logs decode and transport failures at warn level or above.
fn logged_by_session(err: &Error) -> bool {
    err.is_decode_error() || matches!(err, Error::Transport(_))
}

pub fn run<T: Transport>(
    mut session: Session<T>,
    output: commandline::DaemonOutput,
    interval: std::time::Duration,
) -> Result<()> {
    info!("Starting daemon mode: output={output:?}, interval={interval:?}");

    let mut mqtt_publisher: Option<mqtt::MqttPublisher> = None;

    if let commandline::DaemonOutput::Mqtt { config_file } = &output {
        let config = mqtt::MqttConfig::load(config_file)
            .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
        info!("Successfully loaded MQTT config from {config_file}: {config:?}");
        let publisher =
            mqtt::MqttPublisher::new(config).with_context(|| "Failed to create MQTT publisher")?;
        info!("MQTT Publisher created successfully.");
        mqtt_publisher = Some(publisher);
    }

    loop {
        let record = poll(&mut session);

        match &output {
            commandline::DaemonOutput::Console => {
                println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
                match serde_json::to_string_pretty(&record) {
                    Ok(json) => println!("{json}"),
                    Err(e) => error!("Failed to serialize record: {e}"),
                }
                println!("--------------------------");
            }
            commandline::DaemonOutput::Mqtt { .. } => {
                if record.is_empty() {
                    info!("No data fetched in this cycle to publish via MQTT.");
                } else if let Some(publisher) = mqtt_publisher.as_mut() {
                    match serde_json::to_string(&record) {
                        Ok(json_payload) => {
                            info!("MQTT output: Attempting to publish data: {json_payload}");
                            let topic = publisher.topic().to_string();
                            if let Err(e) = publisher.publish(&topic, &json_payload) {
                                error!("Failed to publish data to MQTT: {e:?}");
                            } else {
                                info!("Successfully published data to MQTT.");
                            }
                        }
                        Err(e) => error!("Failed to serialize data to JSON string: {e}"),
                    }
                } else {
                    warn!("MQTT output selected, but publisher is not initialized. Skipping publish.");
                }
            }
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumeter_lib::commands::{ACTIVE_ENERGY, CURRENT, DATETIME, POWER, REACTIVE_ENERGY, VOLTAGE};
    use cumeter_lib::protocol::{
        decode_scaled_value, encode_offset, MeterDateTime, TariffReading, Unit,
    };
    use cumeter_lib::HexBytes;
    use std::io;

    fn quantity(plain: &[u8], unit: Unit, divisor_power: u32) -> Quantity {
        decode_scaled_value(&encode_offset(plain), unit, divisor_power, 2).unwrap()
    }

    #[test]
    fn record_from_steps() {
        let tariffs = vec![
            TariffReading {
                tariff: Tariff::Total,
                value: Ok(quantity(&[0x00, 0x50, 0x01, 0x00], Unit::KilowattHour, 2)),
            },
            TariffReading {
                tariff: Tariff::T1,
                value: Ok(quantity(&[0x00, 0x50, 0x00, 0x00], Unit::KilowattHour, 2)),
            },
            TariffReading {
                tariff: Tariff::T2,
                value: Err(Error::NoResponse),
            },
            TariffReading {
                tariff: Tariff::T3,
                value: Ok(quantity(&[0x00, 0x00, 0x01, 0x00], Unit::KilowattHour, 2)),
            },
            TariffReading {
                tariff: Tariff::T4,
                value: Ok(quantity(&[0x00, 0x00, 0x00, 0x00], Unit::KilowattHour, 2)),
            },
        ];
        let steps = vec![
            Step {
                command: &VOLTAGE,
                reading: Ok(Reading::Quantity(quantity(&[0x30, 0x02], Unit::Volt, 0))),
            },
            Step {
                command: &CURRENT,
                reading: Err(Error::NoResponse),
            },
            Step {
                command: &POWER,
                reading: Ok(Reading::Quantity(quantity(&[0x00, 0x50, 0x00], Unit::Kilowatt, 4))),
            },
            Step {
                command: &ACTIVE_ENERGY,
                reading: Ok(Reading::Tariffs(tariffs)),
            },
            Step {
                command: &REACTIVE_ENERGY,
                reading: Ok(Reading::Quantity(quantity(
                    &[0x25, 0x00, 0x00, 0x00],
                    Unit::KilovarHour,
                    2,
                ))),
            },
        ];

        let record = MeterRecord::from_steps(&steps);
        assert_eq!(record.voltage, Some(230.0));
        assert_eq!(record.current, None);
        assert_eq!(record.power, Some(0.5));
        assert_eq!(record.active_energy.total, Some(150.0));
        assert_eq!(record.active_energy.t1, Some(50.0));
        assert_eq!(record.active_energy.t2, None);
        assert_eq!(record.active_energy.t3, Some(100.0));
        assert_eq!(record.active_energy.t4, Some(0.0));
        assert_eq!(record.reactive_energy.total, Some(0.25));
        assert!(!record.is_empty());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["voltage"], serde_json::json!(230.0));
        assert!(json["current"].is_null());
        assert_eq!(json["active_energy"]["t1"], serde_json::json!(50.0));
        assert!(json["active_energy"]["t2"].is_null());
        assert_eq!(json["reactive_energy"]["total"], serde_json::json!(0.25));
    }

    #[test]
    fn only_silent_failures_are_logged_by_the_poll() {
        assert!(!logged_by_session(&Error::NoResponse));
        assert!(logged_by_session(&Error::MalformedBcd {
            byte: 0x3a,
            payload: HexBytes(vec![0x6d]),
        }));
        assert!(logged_by_session(&Error::Transport(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "unplugged",
        ))));
    }

    #[test]
    fn record_ignores_other_readings() {
        let steps = vec![Step {
            command: &DATETIME,
            reading: Ok(Reading::DateTime(MeterDateTime {
                year: 2024,
                month: 8,
                day: 15,
                hour: 13,
                minute: 5,
                second: 9,
            })),
        }];
        let record = MeterRecord::from_steps(&steps);
        assert!(record.is_empty());
    }
}
