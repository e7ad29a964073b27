use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// List the command identifiers accepted by `query` and `interactive`
    List,
    /// Send one command (or a composite poll) and print the decoded reading
    Query {
        /// Command identifier or menu number, see `list`
        command: String,
    },
    /// Interactive menu: enter command identifiers, 'q' to quit
    Interactive,
    /// Run in daemon mode, periodically polling all readings
    Daemon {
        /// Output destination for the readings
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval between polls (e.g., "10s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
        interval: Duration,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Print every poll to the standard output (console).
    Console,
    /// Publish every poll as a JSON record to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
    },
}

const fn about_text() -> &'static str {
    "energy meter command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    #[command(subcommand)]
    pub command: CliCommands,

    /// How long to wait for reply bytes (e.g., "500ms", "3s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "3s")]
    pub timeout: Duration,

    /// Pause between sending a request and reading the reply, lets the meter start answering
    #[arg(value_parser = humantime::parse_duration, long, default_value = "500ms")]
    pub settle_delay: Duration,
}
