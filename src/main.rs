use anyhow::{bail, Context, Result};
use clap::Parser;
use cumeter_lib::commands;
use cumeter_lib::protocol::Reading;
use cumeter_lib::serialport::SerialTransport;
use cumeter_lib::session::{Outcome, Session, Step};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::io::{BufRead, Write};
use std::{ops::Deref, panic};

mod commandline;
mod daemon;
mod mqtt;

use commandline::{CliArgs, CliCommands};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn print_commands() {
    for entry in commands::entries() {
        match entry.alias() {
            Some(alias) => println!("  {:<16} ({alias}) {}", entry.id(), entry.description()),
            None => println!("  {:<16}     {}", entry.id(), entry.description()),
        }
    }
}

fn print_step(step: &Step) {
    match &step.reading {
        Ok(reading @ Reading::Tariffs(_)) => println!("{}:\n{reading}", step.command.description),
        Ok(reading) => println!("{}: {reading}", step.command.description),
        Err(err) => println!("{}: error: {err}", step.command.description),
    }
}

fn print_outcome(outcome: &Outcome) {
    for step in outcome.steps() {
        print_step(step);
    }
}

fn open_session(args: &CliArgs) -> Result<Session<SerialTransport>> {
    let transport = SerialTransport::open(&args.device, args.timeout)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;
    let mut session = Session::new(transport);
    session.set_settle_delay(args.settle_delay);
    Ok(session)
}

fn interactive(session: &mut Session<SerialTransport>) -> Result<()> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        println!("\n--- Commands ---");
        print_commands();
        println!("  q: quit");
        print!("Enter command: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let choice = line.with_context(|| "Cannot read from stdin")?;
        let choice = choice.trim();
        if choice.eq_ignore_ascii_case("q") {
            break;
        }
        match session.execute(choice) {
            Ok(outcome) => print_outcome(&outcome),
            Err(err) => println!("{err}"),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    match &args.command {
        CliCommands::List => print_commands(),
        CliCommands::Query { command } => {
            if commands::lookup(command).is_none() {
                bail!("Unknown command '{command}', see 'list' for available commands");
            }
            let mut session = open_session(&args)?;
            let outcome = session.execute(command)?;
            print_outcome(&outcome);
            if outcome.all_failed() {
                bail!("Command '{command}' failed");
            }
        }
        CliCommands::Interactive => {
            let mut session = open_session(&args)?;
            interactive(&mut session)?;
        }
        CliCommands::Daemon { output, interval } => {
            let session = open_session(&args)?;
            daemon::run(session, output.clone(), *interval)?;
        }
    }

    Ok(())
}
