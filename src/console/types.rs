use std::path::PathBuf;
use std::str::FromStr;
use clap::{Parser, Subcommand};

use crate::device::codec::Command;
use crate::error::SessionError;

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Finds the SYNC peripheral over Bluetooth LE and drives its motor.", long_about = None)]
pub struct Args {
    /// Use this config file instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub mode: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Scan once and list the matching peripherals
    Scan,

    /// Connect to the first matching peripheral, send the commands in order, then disconnect
    Send {
        /// forward, reverse, stop, start-breathing or stop-breathing
        #[arg(required = true, value_parser = parse_command)]
        commands: Vec<Command>,
    },

    /// Line based console (default)
    Interactive,
}

fn parse_command(value: &str) -> Result<Command, SessionError> {
    value.parse()
}

/// One line typed into the interactive console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Scan,
    StopScan,
    List,
    // 1-based index into the last listing
    Connect(usize),
    Send(Command),
    ToggleBreathing,
    Disconnect,
    Status,
    Help,
    Quit,
}

impl FromStr for ConsoleInput {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let first = words.next().unwrap_or("");

        let input = match first {
            "scan" => ConsoleInput::Scan,
            "stop-scan" => ConsoleInput::StopScan,
            "list" => ConsoleInput::List,
            "connect" => {
                let index = words.next()
                    .and_then(|word| word.parse::<usize>().ok())
                    .filter(|index| *index > 0)
                    .ok_or_else(|| SessionError::UnknownCommand(s.trim().to_string()))?;
                ConsoleInput::Connect(index)
            },
            "breath" => ConsoleInput::ToggleBreathing,
            "disconnect" => ConsoleInput::Disconnect,
            "status" => ConsoleInput::Status,
            "help" | "?" => ConsoleInput::Help,
            "quit" | "exit" => ConsoleInput::Quit,
            other => ConsoleInput::Send(other.parse()?),
        };

        if words.next().is_some() {
            return Err(SessionError::UnknownCommand(s.trim().to_string()));
        }
        Ok(input)
    }
}

pub const HELP: &str = "\
scan            start a scan window
stop-scan       stop scanning
list            list discovered peripherals
connect <n>     connect to peripheral <n> from the list
forward         run the motor forward
reverse         run the motor in reverse
stop            stop the motor
breath          toggle breathing mode
disconnect      disconnect from the peripheral
status          show the session state
quit            disconnect and exit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_console_input() {
        assert_eq!("scan".parse::<ConsoleInput>(), Ok(ConsoleInput::Scan));
        assert_eq!("  connect 2 ".parse::<ConsoleInput>(), Ok(ConsoleInput::Connect(2)));
        assert_eq!("forward".parse::<ConsoleInput>(), Ok(ConsoleInput::Send(Command::Forward)));
        assert_eq!("breath".parse::<ConsoleInput>(), Ok(ConsoleInput::ToggleBreathing));
        assert_eq!("exit".parse::<ConsoleInput>(), Ok(ConsoleInput::Quit));
    }

    #[test]
    fn test_reject_unknown_input() {
        assert_eq!(
            "jump".parse::<ConsoleInput>(),
            Err(SessionError::UnknownCommand("jump".to_string()))
        );
        assert!("connect".parse::<ConsoleInput>().is_err());
        assert!("connect 0".parse::<ConsoleInput>().is_err());
        assert!("stop now".parse::<ConsoleInput>().is_err());
    }

    #[test]
    fn test_send_mode_arguments() {
        let args = Args::try_parse_from(["sync-remote", "send", "forward", "stop"]).unwrap();
        assert_eq!(args.mode, Some(Mode::Send { commands: vec![Command::Forward, Command::Stop] }));

        assert!(Args::try_parse_from(["sync-remote", "send", "sideways"]).is_err());
        assert!(Args::try_parse_from(["sync-remote", "send"]).is_err());
    }
}
