use std::fmt;
use std::str::FromStr;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;

use crate::device::constants::{
    COMMAND_FORWARD, COMMAND_REVERSE, COMMAND_START_BREATHING, COMMAND_STOP, COMMAND_STOP_BREATHING,
};
use crate::error::SessionError;

/// A logical motor/pump action. Commands are plain values; sending one never changes session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Forward,
    Reverse,
    Stop,
    StartBreathing,
    StopBreathing,
    SetMotorSpeed(u8),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Forward => "forward",
            Command::Reverse => "reverse",
            Command::Stop => "stop",
            Command::StartBreathing => "start-breathing",
            Command::StopBreathing => "stop-breathing",
            Command::SetMotorSpeed(_) => "set-motor-speed",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetMotorSpeed(speed) => write!(f, "{} {}", self.name(), speed),
            _ => write!(f, "{}", self.name()),
        }
    }
}

impl FromStr for Command {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Command::Forward),
            "reverse" => Ok(Command::Reverse),
            "stop" => Ok(Command::Stop),
            "start-breathing" => Ok(Command::StartBreathing),
            "stop-breathing" => Ok(Command::StopBreathing),
            other => Err(SessionError::UnknownCommand(other.to_string())),
        }
    }
}

/// Returns the fixed opcode bytes for `command`.
///
/// The device firmware has no opcode for a speed setting, so `SetMotorSpeed` is rejected as an
/// unknown command. Callers should treat that as a programming error.
pub fn encode(command: &Command) -> Result<&'static [u8], SessionError> {
    match command {
        Command::Forward => Ok(&COMMAND_FORWARD),
        Command::Reverse => Ok(&COMMAND_REVERSE),
        Command::Stop => Ok(&COMMAND_STOP),
        Command::StartBreathing => Ok(&COMMAND_START_BREATHING),
        Command::StopBreathing => Ok(&COMMAND_STOP_BREATHING),
        Command::SetMotorSpeed(_) => Err(SessionError::UnknownCommand(command.to_string())),
    }
}

/// The write API of the link layer takes characteristic values as base64 text.
pub fn frame_for_transport(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}
