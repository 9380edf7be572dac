use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use log::{info, warn};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use crate::device::codec::Command;
use crate::device::facade::SessionFacade;
use crate::device::types::{ConnectionState, PeripheralRef, ScanState, SessionEvent, SessionStatus};
use crate::error::{AppRunError, SessionError};
use crate::console::types::{ConsoleInput, HELP};

fn describe_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::ScanStateChange(ScanState::Scanning) => "Scanning…".to_string(),
        SessionEvent::ScanStateChange(ScanState::Idle) => "Scan finished".to_string(),
        SessionEvent::Discovered(peripheral) => format!("Found {} ({})", peripheral.name, peripheral.id),
        SessionEvent::ConnectionStateChange(state) => describe_connection(*state).to_string(),
        SessionEvent::BreathingChange(true) => "Breathing mode on".to_string(),
        SessionEvent::BreathingChange(false) => "Breathing mode off".to_string(),
        SessionEvent::Failure(err) => format!("Error: {}", err),
    }
}

fn describe_connection(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "Disconnected",
        ConnectionState::Connecting => "Connecting…",
        ConnectionState::Discovering => "Discovering services…",
        ConnectionState::Ready => "Connected",
        ConnectionState::Disconnecting => "Disconnecting…",
    }
}

fn describe_status(status: &SessionStatus) -> String {
    let peripheral = status.peripheral.as_ref()
        .map(|p| format!(" to {} ({})", p.name, p.id))
        .unwrap_or_default();

    format!(
        "scan: {:?}, connection: {}{}, breathing: {}{}",
        status.scan,
        describe_connection(status.connection),
        peripheral,
        if status.breathing { "on" } else { "off" },
        if status.busy { " (busy)" } else { "" },
    )
}

fn print_devices(devices: &[PeripheralRef]) {
    if devices.is_empty() {
        println!("No devices found");
    }
    for (index, device) in devices.iter().enumerate() {
        println!("{:>3}. {} ({})", index + 1, device.name, device.id);
    }
}

/// Runs one scan window and prints what was found.
pub async fn run_scan(facade: &SessionFacade, events: &mut UnboundedReceiver<SessionEvent>) -> Result<(), AppRunError> {
    facade.scan().await?;

    while let Some(event) = events.next().await {
        println!("{}", describe_event(&event));
        match event {
            SessionEvent::ScanStateChange(ScanState::Idle) => break,
            SessionEvent::Failure(err) => return Err(err.into()),
            _ => {},
        }
    }

    print_devices(&facade.devices().await?);
    Ok(())
}

/// Connects to the first matching peripheral, sends `commands` in order and disconnects again.
pub async fn run_send(
    facade: &SessionFacade,
    events: &mut UnboundedReceiver<SessionEvent>,
    commands: &[Command],
) -> Result<(), AppRunError> {
    facade.scan().await?;

    let mut target: Option<PeripheralRef> = None;
    while let Some(event) = events.next().await {
        match event {
            SessionEvent::Discovered(peripheral) => {
                target = Some(peripheral);
                break;
            },
            SessionEvent::ScanStateChange(ScanState::Idle) => break,
            SessionEvent::Failure(err) => return Err(err.into()),
            _ => {},
        }
    }

    let target = match target {
        Some(target) => target,
        None => {
            warn!("No matching peripheral found");
            return Err(SessionError::ConnectionFailed("no matching peripheral found".to_string()).into());
        },
    };

    facade.connect(&target.id).await?;
    info!("Connected to {} ({})", target.name, target.id);

    let mut result = Ok(());
    for command in commands {
        if let Err(err) = facade.send(*command).await {
            result = Err(err.into());
            break;
        }
        println!("Sent {}", command);
    }

    facade.disconnect().await?;
    result
}

pub async fn run_interactive(facade: &SessionFacade, events: &mut UnboundedReceiver<SessionEvent>) -> Result<(), AppRunError> {
    let mut lines = BufReader::new(stdin()).lines();
    let mut listing: Vec<PeripheralRef> = Vec::new();

    println!("{}", HELP);

    'mainloop: loop {
        tokio::select! {
            Some(event) = events.next() => {
                println!("{}", describe_event(&event));
            },
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    // stdin closed
                    None => break 'mainloop,
                };
                if line.trim().is_empty() {
                    continue;
                }

                let input = match line.parse::<ConsoleInput>() {
                    Ok(input) => input,
                    Err(err) => {
                        println!("{} (type `help` for a list of commands)", err);
                        continue;
                    },
                };

                let result = match input {
                    ConsoleInput::Scan => facade.scan().await.map(|_| ()),
                    ConsoleInput::StopScan => facade.stop_scan().await.map(|_| ()),
                    ConsoleInput::List => facade.devices().await.map(|devices| {
                        print_devices(&devices);
                        listing = devices;
                    }),
                    ConsoleInput::Connect(index) => match listing.get(index - 1) {
                        Some(peripheral) => facade.connect(&peripheral.id).await.map(|_| ()),
                        None => {
                            println!("No device {} in the list, use `list` first", index);
                            Ok(())
                        },
                    },
                    ConsoleInput::Send(command) => facade.send(command).await,
                    ConsoleInput::ToggleBreathing => facade.toggle_breathing().await.map(|_| ()),
                    ConsoleInput::Disconnect => facade.disconnect().await,
                    ConsoleInput::Status => facade.status().await.map(|status| {
                        println!("{}", describe_status(&status));
                    }),
                    ConsoleInput::Help => {
                        println!("{}", HELP);
                        Ok(())
                    },
                    ConsoleInput::Quit => break 'mainloop,
                };

                if let Err(err) = result {
                    println!("Error: {}", err);
                }
            },
        }
    }

    facade.disconnect().await?;
    Ok(())
}
