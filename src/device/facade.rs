use std::sync::Arc;
use futures::channel::mpsc::{channel, unbounded, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::{stream, FutureExt, SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::device::adapter::{PermissionGate, RadioAdapter};
use crate::device::codec::Command;
use crate::device::connection::ConnectionSession;
use crate::device::scan::ScanController;
use crate::device::types::{
    AdapterEvent, AdapterEventStream, ConnectionState, PeripheralId, PeripheralRef, ScanState,
    ServiceInfo, SessionEvent, SessionStatus, WriteTarget,
};
use crate::error::{AdapterError, SessionError};

const REQUEST_QUEUE: usize = 8;
const CANCELLED_BY_DISCONNECT: &str = "cancelled by disconnect";
const RADIO_LOST: &str = "adapter event stream ended";

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Request {
    Scan(Reply<ScanState>),
    StopScan(oneshot::Sender<ScanState>),
    Devices(oneshot::Sender<Vec<PeripheralRef>>),
    Connect(PeripheralId, Reply<PeripheralRef>),
    Send(Command, Reply<()>),
    ToggleBreathing(Reply<bool>),
    Disconnect(oneshot::Sender<()>),
    Status(oneshot::Sender<SessionStatus>),
}

enum Step {
    Link(Result<(), AdapterError>),
    Discovery(Result<Vec<ServiceInfo>, AdapterError>),
    Write(Result<(), AdapterError>),
}

struct StepResult {
    op: u64,
    step: Step,
}

// the caller waiting for the in-flight operation
enum Pending {
    Connect(Reply<PeripheralRef>),
    Send(Reply<()>),
    ToggleBreathing { reply: Reply<bool>, enable: bool },
}

impl Pending {
    fn fail(self, err: SessionError) {
        // the caller may have stopped waiting
        match self {
            Pending::Connect(reply) => {
                let _ = reply.send(Err(err));
            },
            Pending::Send(reply) => {
                let _ = reply.send(Err(err));
            },
            Pending::ToggleBreathing { reply, .. } => {
                let _ = reply.send(Err(err));
            },
        }
    }

    // an aborted connect is a failed connect, an aborted write a failed write
    fn cancel(self, reason: &str) {
        let err = match &self {
            Pending::Connect(_) => SessionError::ConnectionFailed(reason.to_string()),
            _ => SessionError::WriteFailed(reason.to_string()),
        };
        self.fail(err);
    }
}

struct InFlight {
    op: u64,
    task: JoinHandle<()>,
    pending: Pending,
}

/// Breathing is tracked locally; the device is never asked for its mode.
#[derive(Debug, Default, Clone, Copy)]
struct BreathingMode {
    enabled: bool,
}

impl BreathingMode {
    fn next_command(&self) -> Command {
        if self.enabled { Command::StopBreathing } else { Command::StartBreathing }
    }
}

struct SessionDriver<A: RadioAdapter, P: PermissionGate> {
    scan: ScanController<A, P>,
    connection: ConnectionSession<A>,
    breathing: BreathingMode,
    in_flight: Option<InFlight>,
    // set once the adapter event stream has ended; nothing can be discovered or observed after that
    radio_lost: bool,
    next_op: u64,
    step_sender: Sender<StepResult>,
    events: UnboundedSender<SessionEvent>,
}

impl<A: RadioAdapter, P: PermissionGate> SessionDriver<A, P> {
    fn emit(&self, event: SessionEvent) {
        // nobody listening is fine
        let _ = self.events.unbounded_send(event);
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            scan: self.scan.state(),
            connection: self.connection.state(),
            peripheral: self.connection.peripheral().cloned(),
            breathing: self.breathing.enabled,
            busy: self.in_flight.is_some(),
        }
    }

    async fn run(
        mut self,
        cancel: CancellationToken,
        mut requests: Receiver<Request>,
        mut steps: Receiver<StepResult>,
        mut radio_events: AdapterEventStream,
    ) {
        'mainloop: loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = radio_events.next() => match event {
                    Some(event) => self.handle_radio_event(event),
                    None => {
                        radio_events = stream::pending().boxed();
                        self.handle_radio_lost();
                    },
                },
                Some(step) = steps.next() => {
                    self.handle_step(step);
                },
                request = requests.next() => match request {
                    Some(request) => self.handle_request(request).await,
                    // every facade handle has been dropped
                    None => break 'mainloop,
                },
                _ = self.scan.expired() => {
                    info!("Scan window elapsed");
                    self.stop_scan().await;
                },
            }
        }

        self.teardown().await;
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Scan(reply) => {
                let result = self.start_scan().await;
                let _ = reply.send(result);
            },
            Request::StopScan(reply) => {
                let state = self.stop_scan().await;
                let _ = reply.send(state);
            },
            Request::Devices(reply) => {
                let _ = reply.send(self.scan.devices());
            },
            Request::Connect(id, reply) => self.connect(id, reply).await,
            Request::Send(command, reply) => self.send(command, Pending::Send(reply)),
            Request::ToggleBreathing(reply) => {
                let enable = !self.breathing.enabled;
                let command = self.breathing.next_command();
                self.send(command, Pending::ToggleBreathing { reply, enable });
            },
            Request::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            },
            Request::Status(reply) => {
                let _ = reply.send(self.status());
            },
        }
    }

    async fn start_scan(&mut self) -> Result<ScanState, SessionError> {
        if self.radio_lost {
            return Err(SessionError::RadioError(RADIO_LOST.to_string()));
        }
        if self.scan.state() == ScanState::Scanning {
            return Ok(ScanState::Scanning);
        }
        if self.in_flight.is_some() {
            return Err(SessionError::InvalidState);
        }

        let state = self.scan.start().await?;
        self.emit(SessionEvent::ScanStateChange(state));
        Ok(state)
    }

    async fn stop_scan(&mut self) -> ScanState {
        if self.scan.state() == ScanState::Idle {
            return ScanState::Idle;
        }

        let state = self.scan.stop().await;
        self.emit(SessionEvent::ScanStateChange(state));
        state
    }

    async fn connect(&mut self, id: PeripheralId, reply: Reply<PeripheralRef>) {
        if self.in_flight.is_some() {
            let _ = reply.send(Err(SessionError::InvalidState));
            return;
        }
        if self.connection.state() != ConnectionState::Disconnected {
            let _ = reply.send(Err(SessionError::InvalidState));
            return;
        }
        if self.radio_lost {
            let _ = reply.send(Err(SessionError::RadioError(RADIO_LOST.to_string())));
            return;
        }

        let peripheral = match self.scan.device(&id) {
            Some(peripheral) => peripheral.clone(),
            None => {
                let err = SessionError::ConnectionFailed(format!("peripheral {} was not discovered", id));
                let _ = reply.send(Err(err));
                return;
            },
        };

        // the radio connects more reliably without a scan running
        self.stop_scan().await;

        match self.connection.begin_connect(peripheral) {
            Ok(link) => {
                self.emit(SessionEvent::ConnectionStateChange(self.connection.state()));
                let op = self.next_op();
                let task = self.spawn_step(op, link.map(Step::Link).boxed());
                self.in_flight = Some(InFlight { op, task, pending: Pending::Connect(reply) });
            },
            Err(err) => {
                let _ = reply.send(Err(err));
            },
        }
    }

    fn send(&mut self, command: Command, pending: Pending) {
        // a session that is not ready reports NotConnected even while a connect is in flight
        if self.connection.state() != ConnectionState::Ready {
            pending.fail(SessionError::NotConnected);
            return;
        }
        if self.in_flight.is_some() {
            pending.fail(SessionError::InvalidState);
            return;
        }

        match self.connection.begin_send(&command) {
            Ok(write) => {
                debug!("Sending {}", command);
                let op = self.next_op();
                let task = self.spawn_step(op, write.map(Step::Write).boxed());
                self.in_flight = Some(InFlight { op, task, pending });
            },
            Err(err) => pending.fail(err),
        }
    }

    async fn disconnect(&mut self) {
        self.cancel_in_flight(CANCELLED_BY_DISCONNECT);

        if let Some(id) = self.connection.begin_disconnect() {
            self.emit(SessionEvent::ConnectionStateChange(ConnectionState::Disconnecting));
            self.connection.finish_disconnect(&id).await;
            self.emit(SessionEvent::ConnectionStateChange(ConnectionState::Disconnected));
        }
    }

    fn handle_step(&mut self, result: StepResult) {
        let in_flight = match self.in_flight.take() {
            Some(in_flight) if in_flight.op == result.op => in_flight,
            other => {
                debug!("Ignoring result of abandoned operation {}", result.op);
                self.in_flight = other;
                return;
            },
        };
        let op = in_flight.op;

        match (result.step, in_flight.pending) {
            (Step::Link(result), Pending::Connect(reply)) => match self.connection.on_link_result(result) {
                Ok(discovery) => {
                    self.emit(SessionEvent::ConnectionStateChange(self.connection.state()));
                    let task = self.spawn_step(op, discovery.map(Step::Discovery).boxed());
                    self.in_flight = Some(InFlight { op, task, pending: Pending::Connect(reply) });
                },
                Err(err) => {
                    self.emit(SessionEvent::ConnectionStateChange(self.connection.state()));
                    let _ = reply.send(Err(err));
                },
            },
            (Step::Discovery(result), Pending::Connect(reply)) => {
                let result = self.connection.on_discovery_result(result);
                self.emit(SessionEvent::ConnectionStateChange(self.connection.state()));
                let _ = reply.send(result);
            },
            (Step::Write(result), Pending::Send(reply)) => {
                let _ = reply.send(self.connection.on_write_result(result));
            },
            (Step::Write(result), Pending::ToggleBreathing { reply, enable }) => {
                let result = self.connection.on_write_result(result).map(|_| {
                    self.breathing.enabled = enable;
                    enable
                });
                if result.is_ok() {
                    self.emit(SessionEvent::BreathingChange(enable));
                }
                let _ = reply.send(result);
            },
            (_, pending) => {
                warn!("Operation {} produced an unexpected step", op);
                pending.fail(SessionError::InvalidState);
            },
        }
    }

    fn handle_radio_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::Advertisement(peripheral) => {
                if self.scan.on_advertisement(peripheral.clone()) {
                    self.emit(SessionEvent::Discovered(peripheral));
                }
            },
            AdapterEvent::RadioFailure(reason) => {
                let err = match self.scan.on_radio_failure(&reason) {
                    Some(err) => {
                        self.emit(SessionEvent::ScanStateChange(ScanState::Idle));
                        err
                    },
                    None => {
                        warn!("Radio failure: {}", reason);
                        SessionError::RadioError(reason)
                    },
                };
                self.emit(SessionEvent::Failure(err));
            },
            AdapterEvent::Disconnected(id) => {
                if self.connection.is_linked_to(&id) && self.connection.state() != ConnectionState::Disconnecting {
                    self.cancel_in_flight("link lost");
                    let err = self.connection.on_link_lost();
                    self.emit(SessionEvent::ConnectionStateChange(ConnectionState::Disconnected));
                    self.emit(SessionEvent::Failure(err));
                }
            },
        }
    }

    /// The adapter stopped delivering events. Advertisements and link loss can no longer be
    /// observed, so the link is dropped and later scans and connects fail.
    fn handle_radio_lost(&mut self) {
        warn!("Adapter event stream ended");
        self.radio_lost = true;

        if self.connection.state() != ConnectionState::Disconnected {
            self.cancel_in_flight(RADIO_LOST);
            self.connection.on_link_lost();
            self.emit(SessionEvent::ConnectionStateChange(ConnectionState::Disconnected));
        }
        self.handle_radio_event(AdapterEvent::RadioFailure(RADIO_LOST.to_string()));
    }

    fn cancel_in_flight(&mut self, reason: &str) {
        if let Some(in_flight) = self.in_flight.take() {
            info!("Cancelling operation {}: {}", in_flight.op, reason);
            in_flight.task.abort();
            in_flight.pending.cancel(reason);
        }
    }

    fn next_op(&mut self) -> u64 {
        self.next_op += 1;
        self.next_op
    }

    fn spawn_step(&self, op: u64, step: BoxFuture<'static, Step>) -> JoinHandle<()> {
        let mut sender = self.step_sender.clone();
        spawn(async move {
            let step = step.await;
            // the driver is gone when this fails; nothing left to report to
            let _ = sender.send(StepResult { op, step }).await;
        })
    }

    async fn teardown(&mut self) {
        info!("Shutting down session");
        self.cancel_in_flight("session shut down");
        self.stop_scan().await;
        self.disconnect().await;
    }
}

/// The handle a front end uses to drive the BLE session.
///
/// All handles talk to one driver task which owns the scan controller, the connection session and
/// the breathing flag. Dropping every handle (or cancelling the token given to
/// [`SessionFacade::start`]) tears the session down and releases the radio.
#[derive(Clone)]
pub struct SessionFacade {
    requests: Sender<Request>,
}

impl SessionFacade {
    pub async fn start<A: RadioAdapter, P: PermissionGate>(
        adapter: Arc<A>,
        permission: Arc<P>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Result<(SessionFacade, UnboundedReceiver<SessionEvent>, JoinHandle<()>), SessionError> {
        let radio_events = adapter.events().await.map_err(|err| {
            warn!("Failed to subscribe to adapter events: {:?}", err);
            SessionError::RadioError(err.to_string())
        })?;

        let (request_sender, request_receiver) = channel::<Request>(REQUEST_QUEUE);
        let (step_sender, step_receiver) = channel::<StepResult>(REQUEST_QUEUE);
        let (event_sender, event_receiver) = unbounded::<SessionEvent>();

        let target = WriteTarget {
            service: config.service_uuid,
            characteristic: config.write_characteristic_uuid,
        };

        let driver = SessionDriver {
            scan: ScanController::new(
                adapter.clone(),
                permission,
                &config.target_name,
                Duration::from_millis(config.scan_timeout_ms),
            ),
            connection: ConnectionSession::new(
                adapter,
                target,
                Duration::from_millis(config.write_deadline_ms),
                Duration::from_millis(config.disconnect_deadline_ms),
            ),
            breathing: BreathingMode::default(),
            in_flight: None,
            radio_lost: false,
            next_op: 0,
            step_sender,
            events: event_sender,
        };

        let handle = spawn(driver.run(cancel, request_receiver, step_receiver, radio_events));
        Ok((SessionFacade { requests: request_sender }, event_receiver, handle))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        let mut requests = self.requests.clone();
        requests.send(make(reply)).await.map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Starts a scan window. Returns immediately; discoveries arrive as [`SessionEvent::Discovered`].
    pub async fn scan(&self) -> Result<ScanState, SessionError> {
        self.request(Request::Scan).await?
    }

    pub async fn stop_scan(&self) -> Result<ScanState, SessionError> {
        self.request(Request::StopScan).await
    }

    pub async fn devices(&self) -> Result<Vec<PeripheralRef>, SessionError> {
        self.request(Request::Devices).await
    }

    /// Resolves once the peripheral is ready for commands.
    pub async fn connect(&self, id: &PeripheralId) -> Result<PeripheralRef, SessionError> {
        let id = id.clone();
        self.request(move |reply| Request::Connect(id, reply)).await?
    }

    /// Resolves once the peripheral acknowledged the write.
    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.request(move |reply| Request::Send(command, reply)).await?
    }

    /// Starts or stops breathing mode. Returns the new mode.
    pub async fn toggle_breathing(&self) -> Result<bool, SessionError> {
        self.request(Request::ToggleBreathing).await?
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(Request::Disconnect).await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.request(Request::Status).await
    }
}
