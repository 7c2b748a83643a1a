//! Per-language execution coordination.
//!
//! A [`Coordinator`] is a cheap handle to an event loop that exclusively owns
//! the bookkeeping for one guest language: the current host and its
//! generation, the correlation-id counter, the pending-request table and the
//! timeout deadline. Callers and the host only ever talk to the loop through
//! channels, so none of that state needs locking.
//!
//! Timeouts and explicit stops cannot interrupt guest code. Both tear the host
//! down, bump the generation and spawn a replacement; anything the old host
//! sends afterwards carries the old generation and is dropped on arrival.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::core_types::{ExecutionResult, GuestLanguage, SourceFile};
use crate::errors::ExecutionError;
use crate::host::{AdapterFactory, HostHandle};
use crate::protocol::{Generation, HostCommand, HostEnvelope, HostMessage, RequestId};
use crate::status::{StatusBroadcaster, StatusEvent, StatusSubscription};

pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostState {
    NotStarted,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub timeout: Duration,
    /// Longest a submission waits for a loading host before failing with a load error.
    pub load_timeout: Duration,
    pub status_capacity: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_EXECUTION_TIMEOUT,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            status_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorSnapshot {
    pub language: GuestLanguage,
    pub generation: Generation,
    pub host_state: HostState,
    pub busy: bool,
    pub pending: usize,
    pub next_id: RequestId,
}

type Reply = oneshot::Sender<Result<ExecutionResult, ExecutionError>>;

enum Command {
    Init {
        done: oneshot::Sender<()>,
    },
    Submit {
        code: String,
        files: Vec<SourceFile>,
        reply: Reply,
    },
    Stop {
        done: oneshot::Sender<bool>,
    },
    RetryLoad {
        done: oneshot::Sender<()>,
    },
    Reload {
        done: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<CoordinatorSnapshot>,
    },
}

/// Handle to the coordination loop of one guest language.
///
/// Clones share the same loop. The loop, and its host, shut down once the last
/// handle is dropped. Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct Coordinator {
    language: GuestLanguage,
    commands: mpsc::UnboundedSender<Command>,
    status: StatusBroadcaster,
}

impl Coordinator {
    pub fn new(factory: Arc<dyn AdapterFactory>, settings: CoordinatorSettings) -> Self {
        let language = factory.language();
        let status = StatusBroadcaster::with_capacity(language, settings.status_capacity);
        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, host_events) = mpsc::unbounded_channel();

        let event_loop = CoordinatorLoop {
            language,
            factory,
            timeout: settings.timeout,
            load_timeout: settings.load_timeout,
            status: status.clone(),
            events,
            initialized: false,
            generation: 0,
            host_state: HostState::NotStarted,
            host: None,
            last_load_error: None,
            next_id: 1,
            pending: HashMap::new(),
            in_flight: None,
            deadline: None,
            waiting: None,
            load_deadline: None,
        };
        tokio::spawn(event_loop.run(inbox, host_events));

        Self {
            language,
            commands,
            status,
        }
    }

    pub fn language(&self) -> GuestLanguage {
        self.language
    }

    /// Subscribes to host lifecycle events. Drop the subscription to unsubscribe.
    pub fn subscribe(&self) -> StatusSubscription {
        self.status.subscribe()
    }

    /// Creates the host if none exists yet. Idempotent.
    pub async fn init(&self) -> Result<(), ExecutionError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Init { done })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Runs `code` on the host once it is ready and returns its output.
    pub async fn submit(
        &self,
        code: impl Into<String>,
        files: Vec<SourceFile>,
    ) -> Result<ExecutionResult, ExecutionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            code: code.into(),
            files,
            reply,
        })?;
        rx.await.unwrap_or(Err(ExecutionError::Cancelled))
    }

    /// Cancels the outstanding request, rebuilding the host if it was running.
    /// Returns whether anything was cancelled.
    pub async fn stop(&self) -> bool {
        let (done, rx) = oneshot::channel();
        if self.send(Command::Stop { done }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Discards the current host and boots a fresh one under a new generation.
    pub async fn retry_load(&self) -> Result<(), ExecutionError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::RetryLoad { done })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Asks the current host to re-run its initialization in place.
    pub async fn reload(&self) -> Result<(), ExecutionError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Reload { done })?;
        rx.await.map_err(|_| self.closed())
    }

    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot, ExecutionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        rx.await.map_err(|_| self.closed())
    }

    fn send(&self, command: Command) -> Result<(), ExecutionError> {
        self.commands.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> ExecutionError {
        ExecutionError::Transport(format!("{} coordinator has shut down", self.language))
    }
}

struct PendingRequest {
    generation: Generation,
    reply: Reply,
    submitted_at: Instant,
}

struct QueuedSubmission {
    code: String,
    files: Vec<SourceFile>,
    reply: Reply,
}

struct CoordinatorLoop {
    language: GuestLanguage,
    factory: Arc<dyn AdapterFactory>,
    timeout: Duration,
    load_timeout: Duration,
    status: StatusBroadcaster,
    events: mpsc::UnboundedSender<HostEnvelope>,
    initialized: bool,
    generation: Generation,
    host_state: HostState,
    host: Option<HostHandle>,
    last_load_error: Option<String>,
    next_id: RequestId,
    pending: HashMap<RequestId, PendingRequest>,
    in_flight: Option<RequestId>,
    deadline: Option<Instant>,
    /// Submission accepted while the host was still loading.
    waiting: Option<QueuedSubmission>,
    load_deadline: Option<Instant>,
}

impl CoordinatorLoop {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Command>,
        mut host_events: mpsc::UnboundedReceiver<HostEnvelope>,
    ) {
        loop {
            let deadline = self.deadline;
            let load_deadline = self.load_deadline;
            tokio::select! {
                command = inbox.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(envelope) = host_events.recv() => self.handle_host_message(envelope),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_timeout();
                }
                _ = sleep_until(load_deadline.unwrap_or_else(Instant::now)), if load_deadline.is_some() => {
                    self.handle_load_timeout();
                }
            }
        }
        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Init { done } => {
                self.initialized = true;
                if self.host.is_none() {
                    self.spawn_host();
                }
                let _ = done.send(());
            }
            Command::Submit { code, files, reply } => self.submit(code, files, reply),
            Command::Stop { done } => {
                let stopped = self.stop();
                let _ = done.send(stopped);
            }
            Command::RetryLoad { done } => {
                self.initialized = true;
                self.recreate_host("retry requested");
                let _ = done.send(());
            }
            Command::Reload { done } => {
                self.reload();
                let _ = done.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn submit(&mut self, code: String, files: Vec<SourceFile>, reply: Reply) {
        if !self.initialized {
            let _ = reply.send(Err(ExecutionError::NotInitialized));
            return;
        }
        if self.in_flight.is_some() || self.waiting.is_some() {
            let _ = reply.send(Err(ExecutionError::Busy));
            return;
        }
        if self.host.is_none() {
            let _ = reply.send(Err(self.unconstructible()));
            return;
        }
        match self.host_state {
            HostState::Ready => self.dispatch(code, files, reply),
            HostState::Failed => {
                let _ = reply.send(Err(ExecutionError::Load {
                    message: self.load_error_message(),
                }));
            }
            HostState::Loading | HostState::NotStarted => {
                log::debug!("{} host not ready yet, holding submission", self.language);
                self.waiting = Some(QueuedSubmission { code, files, reply });
                self.load_deadline = Some(Instant::now() + self.load_timeout);
            }
        }
    }

    fn dispatch(&mut self, code: String, files: Vec<SourceFile>, reply: Reply) {
        if reply.is_closed() {
            log::debug!("{} caller went away before dispatch", self.language);
            return;
        }
        let Some(host) = self.host.as_ref() else {
            let _ = reply.send(Err(self.unconstructible()));
            return;
        };

        let id = self.next_id;
        self.next_id += 1;
        if let Err(err) = host.post(HostCommand::Run { id, code, files }) {
            log::error!("{} failed to post request {}: {}", self.language, id, err);
            let _ = reply.send(Err(err));
            return;
        }

        let now = Instant::now();
        self.pending.insert(
            id,
            PendingRequest {
                generation: self.generation,
                reply,
                submitted_at: now,
            },
        );
        self.in_flight = Some(id);
        self.deadline = Some(now + self.timeout);
        log::debug!(
            "{} dispatched request {} to host gen {}",
            self.language,
            id,
            self.generation
        );
    }

    fn handle_host_message(&mut self, envelope: HostEnvelope) {
        if envelope.generation != self.generation {
            log::debug!(
                "{} ignoring {:?} from stale host gen {} (current {})",
                self.language,
                envelope.message,
                envelope.generation,
                self.generation
            );
            return;
        }
        if let Some(event) = StatusEvent::from_host_message(&envelope.message) {
            self.status.publish(self.generation, event);
        }

        match envelope.message {
            HostMessage::Loading { message } => {
                log::info!("{}: {}", self.language, message);
                self.host_state = HostState::Loading;
            }
            HostMessage::Ready => {
                self.host_state = HostState::Ready;
                self.last_load_error = None;
                if let Some(queued) = self.take_waiting() {
                    self.dispatch(queued.code, queued.files, queued.reply);
                }
            }
            HostMessage::LoadError { error } => {
                self.host_state = HostState::Failed;
                self.last_load_error = Some(error.clone());
                if let Some(queued) = self.take_waiting() {
                    let _ = queued.reply.send(Err(ExecutionError::Load { message: error }));
                }
            }
            HostMessage::PackageLoading { packages, id } => {
                if self.in_flight == Some(id) && self.deadline.take().is_some() {
                    log::debug!(
                        "{} pausing timeout for request {} while fetching {:?}",
                        self.language,
                        id,
                        packages
                    );
                }
            }
            HostMessage::PackagesLoaded { id } => {
                if self.in_flight == Some(id) && self.pending.contains_key(&id) {
                    log::debug!("{} restarting timeout for request {}", self.language, id);
                    self.deadline = Some(Instant::now() + self.timeout);
                }
            }
            HostMessage::Result { output, id } => self.complete(id, Ok(output)),
            HostMessage::Error { error, stdout, id } => self.complete(
                id,
                Err(ExecutionError::Guest {
                    message: error,
                    partial_stdout: stdout.unwrap_or_default(),
                }),
            ),
        }
    }

    fn complete(&mut self, id: RequestId, outcome: Result<String, ExecutionError>) {
        let Some(request) = self.pending.remove(&id) else {
            log::debug!(
                "{} ignoring response for unknown or settled request {}",
                self.language,
                id
            );
            return;
        };
        debug_assert_eq!(request.generation, self.generation);
        if self.in_flight == Some(id) {
            self.in_flight = None;
            self.deadline = None;
        }

        let duration_seconds = request.submitted_at.elapsed().as_secs_f64();
        let result = outcome.map(|output| ExecutionResult {
            output,
            duration_seconds,
        });
        if request.reply.send(result).is_err() {
            log::debug!("{} caller for request {} went away", self.language, id);
        }
    }

    fn handle_timeout(&mut self) {
        self.deadline = None;
        let Some(id) = self.in_flight.take() else {
            return;
        };
        if let Some(request) = self.pending.remove(&id) {
            log::warn!(
                "{} request {} timed out after {:?}",
                self.language,
                id,
                self.timeout
            );
            let _ = request.reply.send(Err(ExecutionError::Timeout {
                timeout: self.timeout,
            }));
        }
        self.recreate_host("execution timed out");
    }

    /// A boot that never reports (hung or panicked) fails the waiting
    /// submission. The host is kept, so a late `ready` still recovers it.
    fn handle_load_timeout(&mut self) {
        let Some(queued) = self.take_waiting() else {
            return;
        };
        let message = format!(
            "{} runtime did not become ready within {:?}",
            self.language.display_name(),
            self.load_timeout
        );
        log::warn!("{}", message);
        self.host_state = HostState::Failed;
        self.last_load_error = Some(message.clone());
        self.status.publish(
            self.generation,
            StatusEvent::LoadError {
                error: message.clone(),
            },
        );
        let _ = queued.reply.send(Err(ExecutionError::Load { message }));
    }

    fn take_waiting(&mut self) -> Option<QueuedSubmission> {
        self.load_deadline = None;
        self.waiting.take()
    }

    fn stop(&mut self) -> bool {
        if let Some(id) = self.in_flight.take() {
            if let Some(request) = self.pending.remove(&id) {
                log::info!("{} request {} stopped", self.language, id);
                let _ = request.reply.send(Err(ExecutionError::Cancelled));
            }
            self.recreate_host("execution stopped");
            return true;
        }
        if let Some(queued) = self.take_waiting() {
            let _ = queued.reply.send(Err(ExecutionError::Cancelled));
            return true;
        }
        false
    }

    fn reload(&mut self) {
        self.initialized = true;
        let posted = match self.host.as_ref() {
            Some(host) => host.post(HostCommand::Reload),
            None => {
                self.spawn_host();
                return;
            }
        };
        match posted {
            Ok(()) => self.host_state = HostState::Loading,
            Err(err) => {
                log::warn!("{} reload could not reach host: {}", self.language, err);
                self.recreate_host("host unreachable");
            }
        }
    }

    /// Replaces the host, invalidating everything tagged with the old generation.
    fn recreate_host(&mut self, reason: &str) {
        if let Some(host) = self.host.take() {
            host.terminate();
        }
        let previous = self.generation;
        self.generation += 1;
        log::info!(
            "Recreating {} host ({}): generation {} -> {}",
            self.language,
            reason,
            previous,
            self.generation
        );

        for (id, request) in self.pending.drain() {
            log::debug!(
                "{} cancelling request {} from gen {}",
                self.language,
                id,
                request.generation
            );
            let _ = request.reply.send(Err(ExecutionError::Cancelled));
        }
        self.in_flight = None;
        self.deadline = None;
        self.host_state = HostState::NotStarted;
        self.spawn_host();
    }

    fn spawn_host(&mut self) {
        match self.factory.create() {
            Ok(adapter) => {
                self.host = Some(HostHandle::spawn(
                    self.generation,
                    adapter,
                    self.events.clone(),
                ));
                self.host_state = HostState::Loading;
            }
            Err(error) => {
                let message = format!(
                    "Failed to start {} host: {}",
                    self.language.display_name(),
                    error
                );
                log::error!("{}", message);
                self.host_state = HostState::Failed;
                self.last_load_error = Some(message.clone());
                self.status.publish(
                    self.generation,
                    StatusEvent::LoadError {
                        error: message.clone(),
                    },
                );
                if let Some(queued) = self.take_waiting() {
                    let _ = queued.reply.send(Err(ExecutionError::Transport(message)));
                }
            }
        }
    }

    fn unconstructible(&self) -> ExecutionError {
        ExecutionError::Transport(self.load_error_message())
    }

    fn load_error_message(&self) -> String {
        self.last_load_error.clone().unwrap_or_else(|| {
            format!("{} runtime failed to load", self.language.display_name())
        })
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            language: self.language,
            generation: self.generation,
            host_state: self.host_state,
            busy: self.in_flight.is_some(),
            pending: self.pending.len(),
            next_id: self.next_id,
        }
    }

    fn shutdown(&mut self) {
        log::debug!("{} coordinator shutting down", self.language);
        if let Some(host) = self.host.take() {
            host.terminate();
        }
        for (_, request) in self.pending.drain() {
            let _ = request.reply.send(Err(ExecutionError::Cancelled));
        }
        if let Some(queued) = self.take_waiting() {
            let _ = queued.reply.send(Err(ExecutionError::Cancelled));
        }
    }
}
