//! Isolated execution hosts.
//!
//! A host is one spawned task driving one [`RuntimeAdapter`]. It receives
//! [`HostCommand`]s, answers every `run` with exactly one terminal message for
//! the same id, and can be torn down at any moment by aborting the task. Guest
//! processes are spawned with `kill_on_drop`, so aborting the task also kills
//! whatever the adapter had running.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core_types::{GuestLanguage, SourceFile};
use crate::errors::ExecutionError;
use crate::protocol::{Generation, HostCommand, HostEnvelope, HostMessage, RequestId};

/// One `run` request as seen by an adapter.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub id: RequestId,
    pub code: String,
    pub files: Vec<SourceFile>,
}

/// A guest-raised failure together with the output captured before it.
#[derive(Debug, Clone, PartialEq)]
pub struct GuestFailure {
    pub message: String,
    pub partial_output: String,
}

impl GuestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            partial_output: String::new(),
        }
    }

    pub fn with_output(message: impl Into<String>, partial_output: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            partial_output: partial_output.into(),
        }
    }
}

/// Outbound channel of a host, stamping every message with its generation.
#[derive(Debug, Clone)]
pub struct HostSink {
    generation: Generation,
    sender: mpsc::UnboundedSender<HostEnvelope>,
}

impl HostSink {
    pub fn new(generation: Generation, sender: mpsc::UnboundedSender<HostEnvelope>) -> Self {
        Self { generation, sender }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn send(&self, message: HostMessage) {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "host gen {} -> {}",
                self.generation,
                serde_json::to_string(&message).unwrap_or_default()
            );
        }
        if self
            .sender
            .send(HostEnvelope {
                generation: self.generation,
                message,
            })
            .is_err()
        {
            log::debug!("Coordinator gone, dropping message from host gen {}", self.generation);
        }
    }

    pub fn loading(&self, message: impl Into<String>) {
        self.send(HostMessage::Loading {
            message: message.into(),
        });
    }
}

/// Language-specific runtime living inside a host.
#[async_trait]
pub trait RuntimeAdapter: Send {
    fn language(&self) -> GuestLanguage;

    /// Brings the runtime up. May emit `loading` messages through `sink`; the host
    /// reports `ready` or `load-error` from the returned value.
    async fn boot(&mut self, sink: &HostSink) -> Result<(), String>;

    /// Executes one request. Sub-phase messages for `request.id` may be emitted
    /// through `sink`; the terminal message is produced by the host.
    async fn run(&mut self, request: RunRequest, sink: &HostSink) -> Result<String, GuestFailure>;
}

/// Builds a fresh adapter for every host generation.
pub trait AdapterFactory: Send + Sync {
    fn language(&self) -> GuestLanguage;

    fn create(&self) -> Result<Box<dyn RuntimeAdapter>, String>;
}

pub(crate) struct HostHandle {
    generation: Generation,
    commands: mpsc::UnboundedSender<HostCommand>,
    task: JoinHandle<()>,
}

impl HostHandle {
    pub(crate) fn spawn(
        generation: Generation,
        adapter: Box<dyn RuntimeAdapter>,
        events: mpsc::UnboundedSender<HostEnvelope>,
    ) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let sink = HostSink::new(generation, events);
        let task = tokio::spawn(host_main(adapter, sink, inbox));
        Self {
            generation,
            commands,
            task,
        }
    }

    pub(crate) fn post(&self, command: HostCommand) -> Result<(), ExecutionError> {
        self.commands.send(command).map_err(|_| {
            ExecutionError::Transport(format!("host generation {} is not running", self.generation))
        })
    }

    pub(crate) fn terminate(self) {
        log::debug!("Terminating host generation {}", self.generation);
        self.task.abort();
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn boot_adapter(adapter: &mut Box<dyn RuntimeAdapter>, sink: &HostSink) -> bool {
    match adapter.boot(sink).await {
        Ok(()) => {
            log::info!("{} host gen {} ready", adapter.language(), sink.generation());
            sink.send(HostMessage::Ready);
            true
        }
        Err(error) => {
            log::warn!(
                "{} host gen {} failed to load: {}",
                adapter.language(),
                sink.generation(),
                error
            );
            sink.send(HostMessage::LoadError { error });
            false
        }
    }
}

async fn host_main(
    mut adapter: Box<dyn RuntimeAdapter>,
    sink: HostSink,
    mut inbox: mpsc::UnboundedReceiver<HostCommand>,
) {
    let mut ready = boot_adapter(&mut adapter, &sink).await;

    while let Some(command) = inbox.recv().await {
        match command {
            HostCommand::Reload => {
                ready = boot_adapter(&mut adapter, &sink).await;
            }
            HostCommand::Run { id, code, files } => {
                if !ready {
                    sink.send(HostMessage::Error {
                        error: format!(
                            "{} runtime is not loaded. Please retry loading.",
                            adapter.language().display_name()
                        ),
                        stdout: None,
                        id,
                    });
                    continue;
                }
                let request = RunRequest { id, code, files };
                let message = match adapter.run(request, &sink).await {
                    Ok(output) => HostMessage::Result { output, id },
                    Err(failure) => HostMessage::Error {
                        error: failure.message,
                        stdout: Some(failure.partial_output),
                        id,
                    },
                };
                sink.send(message);
            }
        }
    }
    log::debug!("{} host gen {} inbox closed", adapter.language(), sink.generation());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedFactory;

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<HostEnvelope>) -> HostMessage {
        rx.recv().await.expect("host event").message
    }

    #[tokio::test]
    async fn test_host_boots_and_answers_each_run_once() {
        let factory = ScriptedFactory::new(GuestLanguage::Python);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = HostHandle::spawn(3, factory.create().unwrap(), tx);

        assert!(matches!(next_message(&mut rx).await, HostMessage::Loading { .. }));
        assert_eq!(next_message(&mut rx).await, HostMessage::Ready);

        host.post(HostCommand::Run {
            id: 1,
            code: "echo:hi".to_string(),
            files: vec![],
        })
        .unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.generation, 3);
        assert_eq!(
            envelope.message,
            HostMessage::Result {
                output: "hi".to_string(),
                id: 1
            }
        );

        host.post(HostCommand::Run {
            id: 2,
            code: "fail:boom:partial".to_string(),
            files: vec![],
        })
        .unwrap();
        assert_eq!(
            next_message(&mut rx).await,
            HostMessage::Error {
                error: "boom".to_string(),
                stdout: Some("partial".to_string()),
                id: 2
            }
        );
    }

    #[tokio::test]
    async fn test_unloaded_host_rejects_runs_until_reload() {
        let factory = ScriptedFactory::new(GuestLanguage::Go).failing_boots(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = HostHandle::spawn(0, factory.create().unwrap(), tx);

        assert!(matches!(next_message(&mut rx).await, HostMessage::Loading { .. }));
        assert!(matches!(next_message(&mut rx).await, HostMessage::LoadError { .. }));

        host.post(HostCommand::Run {
            id: 5,
            code: "echo:x".to_string(),
            files: vec![],
        })
        .unwrap();
        match next_message(&mut rx).await {
            HostMessage::Error { error, id, .. } => {
                assert_eq!(id, 5);
                assert!(error.contains("Go runtime is not loaded"));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        host.post(HostCommand::Reload).unwrap();
        assert!(matches!(next_message(&mut rx).await, HostMessage::Loading { .. }));
        assert_eq!(next_message(&mut rx).await, HostMessage::Ready);
    }

    #[tokio::test]
    async fn test_terminated_host_refuses_commands() {
        let factory = ScriptedFactory::new(GuestLanguage::Sql);
        let (tx, _rx) = mpsc::unbounded_channel();
        let host = HostHandle::spawn(0, factory.create().unwrap(), tx);
        let commands = host.commands.clone();
        host.terminate();
        // The aborted task drops its inbox.
        tokio::time::timeout(std::time::Duration::from_secs(1), commands.closed())
            .await
            .expect("inbox should close after termination");
        assert!(commands.send(HostCommand::Reload).is_err());
    }
}
