//! Scripted runtime adapter for exercising hosts and coordinators without
//! real toolchains.
//!
//! The submitted code is a tiny script:
//!
//! - `echo:<text>` returns `<text>`
//! - `fail:<message>:<partial>` fails with `<message>` after printing `<partial>`
//! - `hang` never finishes
//! - `sleep:<ms>:<text>` returns `<text>` after `<ms>`
//! - `twice:<text>` answers the same request twice
//! - `packages:<download ms>:<run ms>` goes through a package phase, returns `done`
//! - `late:<ms>:<text>` answers from a detached task after `<ms>`, then hangs
//! - `files` returns the auxiliary file names joined by `,`

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core_types::GuestLanguage;
use crate::host::{AdapterFactory, GuestFailure, HostSink, RunRequest, RuntimeAdapter};
use crate::protocol::HostMessage;

/// Routes `log` output through the test harness. `RUST_LOG` picks the level.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

#[derive(Clone)]
pub struct ScriptedFactory {
    language: GuestLanguage,
    boot_failures: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
    boot_delay: Duration,
    construct_error: Option<String>,
}

impl ScriptedFactory {
    pub fn new(language: GuestLanguage) -> Self {
        Self {
            language,
            boot_failures: Arc::new(AtomicUsize::new(0)),
            created: Arc::new(AtomicUsize::new(0)),
            boot_delay: Duration::ZERO,
            construct_error: None,
        }
    }

    /// The next `count` boots fail, across every adapter this factory creates.
    pub fn failing_boots(self, count: usize) -> Self {
        self.boot_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    pub fn unconstructible(mut self, error: &str) -> Self {
        self.construct_error = Some(error.to_string());
        self
    }

    /// Number of adapters handed out so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for ScriptedFactory {
    fn language(&self) -> GuestLanguage {
        self.language
    }

    fn create(&self) -> Result<Box<dyn RuntimeAdapter>, String> {
        if let Some(error) = &self.construct_error {
            return Err(error.clone());
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedAdapter {
            language: self.language,
            boot_failures: self.boot_failures.clone(),
            boot_delay: self.boot_delay,
        }))
    }
}

pub struct ScriptedAdapter {
    language: GuestLanguage,
    boot_failures: Arc<AtomicUsize>,
    boot_delay: Duration,
}

fn millis(value: &str) -> Duration {
    Duration::from_millis(value.parse().unwrap_or(0))
}

#[async_trait]
impl RuntimeAdapter for ScriptedAdapter {
    fn language(&self) -> GuestLanguage {
        self.language
    }

    async fn boot(&mut self, sink: &HostSink) -> Result<(), String> {
        sink.loading(format!("Loading {} runtime...", self.language.display_name()));
        if !self.boot_delay.is_zero() {
            tokio::time::sleep(self.boot_delay).await;
        }
        let failed = self
            .boot_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err("scripted boot failure".to_string());
        }
        Ok(())
    }

    async fn run(&mut self, request: RunRequest, sink: &HostSink) -> Result<String, GuestFailure> {
        let code = request.code.as_str();
        if let Some(text) = code.strip_prefix("echo:") {
            return Ok(text.to_string());
        }
        if let Some(rest) = code.strip_prefix("fail:") {
            let (message, partial) = rest.rsplit_once(':').unwrap_or((rest, ""));
            return Err(GuestFailure::with_output(message, partial));
        }
        if code == "hang" {
            std::future::pending::<()>().await;
        }
        if let Some(rest) = code.strip_prefix("sleep:") {
            let (ms, text) = rest.split_once(':').unwrap_or((rest, ""));
            tokio::time::sleep(millis(ms)).await;
            return Ok(text.to_string());
        }
        if let Some(text) = code.strip_prefix("twice:") {
            sink.send(HostMessage::Result {
                output: text.to_string(),
                id: request.id,
            });
            return Ok(text.to_string());
        }
        if let Some(rest) = code.strip_prefix("packages:") {
            let (download, compute) = rest.split_once(':').unwrap_or((rest, "0"));
            sink.send(HostMessage::PackageLoading {
                packages: vec!["scripted".to_string()],
                id: request.id,
            });
            tokio::time::sleep(millis(download)).await;
            sink.send(HostMessage::PackagesLoaded { id: request.id });
            tokio::time::sleep(millis(compute)).await;
            return Ok("done".to_string());
        }
        if let Some(rest) = code.strip_prefix("late:") {
            let (ms, text) = rest.split_once(':').unwrap_or((rest, ""));
            let delay = millis(ms);
            let late_sink = sink.clone();
            let output = text.to_string();
            let id = request.id;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                late_sink.send(HostMessage::Result { output, id });
            });
            std::future::pending::<()>().await;
        }
        if code == "files" {
            let names: Vec<&str> = request.files.iter().map(|f| f.name.as_str()).collect();
            return Ok(names.join(","));
        }
        Err(GuestFailure::new(format!("unknown script: {}", code)))
    }
}
