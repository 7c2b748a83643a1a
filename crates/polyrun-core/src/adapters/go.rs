//! Go runtime adapter backed by the local toolchain.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::process::run_captured;
use super::toolchain;
use super::workspace::HostWorkspace;
use crate::config::GoRuntimeConfig;
use crate::core_types::GuestLanguage;
use crate::host::{GuestFailure, HostSink, RunRequest, RuntimeAdapter};

const WARMUP_PROGRAM: &str = "package main\n\nfunc main() {}\n";
const WARMUP_BINARY: &str = "warmup-bin";

struct Runtime {
    toolchain: PathBuf,
    workspace: HostWorkspace,
}

pub struct GoAdapter {
    config: GoRuntimeConfig,
    runtime: Option<Runtime>,
}

impl GoAdapter {
    pub fn new(config: GoRuntimeConfig) -> Self {
        Self {
            config,
            runtime: None,
        }
    }

    /// Checks the toolchain can locate its standard library. Cheap, no compile.
    async fn check_goroot(&self, toolchain: &Path) -> Result<PathBuf, String> {
        let goroot = toolchain::probe_version(toolchain, &["env", "GOROOT"]).await?;
        let goroot = PathBuf::from(goroot);
        let usable = !goroot.as_os_str().is_empty()
            && tokio::fs::metadata(&goroot).await.is_ok_and(|m| m.is_dir());
        if !usable {
            return Err(format!("Go toolchain reports an unusable GOROOT '{}'", goroot.display()));
        }
        Ok(goroot)
    }

    /// Builds a trivial program to warm the build cache. A cold cache can take
    /// a while, so the build has its own budget.
    async fn warm_build(&self, toolchain: &Path, workspace: &HostWorkspace) -> Result<PathBuf, String> {
        let warmup_dir = workspace.join("warmup");
        tokio::fs::create_dir_all(&warmup_dir)
            .await
            .map_err(|e| format!("Failed to create warm-up directory: {}", e))?;
        tokio::fs::write(warmup_dir.join("main.go"), WARMUP_PROGRAM)
            .await
            .map_err(|e| format!("Failed to write warm-up program: {}", e))?;

        let mut cmd = Command::new(toolchain);
        cmd.args(["build", "-o", WARMUP_BINARY, "main.go"])
            .current_dir(&warmup_dir);
        let budget = self.config.build_timeout();
        let output = tokio::time::timeout(budget, run_captured(cmd, None))
            .await
            .map_err(|_| format!("Go toolchain did not finish the warm-up build within {:?}", budget))?
            .map_err(|e| format!("Failed to run {}: {}", toolchain.display(), e))?;
        if !output.success() {
            return Err(format!(
                "Go toolchain failed to build the warm-up program: {}",
                output.failure_message("go")
            ));
        }
        Ok(warmup_dir.join(WARMUP_BINARY))
    }

    /// Polls until the built binary is visible.
    async fn await_binary(&self, binary: &Path) -> Result<(), String> {
        let interval = self.config.probe_interval();
        for _ in 0..self.config.probe_attempts {
            if tokio::fs::metadata(binary).await.is_ok_and(|m| m.is_file()) {
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
        Err(format!(
            "Go toolchain did not produce a binary after {} attempts",
            self.config.probe_attempts
        ))
    }

    async fn start(&self) -> Result<Runtime, String> {
        let toolchain = toolchain::resolve(&self.config.toolchain)?;
        let version = toolchain::probe_version(&toolchain, &["version"]).await?;
        log::info!("Using {} at {}", version, toolchain.display());

        let goroot = self.check_goroot(&toolchain).await?;
        log::debug!("Go standard library at {}", goroot.display());

        let workspace = HostWorkspace::new("polyrun-go-")
            .map_err(|e| format!("Failed to create Go workspace: {}", e))?;
        let binary = self.warm_build(&toolchain, &workspace).await?;
        self.await_binary(&binary).await?;
        Ok(Runtime {
            toolchain,
            workspace,
        })
    }
}

#[async_trait]
impl RuntimeAdapter for GoAdapter {
    fn language(&self) -> GuestLanguage {
        GuestLanguage::Go
    }

    async fn boot(&mut self, sink: &HostSink) -> Result<(), String> {
        sink.loading("Loading Go runtime...");
        self.runtime = None;
        self.runtime = Some(self.start().await?);
        Ok(())
    }

    async fn run(&mut self, request: RunRequest, _sink: &HostSink) -> Result<String, GuestFailure> {
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(GuestFailure::new("Go runtime is not loaded. Please retry loading."));
        };
        let main = runtime.workspace.join("main.go");
        tokio::fs::write(&main, &request.code)
            .await
            .map_err(|e| GuestFailure::new(format!("Failed to write main.go: {}", e)))?;

        let mut cmd = Command::new(&runtime.toolchain);
        cmd.args(["run", "main.go"])
            .current_dir(runtime.workspace.path());
        let output = run_captured(cmd, None)
            .await
            .map_err(|e| GuestFailure::new(format!("Failed to start go: {}", e)))?;

        if !output.success() {
            return Err(GuestFailure::with_output(
                output.failure_message("go"),
                output.stdout,
            ));
        }
        let mut text = output.stdout;
        if !output.stderr.is_empty() {
            text.push_str("\n--- STDERR ---\n");
            text.push_str(&output.stderr);
        }
        Ok(text)
    }
}
