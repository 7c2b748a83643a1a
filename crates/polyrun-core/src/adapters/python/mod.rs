//! CPython runtime adapter.
//!
//! Each host owns a private workspace holding the staged project files and a
//! `site` directory that on-demand package installs land in. Code is fed to
//! `python -u -` on stdin, so no guest file ever shadows a project module.

pub mod imports;
pub mod packages;

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::process::Command;

use super::process::run_captured;
use super::toolchain;
use super::workspace::HostWorkspace;
use crate::config::PythonRuntimeConfig;
use crate::core_types::GuestLanguage;
use crate::host::{GuestFailure, HostSink, RunRequest, RuntimeAdapter};
use crate::output::{truncate_output, OutputLimits};
use crate::protocol::HostMessage;
use packages::PackageInstaller;

const SITE_DIR: &str = "site";

struct Runtime {
    interpreter: PathBuf,
    workspace: HostWorkspace,
    site_dir: PathBuf,
    pip_available: bool,
}

pub struct PythonAdapter {
    config: PythonRuntimeConfig,
    limits: OutputLimits,
    runtime: Option<Runtime>,
    installed: HashSet<String>,
}

impl PythonAdapter {
    pub fn new(config: PythonRuntimeConfig, limits: OutputLimits) -> Self {
        Self {
            config,
            limits,
            runtime: None,
            installed: HashSet::new(),
        }
    }

    async fn start(&self) -> Result<Runtime, String> {
        let interpreter = toolchain::resolve(&self.config.interpreter)?;
        let version = toolchain::probe_version(&interpreter, &["--version"]).await?;
        log::info!("Using {} at {}", version, interpreter.display());

        let workspace = HostWorkspace::new("polyrun-python-")
            .map_err(|e| format!("Failed to create Python workspace: {}", e))?;
        let site_dir = workspace.join(SITE_DIR);
        tokio::fs::create_dir_all(&site_dir)
            .await
            .map_err(|e| format!("Failed to create site directory: {}", e))?;

        let pip_available = if self.config.install_packages {
            let installer = PackageInstaller {
                interpreter: &interpreter,
                site_dir: &site_dir,
                package_index: None,
            };
            let available = installer.pip_available().await;
            if !available {
                log::warn!("pip is not available for {}; package installation disabled", version);
            }
            available
        } else {
            false
        };

        Ok(Runtime {
            interpreter,
            workspace,
            site_dir,
            pip_available,
        })
    }

    async fn install_missing(&mut self, runtime: &Runtime, request: &RunRequest, sink: &HostSink) {
        let candidates: Vec<String> = imports::detect_imports(&request.code, &request.files)
            .into_iter()
            .filter(|module| !self.installed.contains(module))
            .collect();
        if candidates.is_empty() {
            return;
        }

        let installer = PackageInstaller {
            interpreter: &runtime.interpreter,
            site_dir: &runtime.site_dir,
            package_index: self.config.package_index.as_deref(),
        };
        let missing = installer.missing(&candidates).await;
        if missing.is_empty() {
            return;
        }

        sink.send(HostMessage::PackageLoading {
            packages: missing.clone(),
            id: request.id,
        });
        let installed = installer.install(&missing).await;
        self.installed.extend(installed);
        sink.send(HostMessage::PackagesLoaded { id: request.id });
    }
}

#[async_trait]
impl RuntimeAdapter for PythonAdapter {
    fn language(&self) -> GuestLanguage {
        GuestLanguage::Python
    }

    async fn boot(&mut self, sink: &HostSink) -> Result<(), String> {
        sink.loading("Loading Python runtime...");
        // Dropping the runtime deletes its site directory and everything installed there.
        self.runtime = None;
        self.installed.clear();
        self.runtime = Some(self.start().await?);
        Ok(())
    }

    async fn run(&mut self, request: RunRequest, sink: &HostSink) -> Result<String, GuestFailure> {
        let Some(runtime) = self.runtime.take() else {
            return Err(GuestFailure::new("Python runtime is not loaded. Please retry loading."));
        };
        let outcome = self.execute(&runtime, request, sink).await;
        self.runtime = Some(runtime);
        outcome
    }
}

impl PythonAdapter {
    async fn execute(
        &mut self,
        runtime: &Runtime,
        request: RunRequest,
        sink: &HostSink,
    ) -> Result<String, GuestFailure> {
        runtime.workspace.stage(&request.files).await?;
        if runtime.pip_available {
            self.install_missing(runtime, &request, sink).await;
        }

        let mut cmd = Command::new(&runtime.interpreter);
        cmd.args(["-u", "-"])
            .current_dir(runtime.workspace.path())
            .env("PYTHONPATH", &runtime.site_dir)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8");

        let output = run_captured(cmd, Some(&request.code))
            .await
            .map_err(|e| GuestFailure::new(format!("Failed to start Python: {}", e)))?;
        let stdout = truncate_output(&output.stdout, &self.limits);
        if output.success() {
            Ok(stdout)
        } else {
            Err(GuestFailure::with_output(output.failure_message("python"), stdout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HostEnvelope;
    use tokio::sync::mpsc;

    const MODULE: &str = "polyrun_reload_check_mod";

    fn adapter() -> Option<PythonAdapter> {
        which::which("python3").ok()?;
        let config = PythonRuntimeConfig {
            // Unreachable index so installs fail fast instead of touching the network.
            package_index: Some("file:///nonexistent/polyrun-index".to_string()),
            ..Default::default()
        };
        Some(PythonAdapter::new(config, OutputLimits::default()))
    }

    fn request(id: u64, code: &str) -> RunRequest {
        RunRequest {
            id,
            code: code.to_string(),
            files: vec![],
        }
    }

    fn package_phases(rx: &mut mpsc::UnboundedReceiver<HostEnvelope>) -> Vec<Vec<String>> {
        let mut phases = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let HostMessage::PackageLoading { packages, .. } = envelope.message {
                phases.push(packages);
            }
        }
        phases
    }

    #[tokio::test]
    async fn test_reboot_forgets_packages_installed_into_the_old_site_dir() {
        let Some(mut adapter) = adapter() else {
            return;
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = HostSink::new(0, tx);
        adapter.boot(&sink).await.unwrap();

        let site_dir = adapter.runtime.as_ref().unwrap().site_dir.clone();
        tokio::fs::write(site_dir.join(format!("{}.py", MODULE)), "VALUE = 1
")
            .await
            .unwrap();
        adapter.installed.insert(MODULE.to_string());
        let code = format!("import {}
print({}.VALUE)", MODULE, MODULE);
        assert_eq!(adapter.run(request(1, &code), &sink).await.unwrap(), "1
");

        adapter.boot(&sink).await.unwrap();
        assert!(!site_dir.exists());
        assert!(adapter.installed.is_empty());

        let pip_available = adapter.runtime.as_ref().unwrap().pip_available;
        package_phases(&mut rx);
        let err = adapter.run(request(2, &code), &sink).await.unwrap_err();
        assert!(err.message.contains("ModuleNotFoundError"), "{}", err.message);
        if pip_available {
            assert_eq!(package_phases(&mut rx), vec![vec![MODULE.to_string()]]);
        }
    }

    #[tokio::test]
    async fn test_run_before_boot_asks_for_retry() {
        let mut adapter = PythonAdapter::new(PythonRuntimeConfig::default(), OutputLimits::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = adapter.run(request(1, "print(1)"), &HostSink::new(0, tx)).await.unwrap_err();
        assert!(err.message.contains("not loaded"));
    }
}
