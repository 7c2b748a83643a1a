//! TypeScript runtime adapter: `tsc` into the host workspace, then node.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use super::javascript::run_node_capture;
use super::process::run_captured;
use super::toolchain;
use super::workspace::HostWorkspace;
use crate::config::TypeScriptRuntimeConfig;
use crate::core_types::GuestLanguage;
use crate::host::{GuestFailure, HostSink, RunRequest, RuntimeAdapter};

const TSC_ARGS: &[&str] = &[
    "--pretty",
    "false",
    "--noEmitOnError",
    "--target",
    "ES2020",
    "--module",
    "commonjs",
    "--esModuleInterop",
    "--skipLibCheck",
    "--outDir",
    "out",
    "main.ts",
];

struct Runtime {
    compiler: PathBuf,
    node: PathBuf,
    workspace: HostWorkspace,
}

pub struct TypeScriptAdapter {
    config: TypeScriptRuntimeConfig,
    runtime: Option<Runtime>,
}

impl TypeScriptAdapter {
    pub fn new(config: TypeScriptRuntimeConfig) -> Self {
        Self {
            config,
            runtime: None,
        }
    }

    async fn start(&self) -> Result<Runtime, String> {
        let compiler = toolchain::resolve(&self.config.compiler)?;
        let node = toolchain::resolve(&self.config.node)?;
        let version = toolchain::probe_version(&compiler, &["--version"]).await?;
        log::info!("Using TypeScript {} at {}", version, compiler.display());

        let workspace = HostWorkspace::new("polyrun-ts-")
            .map_err(|e| format!("Failed to create TypeScript workspace: {}", e))?;
        Ok(Runtime {
            compiler,
            node,
            workspace,
        })
    }
}

#[async_trait]
impl RuntimeAdapter for TypeScriptAdapter {
    fn language(&self) -> GuestLanguage {
        GuestLanguage::TypeScript
    }

    async fn boot(&mut self, sink: &HostSink) -> Result<(), String> {
        sink.loading("Loading TypeScript compiler...");
        self.runtime = None;
        self.runtime = Some(self.start().await?);
        Ok(())
    }

    async fn run(&mut self, request: RunRequest, _sink: &HostSink) -> Result<String, GuestFailure> {
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(GuestFailure::new("TypeScript compiler is not loaded."));
        };
        let workspace = &runtime.workspace;
        let emitted = workspace.join("out/main.js");
        // A failed compile must not leave the previous run's output behind.
        let _ = tokio::fs::remove_file(&emitted).await;
        tokio::fs::write(workspace.join("main.ts"), &request.code)
            .await
            .map_err(|e| GuestFailure::new(format!("Failed to write main.ts: {}", e)))?;

        let mut cmd = Command::new(&runtime.compiler);
        cmd.args(TSC_ARGS).current_dir(workspace.path());
        let compiled = run_captured(cmd, None)
            .await
            .map_err(|e| GuestFailure::new(format!("Failed to start tsc: {}", e)))?;
        if !compiled.success() {
            let diagnostics = format!("{}{}", compiled.stdout, compiled.stderr);
            let diagnostics = diagnostics.trim();
            return Err(GuestFailure::new(if diagnostics.is_empty() {
                compiled.failure_message("tsc")
            } else {
                diagnostics.to_string()
            }));
        }

        let javascript = tokio::fs::read_to_string(&emitted)
            .await
            .map_err(|e| GuestFailure::new(format!("Transpilation error: {}", e)))?;
        run_node_capture(&runtime.node, &javascript, Some(workspace.path())).await
    }
}
