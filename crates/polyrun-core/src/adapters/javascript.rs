//! JavaScript runtime adapter and the node capture harness shared with TypeScript.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::process::run_captured;
use super::toolchain;
use crate::config::JavaScriptRuntimeConfig;
use crate::core_types::GuestLanguage;
use crate::host::{GuestFailure, HostSink, RunRequest, RuntimeAdapter};

const ENVELOPE_SENTINEL: &str = "\u{1}polyrun-envelope\u{1}";

/// Reads the guest program from stdin, captures console output for the
/// duration of one indirect eval, then restores the console and writes a
/// JSON envelope after the sentinel. A guest `process.exit()` still gets an
/// envelope from the exit hook.
const CAPTURE_PRELUDE: &str = r#"
const __polyrunCode = require('fs').readFileSync(0, 'utf8');
const __polyrunLines = [];
const __polyrunFormat = (args) => args
  .map((a) => (typeof a === 'object' ? JSON.stringify(a, null, 2) : String(a)))
  .join(' ');
const __polyrunConsole = { log: console.log, info: console.info, warn: console.warn, error: console.error };
console.log = (...args) => __polyrunLines.push(__polyrunFormat(args));
console.info = (...args) => __polyrunLines.push(__polyrunFormat(args));
console.warn = (...args) => __polyrunLines.push('[warn] ' + __polyrunFormat(args));
console.error = (...args) => __polyrunLines.push('[error] ' + __polyrunFormat(args));
const __polyrunReport = (envelope) => {
  Object.assign(console, __polyrunConsole);
  process.stdout.write('\n\u0001polyrun-envelope\u0001' + JSON.stringify(envelope) + '\n');
};
let __polyrunReported = false;
process.on('exit', (code) => {
  if (__polyrunReported) return;
  __polyrunReport({
    ok: code === 0,
    error: 'Process exited with code ' + code,
    output: __polyrunLines.join('\n'),
  });
});
let __polyrunEnvelope;
try {
  const __polyrunResult = (0, eval)(__polyrunCode);
  if (__polyrunLines.length === 0 && __polyrunResult !== undefined) {
    __polyrunLines.push(__polyrunFormat([__polyrunResult]));
  }
  __polyrunEnvelope = { ok: true, output: __polyrunLines.join('\n') };
} catch (err) {
  __polyrunEnvelope = {
    ok: false,
    error: (err && err.message) || String(err),
    output: __polyrunLines.join('\n'),
  };
}
__polyrunReported = true;
__polyrunReport(__polyrunEnvelope);
"#;

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: Option<String>,
}

/// Runs `code` through node with console capture.
pub(crate) async fn run_node_capture(
    node: &Path,
    code: &str,
    cwd: Option<&Path>,
) -> Result<String, GuestFailure> {
    let mut cmd = Command::new(node);
    cmd.arg("-e").arg(CAPTURE_PRELUDE);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = run_captured(cmd, Some(code))
        .await
        .map_err(|e| GuestFailure::new(format!("Failed to start node: {}", e)))?;

    let Some(at) = output.stdout.rfind(ENVELOPE_SENTINEL) else {
        // Killed or crashed before reporting; keep whatever reached stdout.
        return Err(GuestFailure::with_output(
            output.failure_message("node"),
            output.stdout.trim_end_matches('\n'),
        ));
    };
    let raw = output.stdout[..at].trim_end_matches('\n');
    let body = output.stdout[at + ENVELOPE_SENTINEL.len()..].lines().next().unwrap_or("");
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| GuestFailure::new(format!("Malformed node output: {}", e)))?;

    // Direct process.stdout writes precede the captured console lines.
    let text = match (raw.is_empty(), envelope.output.is_empty()) {
        (true, _) => envelope.output,
        (false, true) => raw.to_string(),
        (false, false) => format!("{}\n{}", raw, envelope.output),
    };
    if envelope.ok {
        Ok(text)
    } else {
        Err(GuestFailure::with_output(
            envelope.error.unwrap_or_else(|| "Unknown error".to_string()),
            text,
        ))
    }
}

pub struct JavaScriptAdapter {
    config: JavaScriptRuntimeConfig,
    node: Option<PathBuf>,
}

impl JavaScriptAdapter {
    pub fn new(config: JavaScriptRuntimeConfig) -> Self {
        Self { config, node: None }
    }
}

#[async_trait]
impl RuntimeAdapter for JavaScriptAdapter {
    fn language(&self) -> GuestLanguage {
        GuestLanguage::JavaScript
    }

    /// Nothing to load; only the executable is located.
    async fn boot(&mut self, _sink: &HostSink) -> Result<(), String> {
        self.node = Some(toolchain::resolve(&self.config.node)?);
        Ok(())
    }

    async fn run(&mut self, request: RunRequest, _sink: &HostSink) -> Result<String, GuestFailure> {
        let Some(node) = self.node.as_deref() else {
            return Err(GuestFailure::new("JavaScript runtime is not ready."));
        };
        run_node_capture(node, &request.code, None).await
    }
}
