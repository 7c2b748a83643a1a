//! Child process execution with captured output.
//!
//! Every guest process is spawned with `kill_on_drop`, so dropping the future
//! (which is what aborting a host does) kills the process too.

use std::io;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stderr, or a generic exit description when the process printed nothing.
    pub fn failure_message(&self, program: &str) -> String {
        let stderr = self.stderr.trim_end();
        if stderr.is_empty() {
            format!("{} exited with {}", program, self.status)
        } else {
            stderr.to_string()
        }
    }
}

/// Runs `cmd` to completion, feeding `stdin` if given.
pub async fn run_captured(mut cmd: Command, stdin: Option<&str>) -> io::Result<CapturedOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        match pipe.write_all(input.as_bytes()).await {
            Ok(()) => {}
            // The child exited without reading its input; its output says why.
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
            Err(err) => return Err(err),
        }
        drop(pipe);
    }

    let output = child.wait_with_output().await?;
    Ok(CapturedOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
