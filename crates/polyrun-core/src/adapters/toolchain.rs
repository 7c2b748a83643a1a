//! Toolchain discovery.

use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::process::run_captured;

/// Resolves `program` (a bare name searched on `PATH`, or a path) to an executable.
pub fn resolve(program: &str) -> Result<PathBuf, String> {
    which::which(program).map_err(|e| format!("Could not find '{}' executable: {}", program, e))
}

/// Runs `program args...` and returns the first non-empty line it printed.
pub async fn probe_version(program: &Path, args: &[&str]) -> Result<String, String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    let output = run_captured(cmd, None)
        .await
        .map_err(|e| format!("Failed to run {}: {}", program.display(), e))?;
    if !output.success() {
        return Err(output.failure_message(&program.display().to_string()));
    }
    Ok(output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_program_does_not_resolve() {
        let err = resolve("polyrun-no-such-interpreter").unwrap_err();
        assert!(err.contains("polyrun-no-such-interpreter"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_reads_first_line() {
        let sh = resolve("sh").unwrap();
        let version = probe_version(&sh, &["-c", "echo; echo 'tool 1.2'; echo more"])
            .await
            .unwrap();
        assert_eq!(version, "tool 1.2");
    }
}
