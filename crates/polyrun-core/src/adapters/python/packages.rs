//! On-demand package installation into a host's private site directory.

use std::path::Path;
use tokio::process::Command;

use crate::adapters::process::run_captured;

const FIND_MISSING: &str = r#"import importlib.util, sys
for name in sys.argv[1:]:
    try:
        found = importlib.util.find_spec(name) is not None
    except Exception:
        found = False
    if not found:
        print(name)
"#;

/// Import names whose distribution on the package index is named differently.
const DISTRIBUTION_ALIASES: &[(&str, &str)] = &[
    ("PIL", "pillow"),
    ("bs4", "beautifulsoup4"),
    ("cv2", "opencv-python"),
    ("dateutil", "python-dateutil"),
    ("sklearn", "scikit-learn"),
    ("yaml", "pyyaml"),
];

pub fn distribution_name(module: &str) -> &str {
    DISTRIBUTION_ALIASES
        .iter()
        .find(|(import, _)| *import == module)
        .map(|(_, dist)| *dist)
        .unwrap_or(module)
}

pub struct PackageInstaller<'a> {
    pub interpreter: &'a Path,
    pub site_dir: &'a Path,
    pub package_index: Option<&'a str>,
}

impl PackageInstaller<'_> {
    fn python(&self) -> Command {
        let mut cmd = Command::new(self.interpreter);
        cmd.env("PYTHONPATH", self.site_dir)
            .env("PYTHONDONTWRITEBYTECODE", "1");
        cmd
    }

    pub async fn pip_available(&self) -> bool {
        let mut cmd = self.python();
        cmd.args(["-m", "pip", "--version"]);
        matches!(run_captured(cmd, None).await, Ok(output) if output.success())
    }

    /// Subset of `modules` the interpreter cannot import yet.
    pub async fn missing(&self, modules: &[String]) -> Vec<String> {
        if modules.is_empty() {
            return Vec::new();
        }
        let mut cmd = self.python();
        cmd.arg("-c").arg(FIND_MISSING).args(modules);
        match run_captured(cmd, None).await {
            Ok(output) if output.success() => output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Ok(output) => {
                log::warn!("Module probe failed: {}", output.failure_message("python"));
                modules.to_vec()
            }
            Err(err) => {
                log::warn!("Module probe could not run: {}", err);
                modules.to_vec()
            }
        }
    }

    async fn pip_install(&self, distributions: &[&str]) -> Result<(), String> {
        let mut cmd = self.python();
        cmd.args([
            "-m",
            "pip",
            "install",
            "--quiet",
            "--disable-pip-version-check",
            "--no-input",
            "--target",
        ])
        .arg(self.site_dir);
        if let Some(index) = self.package_index {
            cmd.arg("--index-url").arg(index);
        }
        cmd.args(distributions);

        let output = run_captured(cmd, None)
            .await
            .map_err(|e| format!("Failed to run pip: {}", e))?;
        if output.success() {
            Ok(())
        } else {
            Err(output.failure_message("pip"))
        }
    }

    /// Installs everything in one go, falling back to one package at a time.
    /// Returns the modules that were installed. Failures are left for the
    /// guest's own import to report.
    pub async fn install(&self, modules: &[String]) -> Vec<String> {
        let distributions: Vec<&str> = modules.iter().map(|m| distribution_name(m)).collect();
        match self.pip_install(&distributions).await {
            Ok(()) => {
                log::info!("Installed packages: {}", distributions.join(", "));
                return modules.to_vec();
            }
            Err(err) => log::debug!("Bulk install failed, retrying individually: {}", err),
        }

        let mut installed = Vec::new();
        for (module, distribution) in modules.iter().zip(&distributions) {
            match self.pip_install(&[*distribution]).await {
                Ok(()) => installed.push(module.clone()),
                Err(err) => log::warn!("Failed to install {}: {}", distribution, err),
            }
        }
        installed
    }
}
