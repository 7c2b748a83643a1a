use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::errors::PolyrunError;

/// A source language end users submit for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestLanguage {
    Python,
    Go,
    JavaScript,
    TypeScript,
    Sql,
}

impl GuestLanguage {
    pub const ALL: [GuestLanguage; 5] = [
        GuestLanguage::Python,
        GuestLanguage::Go,
        GuestLanguage::JavaScript,
        GuestLanguage::TypeScript,
        GuestLanguage::Sql,
    ];

    /// Human-readable name used in status and error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            GuestLanguage::Python => "Python",
            GuestLanguage::Go => "Go",
            GuestLanguage::JavaScript => "JavaScript",
            GuestLanguage::TypeScript => "TypeScript",
            GuestLanguage::Sql => "SQLite",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            GuestLanguage::Python => "py",
            GuestLanguage::Go => "go",
            GuestLanguage::JavaScript => "js",
            GuestLanguage::TypeScript => "ts",
            GuestLanguage::Sql => "sql",
        }
    }

    /// Whether auxiliary project files are forwarded with a run request.
    pub fn supports_project_files(&self) -> bool {
        matches!(self, GuestLanguage::Python)
    }

    /// Infers the language from a file name's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        GuestLanguage::ALL
            .into_iter()
            .find(|lang| lang.file_extension() == ext)
    }
}

impl fmt::Display for GuestLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GuestLanguage::Python => "python",
            GuestLanguage::Go => "go",
            GuestLanguage::JavaScript => "javascript",
            GuestLanguage::TypeScript => "typescript",
            GuestLanguage::Sql => "sql",
        };
        f.write_str(name)
    }
}

impl FromStr for GuestLanguage {
    type Err = PolyrunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(GuestLanguage::Python),
            "go" | "golang" => Ok(GuestLanguage::Go),
            "javascript" | "js" | "node" => Ok(GuestLanguage::JavaScript),
            "typescript" | "ts" => Ok(GuestLanguage::TypeScript),
            "sql" | "sqlite" => Ok(GuestLanguage::Sql),
            other => Err(PolyrunError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// An auxiliary in-memory file submitted alongside the main code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub code: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }
}

/// Output of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub duration_seconds: f64,
}
