//! Runtime adapters, one per guest language.
//!
//! Python, Go, JavaScript and TypeScript run guest code in child processes of
//! their local toolchains; SQL runs against an embedded SQLite database.

pub mod go;
pub mod javascript;
pub mod process;
pub mod python;
pub mod sql;
pub mod toolchain;
pub mod typescript;
pub mod workspace;

use std::sync::Arc;

use crate::config::PolyrunConfig;
use crate::core_types::GuestLanguage;
use crate::host::{AdapterFactory, RuntimeAdapter};

pub use go::GoAdapter;
pub use javascript::JavaScriptAdapter;
pub use python::PythonAdapter;
pub use sql::SqlAdapter;
pub use typescript::TypeScriptAdapter;

/// Builds the configured adapter for one language, a fresh one per host generation.
pub struct LanguageAdapterFactory {
    language: GuestLanguage,
    config: Arc<PolyrunConfig>,
}

impl LanguageAdapterFactory {
    pub fn new(language: GuestLanguage, config: Arc<PolyrunConfig>) -> Self {
        Self { language, config }
    }
}

impl AdapterFactory for LanguageAdapterFactory {
    fn language(&self) -> GuestLanguage {
        self.language
    }

    fn create(&self) -> Result<Box<dyn RuntimeAdapter>, String> {
        let runtimes = &self.config.runtimes;
        let adapter: Box<dyn RuntimeAdapter> = match self.language {
            GuestLanguage::Python => Box::new(PythonAdapter::new(
                runtimes.python.clone(),
                self.config.output.limits(),
            )),
            GuestLanguage::Go => Box::new(GoAdapter::new(runtimes.go.clone())),
            GuestLanguage::JavaScript => Box::new(JavaScriptAdapter::new(runtimes.javascript.clone())),
            GuestLanguage::TypeScript => Box::new(TypeScriptAdapter::new(runtimes.typescript.clone())),
            GuestLanguage::Sql => Box::new(SqlAdapter::new()),
        };
        Ok(adapter)
    }
}

pub fn factory_for(language: GuestLanguage, config: Arc<PolyrunConfig>) -> Arc<dyn AdapterFactory> {
    Arc::new(LanguageAdapterFactory::new(language, config))
}
