//! One coordinator per guest language behind a single facade.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::factory_for;
use crate::config::PolyrunConfig;
use crate::coordinator::{Coordinator, CoordinatorSettings};
use crate::core_types::{ExecutionResult, GuestLanguage, SourceFile};
use crate::errors::ExecutionError;
use crate::host::AdapterFactory;
use crate::status::StatusSubscription;

pub struct Playground {
    coordinators: HashMap<GuestLanguage, Coordinator>,
}

impl Playground {
    /// Builds coordinators for every language. Hosts are not started until a
    /// language is first used or warmed up.
    pub fn new(config: PolyrunConfig) -> Self {
        let settings = config.coordinator_settings();
        let config = Arc::new(config);
        Self::with_factories(
            GuestLanguage::ALL
                .into_iter()
                .map(|language| factory_for(language, config.clone())),
            settings,
        )
    }

    pub fn with_factories(
        factories: impl IntoIterator<Item = Arc<dyn AdapterFactory>>,
        settings: CoordinatorSettings,
    ) -> Self {
        let coordinators = factories
            .into_iter()
            .map(|factory| {
                (
                    factory.language(),
                    Coordinator::new(factory, settings.clone()),
                )
            })
            .collect();
        Self { coordinators }
    }

    pub fn coordinator(&self, language: GuestLanguage) -> Result<&Coordinator, ExecutionError> {
        self.coordinators.get(&language).ok_or_else(|| {
            ExecutionError::Transport(format!("No coordinator registered for {}", language))
        })
    }

    pub async fn submit(
        &self,
        language: GuestLanguage,
        code: impl Into<String>,
        files: Vec<SourceFile>,
    ) -> Result<ExecutionResult, ExecutionError> {
        let coordinator = self.coordinator(language)?;
        coordinator.init().await?;

        let files = if !files.is_empty() && !language.supports_project_files() {
            log::warn!(
                "{} does not support project files; ignoring {} file(s)",
                language.display_name(),
                files.len()
            );
            Vec::new()
        } else {
            files
        };
        coordinator.submit(code, files).await
    }

    pub async fn stop(&self, language: GuestLanguage) -> bool {
        match self.coordinators.get(&language) {
            Some(coordinator) => coordinator.stop().await,
            None => false,
        }
    }

    pub async fn retry_load(&self, language: GuestLanguage) -> Result<(), ExecutionError> {
        self.coordinator(language)?.retry_load().await
    }

    pub fn subscribe(&self, language: GuestLanguage) -> Result<StatusSubscription, ExecutionError> {
        Ok(self.coordinator(language)?.subscribe())
    }

    /// Starts the hosts of `languages` without submitting anything.
    pub async fn warm_up(&self, languages: &[GuestLanguage]) -> Result<(), ExecutionError> {
        for language in languages {
            self.coordinator(*language)?.init().await?;
        }
        Ok(())
    }

    pub fn languages(&self) -> Vec<GuestLanguage> {
        GuestLanguage::ALL
            .into_iter()
            .filter(|language| self.coordinators.contains_key(language))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedFactory;

    fn scripted_playground(languages: &[GuestLanguage]) -> Playground {
        Playground::with_factories(
            languages
                .iter()
                .map(|l| Arc::new(ScriptedFactory::new(*l)) as Arc<dyn AdapterFactory>),
            CoordinatorSettings::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_initializes_lazily() {
        let playground = scripted_playground(&[GuestLanguage::Python, GuestLanguage::Sql]);
        let result = playground
            .submit(GuestLanguage::Sql, "echo:1", vec![])
            .await
            .unwrap();
        assert_eq!(result.output, "1");

        let python = playground.coordinator(GuestLanguage::Python).unwrap();
        assert_eq!(python.snapshot().await.unwrap().host_state, crate::HostState::NotStarted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_files_dropped_for_languages_without_projects() {
        let playground = scripted_playground(&[GuestLanguage::Python, GuestLanguage::Go]);
        let files = vec![SourceFile::new("util.py", "")];

        let python = playground
            .submit(GuestLanguage::Python, "files", files.clone())
            .await
            .unwrap();
        assert_eq!(python.output, "util.py");

        let go = playground.submit(GuestLanguage::Go, "files", files).await.unwrap();
        assert_eq!(go.output, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_language_is_rejected() {
        let playground = scripted_playground(&[GuestLanguage::Python]);
        let err = playground
            .submit(GuestLanguage::TypeScript, "echo:x", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Transport(_)));
        assert!(!playground.stop(GuestLanguage::TypeScript).await);
        assert_eq!(playground.languages(), vec![GuestLanguage::Python]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_up_starts_hosts() {
        let playground = scripted_playground(&[GuestLanguage::Go]);
        let mut status = playground.subscribe(GuestLanguage::Go).unwrap();
        playground.warm_up(&[GuestLanguage::Go]).await.unwrap();
        let first = status.recv().await.unwrap();
        assert!(matches!(first.event, crate::StatusEvent::Loading { .. }));
    }

    #[tokio::test]
    async fn test_default_playground_covers_every_language() {
        let playground = Playground::new(PolyrunConfig::default());
        assert_eq!(playground.languages(), GuestLanguage::ALL.to_vec());
    }
}
