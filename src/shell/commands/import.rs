use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::database::UserPrompt;
use crate::ui;

use super::{Command, ShellState};

pub struct ImportCommand;

/// Prompt collaborator that answers with a value the user already typed as
/// a command argument
struct PresetPrompt(String);

#[async_trait]
impl UserPrompt for PresetPrompt {
    async fn ask_for_input(&self, _prompt: &str) -> Option<String> {
        Some(self.0.clone())
    }

    async fn choose_folder(&self) -> Option<PathBuf> {
        Some(PathBuf::from(&self.0))
    }
}

#[async_trait]
impl Command for ImportCommand {
    fn name(&self) -> &str {
        "import"
    }

    fn usage(&self) -> &str {
        "import [PATH|URL] - Import a database from a folder, archive, or URL"
    }

    async fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        let result = match args.first().map(String::as_str) {
            // No argument: ask for a URL, the most common remote flow
            None => {
                let bar = ui::download_bar();
                let reporter = bar.clone();
                let progress = move |received: u64, total: Option<u64>| {
                    if let Some(total) = total {
                        reporter.set_length(total);
                    }
                    reporter.set_position(received);
                };
                let (fetcher, manager) = state.import_parts();
                let outcome = fetcher.import_from_url(manager, &progress).await;
                bar.finish_and_clear();
                outcome
            }
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                let fetcher = state.fetcher_with_prompt(Arc::new(PresetPrompt(url.to_string())));
                let bar = ui::download_bar();
                let reporter = bar.clone();
                let progress = move |received: u64, total: Option<u64>| {
                    if let Some(total) = total {
                        reporter.set_length(total);
                    }
                    reporter.set_position(received);
                };
                let outcome = fetcher
                    .import_from_url(state.manager_mut(), &progress)
                    .await;
                bar.finish_and_clear();
                outcome
            }
            Some(path) => {
                let path = Path::new(path);
                let is_dir = tokio::fs::metadata(path).await.map(|m| m.is_dir());
                let (fetcher, manager) = state.import_parts();
                match is_dir {
                    Ok(true) => fetcher.import_folder(manager, path).await,
                    _ => {
                        let spinner = ui::create_spinner("Extracting archive...");
                        let outcome = fetcher.import_local_archive(manager, path).await;
                        spinner.finish_and_clear();
                        outcome
                    }
                }
            }
        };

        // The fetcher already reported the outcome (a declined prompt stays
        // silent), so a failed import should not abort the REPL
        let _ = result;
        Ok(())
    }
}
