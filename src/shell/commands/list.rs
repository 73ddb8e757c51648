use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;

use super::{Command, ShellState};

pub struct ListCommand;

#[async_trait]
impl Command for ListCommand {
    fn name(&self) -> &str {
        "list"
    }

    fn usage(&self) -> &str {
        "list - Show registered databases"
    }

    async fn execute(&self, state: &mut ShellState, _args: &[String]) -> Result<()> {
        let manager = state.manager();
        if manager.items().is_empty() {
            println!("No databases registered. Use 'import <path|url>' to add one.");
            return Ok(());
        }

        let current = manager.current_item().map(|i| i.database_path.clone());
        for item in manager.items() {
            let marker = if Some(&item.database_path) == current.as_ref() {
                "*".green().bold().to_string()
            } else {
                " ".to_string()
            };
            let mut line = format!("{marker} {}", item.name.bold());
            if item.source_archive.is_some() {
                line.push_str(&format!(" {}", "[sources]".cyan()));
            }
            if let Some(error) = &item.error {
                line.push_str(&format!(" {} {error}", "[error]".red()));
            }
            println!("{line}");
            println!("    {}", item.database_path.display().to_string().dimmed());
        }
        Ok(())
    }
}
