use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use humansize::{DECIMAL, format_size};

use crate::ui::create_spinner;
use crate::vfs::ZipRef;

use super::{Command, ShellState};

pub struct LsCommand;

#[async_trait]
impl Command for LsCommand {
    fn name(&self) -> &str {
        "ls"
    }

    fn usage(&self) -> &str {
        "ls [NAME][/PATH] - List source files of a database"
    }

    async fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        let vpath = state.resolve_source_path(args.first().map(String::as_str))?;

        let spinner = create_spinner("Reading archive...");
        let listing = state.archive_fs().read_directory(&vpath).await;
        spinner.finish_and_clear();

        let entries = listing?;
        let base = ZipRef::decode(&vpath)?;
        for entry in entries {
            if entry.is_dir {
                println!("{}/", entry.name.blue().bold());
            } else {
                let child = if base.entry.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", base.entry, entry.name)
                };
                let size = state
                    .archive_fs()
                    .stat(&ZipRef::new(&base.archive, child).encode())
                    .await
                    .map(|s| format_size(s.size, DECIMAL))
                    .unwrap_or_default();
                println!("{:<40} {}", entry.name, size.dimmed());
            }
        }
        Ok(())
    }
}
