use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::{Command, ShellState};

pub struct RemoveCommand;

#[async_trait]
impl Command for RemoveCommand {
    fn name(&self) -> &str {
        "remove"
    }

    fn usage(&self) -> &str {
        "remove NAME [--keep-files] - Unregister a database (deletes its storage unless --keep-files)"
    }

    async fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        let name = args
            .first()
            .ok_or_else(|| anyhow!("Usage: remove NAME [--keep-files]"))?;
        let keep_files = args.iter().any(|a| a == "--keep-files");

        let item = state
            .manager()
            .find_by_name(name)
            .ok_or_else(|| anyhow!("no database named '{name}'"))?
            .clone();

        // The registry never touches the disk; deleting the storage
        // directory is this command's decision
        let storage_root = state.storage_root_of(&item);
        state.manager_mut().remove_item(&item)?;
        if let Some(archive) = &item.source_archive {
            state.archive_fs().cache().invalidate(archive);
        }
        if !keep_files {
            tokio::fs::remove_dir_all(&storage_root).await.ok();
        }
        println!("Removed database '{}'", item.name);
        Ok(())
    }
}
