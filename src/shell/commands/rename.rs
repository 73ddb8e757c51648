use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::{Command, ShellState};

pub struct RenameCommand;

#[async_trait]
impl Command for RenameCommand {
    fn name(&self) -> &str {
        "rename"
    }

    fn usage(&self) -> &str {
        "rename NAME NEW_NAME - Change a database's display name"
    }

    async fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        let (name, new_name) = match args {
            [name, new_name] => (name, new_name),
            _ => return Err(anyhow!("Usage: rename NAME NEW_NAME")),
        };

        let item = state
            .manager()
            .find_by_name(name)
            .ok_or_else(|| anyhow!("no database named '{name}'"))?
            .clone();
        state.manager_mut().rename_item(&item, new_name)?;
        println!("Renamed '{name}' to '{new_name}'");
        Ok(())
    }
}
