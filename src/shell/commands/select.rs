use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::{Command, ShellState};

pub struct SelectCommand;

#[async_trait]
impl Command for SelectCommand {
    fn name(&self) -> &str {
        "select"
    }

    fn usage(&self) -> &str {
        "select NAME - Make a database current ('select none' to clear)"
    }

    async fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        let name = args
            .first()
            .ok_or_else(|| anyhow!("Usage: select NAME"))?;

        let manager = state.manager_mut();
        if name == "none" {
            manager.set_current(None)?;
            return Ok(());
        }

        let item = manager
            .find_by_name(name)
            .ok_or_else(|| anyhow!("no database named '{name}'"))?
            .clone();
        manager.set_current(Some(&item))?;
        println!("Current database: {}", item.name);
        Ok(())
    }
}
