use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::ui::create_spinner;

use super::{Command, ShellState};

pub struct CatCommand;

#[async_trait]
impl Command for CatCommand {
    fn name(&self) -> &str {
        "cat"
    }

    fn usage(&self) -> &str {
        "cat [NAME/]FILE - Display a source file from a database"
    }

    async fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        let arg = args
            .first()
            .ok_or_else(|| anyhow!("Usage: cat [NAME/]FILE"))?;
        let vpath = state.resolve_source_path(Some(arg))?;

        let spinner = create_spinner("Extracting file...");
        let read = state.archive_fs().read_file(&vpath).await;
        spinner.finish_and_clear();

        let bytes = read?;

        // Try to display as UTF-8 text
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => print!("{text}"),
            Err(_) => {
                eprintln!("Warning: File contains binary data");
                // Display first 1KB as hex
                let display_len = bytes.len().min(1024);
                for (i, byte) in bytes[..display_len].iter().enumerate() {
                    if i % 16 == 0 {
                        print!("\n{i:08x}: ");
                    }
                    print!("{byte:02x} ");
                }
                println!();
                if bytes.len() > 1024 {
                    eprintln!("... ({} more bytes)", bytes.len() - 1024);
                }
            }
        }
        Ok(())
    }
}
