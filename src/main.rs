use clap::Parser;
use colored::Colorize;
use dbsh::database::DatabaseManager;
use dbsh::shell::{FileStateStore, ShellState};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Manage analysis databases and browse their source archives
#[derive(Parser)]
#[command(name = "dbsh", version, about)]
struct Args {
    /// Directory holding imported databases (default: ~/.dbsh/databases)
    #[arg(long)]
    storage: Option<PathBuf>,
}

fn default_storage() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dbsh")
        .join("databases")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let storage_path = args.storage.unwrap_or_else(default_storage);

    println!("{}", "=".repeat(60).cyan());
    println!("{}", "  dbsh - The database shell".bold().cyan());
    println!("{}", "  Import analysis databases and browse their sources".cyan());
    println!("{}", "=".repeat(60).cyan());
    println!();
    println!("Type 'help' for available commands or 'exit' to quit");
    println!();

    let store = match FileStateStore::open(&storage_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!(
                "{} Failed to open workspace state in {}: {e}",
                "Error:".red().bold(),
                storage_path.display()
            );
            std::process::exit(1);
        }
    };

    let manager = DatabaseManager::restore(store).await;
    let mut state = ShellState::new(storage_path, manager);

    let mut rl = DefaultEditor::new()?;

    // Load history if available
    let history_file = dirs::home_dir().map(|mut p| {
        p.push(".dbsh_history");
        p
    });

    if let Some(path) = &history_file {
        let _ = rl.load_history(path);
    }

    // REPL loop
    loop {
        let prompt = state.prompt();

        match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());

                match state.execute(&line).await {
                    Ok(_) => {}
                    Err(e) => {
                        if e.to_string() == "exit" {
                            break;
                        }
                        eprintln!("{} {}", "Error:".red().bold(), e);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl-D
                println!("exit");
                break;
            }
            Err(err) => {
                eprintln!("{} {:?}", "Error:".red().bold(), err);
                break;
            }
        }
    }

    // Save history
    if let Some(path) = &history_file {
        let _ = rl.save_history(path);
    }

    println!("Goodbye!");
    Ok(())
}
