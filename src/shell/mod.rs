pub mod commands;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use colored::Colorize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cache::ArchiveCache;
use crate::database::{
    DatabaseFetcher, DatabaseManager, HttpDownloader, Notifier, StateStore, UserPrompt,
};
use crate::database::fetcher::Downloader;
use crate::vfs::{ArchiveFs, ZipRef};
use commands::Command;

/// File holding the persisted workspace state, kept at the storage root
const STATE_FILE: &str = "workspace-state.json";

/// Key-value store persisted as a JSON file next to the managed databases
pub struct FileStateStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileStateStore {
    pub fn open(storage_path: &Path) -> std::io::Result<Self> {
        let path = storage_path.join(STATE_FILE);
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };
        Ok(FileStateStore {
            path,
            values: Mutex::new(values),
        })
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> std::io::Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| std::io::Error::other("state store lock poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(&*values)?;
        std::fs::write(&self.path, serialized)
    }
}

/// Prompt collaborator reading answers from the terminal
pub struct StdinPrompt;

#[async_trait]
impl UserPrompt for StdinPrompt {
    async fn ask_for_input(&self, prompt: &str) -> Option<String> {
        let prompt = format!("{prompt}: ");
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            print!("{prompt}");
            std::io::stdout().flush().ok()?;
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).ok()?;
            let line = line.trim();
            if line.is_empty() {
                None
            } else {
                Some(line.to_string())
            }
        })
        .await
        .ok()
        .flatten()
    }

    async fn choose_folder(&self) -> Option<PathBuf> {
        self.ask_for_input("Path of the database folder")
            .await
            .map(PathBuf::from)
    }
}

/// Notification collaborator printing to the terminal
pub struct TermNotifier;

impl Notifier for TermNotifier {
    fn report_error(&self, message: &str) {
        eprintln!("{} {message}", "Error:".red().bold());
    }

    fn report_info(&self, message: &str) {
        println!("{message}");
    }
}

/// Shell state - owns the registry, import pipeline, and archive filesystem,
/// and dispatches registered commands
pub struct ShellState {
    manager: DatabaseManager,
    fetcher: DatabaseFetcher,
    archive_fs: ArchiveFs,
    storage_path: PathBuf,
    downloader: Arc<dyn Downloader>,
    notifier: Arc<dyn Notifier>,
    commands: HashMap<String, Arc<dyn Command>>,
}

impl ShellState {
    pub fn new(storage_path: PathBuf, manager: DatabaseManager) -> Self {
        let downloader: Arc<dyn Downloader> = Arc::new(HttpDownloader::new());
        let notifier: Arc<dyn Notifier> = Arc::new(TermNotifier);
        let fetcher = DatabaseFetcher::new(
            storage_path.clone(),
            Arc::new(StdinPrompt),
            Arc::clone(&downloader),
            Arc::clone(&notifier),
        );
        let cache = ArchiveCache::default();

        let mut state = ShellState {
            manager,
            fetcher,
            archive_fs: ArchiveFs::new(cache),
            storage_path,
            downloader,
            notifier,
            commands: HashMap::new(),
        };

        state.register_command(Arc::new(commands::list::ListCommand));
        state.register_command(Arc::new(commands::import::ImportCommand));
        state.register_command(Arc::new(commands::select::SelectCommand));
        state.register_command(Arc::new(commands::remove::RemoveCommand));
        state.register_command(Arc::new(commands::rename::RenameCommand));
        state.register_command(Arc::new(commands::ls::LsCommand));
        state.register_command(Arc::new(commands::cat::CatCommand));

        state
    }

    fn register_command(&mut self, command: Arc<dyn Command>) {
        self.commands.insert(command.name().to_string(), command);
    }

    pub fn manager(&self) -> &DatabaseManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut DatabaseManager {
        &mut self.manager
    }

    pub fn archive_fs(&self) -> &ArchiveFs {
        &self.archive_fs
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// The managed-storage directory holding an item, i.e. the unit a
    /// removal deletes. For archive imports the database directory itself
    /// sits one level below this root.
    pub fn storage_root_of(&self, item: &crate::database::DatabaseItem) -> PathBuf {
        match item.database_path.strip_prefix(&self.storage_path) {
            Ok(relative) => match relative.components().next() {
                Some(first) => self.storage_path.join(first),
                None => item.database_path.clone(),
            },
            Err(_) => item.database_path.clone(),
        }
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Split borrow for commands that drive an import against the registry
    pub fn import_parts(&mut self) -> (&DatabaseFetcher, &mut DatabaseManager) {
        let ShellState {
            fetcher, manager, ..
        } = self;
        (fetcher, manager)
    }

    /// Build a fetcher with a different prompt collaborator (e.g. an answer
    /// the user already typed as a command argument)
    pub fn fetcher_with_prompt(&self, prompt: Arc<dyn UserPrompt>) -> DatabaseFetcher {
        DatabaseFetcher::new(
            self.storage_path.clone(),
            prompt,
            Arc::clone(&self.downloader),
            Arc::clone(&self.notifier),
        )
    }

    /// Resolve a command argument to an encoded virtual path inside a
    /// database's source archive. Forms: nothing (current database root),
    /// `<db-name>[/entry/path]`, a raw `zip-archive://` path, or an entry
    /// path relative to the current database.
    pub fn resolve_source_path(&self, arg: Option<&str>) -> Result<String> {
        if let Some(raw) = arg {
            if raw.starts_with(crate::vfs::path::SCHEME) {
                return Ok(raw.to_string());
            }
        }

        let (item, entry) = match arg {
            None | Some("") => (self.current_database()?, String::new()),
            Some(raw) => {
                let (first, rest) = match raw.split_once('/') {
                    Some((first, rest)) => (first, rest.to_string()),
                    None => (raw, String::new()),
                };
                match self.manager.find_by_name(first) {
                    Some(item) => (item, rest),
                    None => (self.current_database()?, raw.to_string()),
                }
            }
        };

        let archive = item
            .source_archive
            .as_ref()
            .ok_or_else(|| anyhow!("database '{}' has no source archive", item.name))?;
        Ok(ZipRef::new(archive, entry).encode())
    }

    fn current_database(&self) -> Result<&crate::database::DatabaseItem> {
        self.manager
            .current_item()
            .ok_or_else(|| anyhow!("no database selected (use 'select <name>')"))
    }

    /// Execute a command line
    pub async fn execute(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let mut parts = line.split_whitespace().map(String::from);
        let name = match parts.next() {
            Some(name) => name,
            None => return Ok(()),
        };
        let args: Vec<String> = parts.collect();

        match name.as_str() {
            "exit" | "quit" => Err(anyhow!("exit")),
            "help" => {
                self.print_help();
                Ok(())
            }
            other => match self.commands.get(other).cloned() {
                Some(command) => command.execute(self, &args).await,
                None => Err(anyhow!("unknown command: {other} (try 'help')")),
            },
        }
    }

    fn print_help(&self) {
        let mut usages: Vec<&str> = self.commands.values().map(|c| c.usage()).collect();
        usages.sort();
        println!("Available commands:");
        for usage in usages {
            println!("  {usage}");
        }
        println!("  help - Show this help");
        println!("  exit - Quit the shell");
    }

    /// Prompt string for the REPL: the current database, if any
    pub fn prompt(&self) -> String {
        match self.manager.current_item() {
            Some(item) => format!("{}> ", item.name.cyan()),
            None => "dbsh> ".to_string(),
        }
    }
}
