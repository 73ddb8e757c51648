use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::DatabaseItem;

/// Key under which the registry snapshot is persisted
pub const REGISTRY_STATE_KEY: &str = "databases";

/// External key-value persistence collaborator, scoped to the tool's own
/// storage. The registry writes its snapshot through this on every mutation.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> std::io::Result<()>;
}

/// Change notifications delivered synchronously to listeners, in
/// registration order.
#[derive(Debug, Clone)]
pub enum DatabaseEvent {
    Added(DatabaseItem),
    Removed(DatabaseItem),
    Renamed {
        item: DatabaseItem,
        previous_name: String,
    },
    CurrentChanged {
        previous: Option<DatabaseItem>,
        current: Option<DatabaseItem>,
    },
}

type Listener = Box<dyn Fn(&DatabaseEvent) + Send + Sync>;

/// Persisted snapshot: item identities plus which one is current
#[derive(Serialize, Deserialize, Default)]
struct PersistedState {
    databases: Vec<DatabaseItem>,
    current: Option<PathBuf>,
}

/// In-memory registry of known databases, persisted on every change.
///
/// Invariants: `current`, when set, refers to a registered, non-errored
/// item; insertion order of `items` is meaningful for listing.
pub struct DatabaseManager {
    store: Arc<dyn StateStore>,
    items: Vec<DatabaseItem>,
    /// Identity (database path) of the current item, if any
    current: Option<PathBuf>,
    listeners: Vec<(usize, Listener)>,
    next_listener_id: usize,
    /// Names claimed by in-flight imports; see [`DatabaseManager::reserve_name`]
    pending_names: Arc<Mutex<HashSet<String>>>,
}

impl DatabaseManager {
    /// Create an empty registry backed by `store`
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        DatabaseManager {
            store,
            items: Vec::new(),
            current: None,
            listeners: Vec::new(),
            next_listener_id: 0,
            pending_names: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Restore the registry from its persisted snapshot. Items whose
    /// directory no longer exists are marked errored, never dropped.
    pub async fn restore(store: Arc<dyn StateStore>) -> Self {
        let mut manager = Self::new(store);

        let Some(raw) = manager.store.get(REGISTRY_STATE_KEY) else {
            return manager;
        };
        let state: PersistedState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!("discarding unreadable registry snapshot: {e}");
                return manager;
            }
        };

        for mut item in state.databases {
            match tokio::fs::metadata(&item.database_path).await {
                Ok(m) if m.is_dir() => item.error = None,
                _ => {
                    debug!(name = %item.name, "database directory missing, marking errored");
                    item.error = Some(format!(
                        "database directory '{}' no longer exists",
                        item.database_path.display()
                    ));
                }
            }
            manager.items.push(item);
        }

        manager.current = state.current.filter(|identity| {
            manager
                .items
                .iter()
                .any(|i| &i.database_path == identity && !i.is_errored())
        });

        manager
    }

    pub fn items(&self) -> &[DatabaseItem] {
        &self.items
    }

    pub fn current_item(&self) -> Option<&DatabaseItem> {
        let identity = self.current.as_ref()?;
        self.items.iter().find(|i| &i.database_path == identity)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&DatabaseItem> {
        self.items.iter().find(|i| i.name == name)
    }

    /// Register an imported database. Duplicate on-disk identities are
    /// rejected; the caller resolves display-name collisions beforehand.
    pub fn add_item(&mut self, item: DatabaseItem) -> Result<()> {
        if self.items.iter().any(|i| i.database_path == item.database_path) {
            return Err(Error::AlreadyRegistered(
                item.database_path.display().to_string(),
            ));
        }
        debug!(name = %item.name, path = %item.database_path.display(), "registering database");
        self.items.push(item.clone());
        self.persist()?;
        self.notify(&DatabaseEvent::Added(item));
        Ok(())
    }

    /// Change the current database. `None` clears the selection.
    pub fn set_current(&mut self, item: Option<&DatabaseItem>) -> Result<()> {
        let new_identity = match item {
            Some(item) => {
                let registered = self
                    .items
                    .iter()
                    .find(|i| i.database_path == item.database_path)
                    .ok_or_else(|| {
                        Error::NotFound(format!("database '{}' is not registered", item.name))
                    })?;
                if registered.is_errored() {
                    return Err(Error::InvalidDatabase(format!(
                        "database '{}' is in an error state",
                        registered.name
                    )));
                }
                Some(registered.database_path.clone())
            }
            None => None,
        };

        let previous = self.current_item().cloned();
        self.current = new_identity;
        let current = self.current_item().cloned();
        self.persist()?;
        self.notify(&DatabaseEvent::CurrentChanged { previous, current });
        Ok(())
    }

    /// Remove an item from the registry. On-disk data is left alone; the
    /// caller decides whether to delete it.
    pub fn remove_item(&mut self, item: &DatabaseItem) -> Result<()> {
        let position = self
            .items
            .iter()
            .position(|i| i.database_path == item.database_path)
            .ok_or_else(|| {
                Error::NotFound(format!("database '{}' is not registered", item.name))
            })?;

        let removed = self.items.remove(position);
        let was_current = self.current.as_ref() == Some(&removed.database_path);
        if was_current {
            self.current = None;
        }
        self.persist()?;
        self.notify(&DatabaseEvent::Removed(removed.clone()));
        if was_current {
            self.notify(&DatabaseEvent::CurrentChanged {
                previous: Some(removed),
                current: None,
            });
        }
        Ok(())
    }

    /// Give an item a new display name. Unlike import-time allocation, an
    /// explicit rename does not auto-suffix; a taken name is rejected.
    pub fn rename_item(&mut self, item: &DatabaseItem, new_name: &str) -> Result<()> {
        if self
            .items
            .iter()
            .any(|i| i.name == new_name && i.database_path != item.database_path)
        {
            return Err(Error::AlreadyRegistered(new_name.to_string()));
        }
        let target = self
            .items
            .iter_mut()
            .find(|i| i.database_path == item.database_path)
            .ok_or_else(|| {
                Error::NotFound(format!("database '{}' is not registered", item.name))
            })?;

        let previous_name = std::mem::replace(&mut target.name, new_name.to_string());
        let renamed = target.clone();
        self.persist()?;
        self.notify(&DatabaseEvent::Renamed {
            item: renamed,
            previous_name,
        });
        Ok(())
    }

    /// Mark an item errored (post-import validation failure)
    pub fn set_error(&mut self, item: &DatabaseItem, message: &str) -> Result<()> {
        let was_current = self.current.as_ref() == Some(&item.database_path);
        let target = self
            .items
            .iter_mut()
            .find(|i| i.database_path == item.database_path)
            .ok_or_else(|| {
                Error::NotFound(format!("database '{}' is not registered", item.name))
            })?;
        target.error = Some(message.to_string());
        if was_current {
            self.current = None;
        }
        self.persist()?;
        Ok(())
    }

    /// Register a listener; returns a handle for [`Self::unsubscribe`]
    pub fn subscribe(&mut self, listener: impl Fn(&DatabaseEvent) + Send + Sync + 'static) -> usize {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, handle: usize) {
        self.listeners.retain(|(id, _)| *id != handle);
    }

    /// Claim the first free storage name derived from `base`: `base`,
    /// `base_2`, `base_3`, ... checked against registered items, other
    /// in-flight reservations, and directories already present in `storage`.
    /// The claim is released when the returned guard drops, so a failed
    /// import frees its name.
    pub fn reserve_name(&self, storage: &Path, base: &str) -> NameReservation {
        let base = if base.is_empty() { "database" } else { base };
        let mut pending = self
            .pending_names
            .lock()
            .expect("name reservation lock poisoned");

        let mut candidate = base.to_string();
        let mut suffix = 1;
        while self.items.iter().any(|i| i.name == candidate)
            || pending.contains(&candidate)
            || storage.join(&candidate).exists()
        {
            suffix += 1;
            candidate = format!("{base}_{suffix}");
        }
        pending.insert(candidate.clone());

        NameReservation {
            name: candidate,
            pending: Arc::clone(&self.pending_names),
        }
    }

    fn persist(&self) -> Result<()> {
        let state = PersistedState {
            databases: self.items.clone(),
            current: self.current.clone(),
        };
        let serialized = serde_json::to_string(&state)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        self.store.set(REGISTRY_STATE_KEY, &serialized)?;
        Ok(())
    }

    fn notify(&self, event: &DatabaseEvent) {
        for (_, listener) in &self.listeners {
            listener(event);
        }
    }
}

/// A claimed storage name. Dropping the guard releases the claim.
pub struct NameReservation {
    name: String,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl NameReservation {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameReservation {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// In-memory store for registry tests
    #[derive(Default)]
    struct MemoryStore {
        map: StdMutex<std::collections::HashMap<String, String>>,
    }

    impl StateStore for MemoryStore {
        fn get(&self, key: &str) -> Option<String> {
            self.map.lock().unwrap().get(key).cloned()
        }

        fn set(&self, key: &str, value: &str) -> std::io::Result<()> {
            self.map.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    fn item(name: &str) -> DatabaseItem {
        DatabaseItem {
            name: name.to_string(),
            database_path: PathBuf::from(format!("/stores/{name}")),
            source_archive: None,
            error: None,
        }
    }

    fn manager() -> DatabaseManager {
        DatabaseManager::new(Arc::new(MemoryStore::default()))
    }

    #[test]
    fn add_rejects_duplicate_identity() {
        let mut m = manager();
        m.add_item(item("a")).unwrap();
        let duplicate = DatabaseItem {
            name: "other".into(),
            ..item("a")
        };
        assert!(matches!(
            m.add_item(duplicate),
            Err(Error::AlreadyRegistered(_))
        ));
        assert_eq!(m.items().len(), 1);
    }

    #[test]
    fn removing_current_clears_current() {
        let mut m = manager();
        let first = item("first");
        let second = item("second");
        m.add_item(first.clone()).unwrap();
        m.add_item(second.clone()).unwrap();
        m.set_current(Some(&first)).unwrap();

        m.remove_item(&first).unwrap();
        assert!(m.current_item().is_none());
        assert_eq!(m.items().len(), 1);
        assert_eq!(m.items()[0].name, "second");
    }

    #[test]
    fn set_current_rejects_unregistered_and_errored() {
        let mut m = manager();
        let stranger = item("stranger");
        assert!(m.set_current(Some(&stranger)).is_err());

        let mut broken = item("broken");
        broken.error = Some("gone".into());
        m.add_item(broken.clone()).unwrap();
        assert!(matches!(
            m.set_current(Some(&broken)),
            Err(Error::InvalidDatabase(_))
        ));
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let mut m = manager();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let first = Arc::clone(&order);
        m.subscribe(move |_| first.lock().unwrap().push(1));
        let second = Arc::clone(&order);
        m.subscribe(move |_| second.lock().unwrap().push(2));

        m.add_item(item("a")).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut m = manager();
        let count = Arc::new(StdMutex::new(0));
        let captured = Arc::clone(&count);
        let handle = m.subscribe(move |_| *captured.lock().unwrap() += 1);

        m.add_item(item("a")).unwrap();
        m.unsubscribe(handle);
        m.add_item(item("b")).unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn name_reservation_disambiguates_and_releases() {
        let mut m = manager();
        m.add_item(item("mydb")).unwrap();
        let tmp = tempfile::tempdir().unwrap();

        let first = m.reserve_name(tmp.path(), "mydb");
        assert_eq!(first.name(), "mydb_2");
        let second = m.reserve_name(tmp.path(), "mydb");
        assert_eq!(second.name(), "mydb_3");

        drop(second);
        let third = m.reserve_name(tmp.path(), "mydb");
        assert_eq!(third.name(), "mydb_3");
    }

    #[test]
    fn reservation_respects_existing_storage_dirs() {
        let m = manager();
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("snapshot")).unwrap();

        let reserved = m.reserve_name(tmp.path(), "snapshot");
        assert_eq!(reserved.name(), "snapshot_2");
    }

    #[test]
    fn rename_rejects_taken_name() {
        let mut m = manager();
        m.add_item(item("a")).unwrap();
        m.add_item(item("b")).unwrap();
        let b = m.find_by_name("b").unwrap().clone();
        assert!(matches!(
            m.rename_item(&b, "a"),
            Err(Error::AlreadyRegistered(_))
        ));
        m.rename_item(&b, "c").unwrap();
        assert!(m.find_by_name("c").is_some());
    }
}
