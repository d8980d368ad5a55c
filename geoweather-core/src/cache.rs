use anyhow::anyhow;
use directories::ProjectDirs;
use std::{
    collections::HashMap,
    fmt::Debug,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::{debug, info, warn};

use crate::model::WeatherResponse;

/// Storage key of the last successful payload.
pub const WEATHER_RESPONSE_DATA: &str = "weather_response_data";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store file {0} is not a valid key-value document")]
    Corrupt(PathBuf),
    #[error("store lock poisoned")]
    Poisoned,
}

/// String key-value persistence shared by the cache and its owner.
pub trait KeyValueStore: Send + Sync + Debug {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Key-value pairs kept as one JSON object on disk.
///
/// Writes go through a sibling temp file and a rename, so readers see either
/// the old document or the new one.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn default_path() -> anyhow::Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "geoweather", "geoweather")
            .ok_or_else(|| anyhow!("Could not determine platform data directory"))?;

        Ok(dirs.data_dir().join("store.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io { path: self.path.clone(), source }
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(self.io_err(e)),
        };
        serde_json::from_str(&contents).map_err(|_| StoreError::Corrupt(self.path.clone()))
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| self.io_err(std::io::Error::other(e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }

    fn modify(&self, f: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut entries = match self.read_all() {
            Ok(entries) => entries,
            Err(StoreError::Corrupt(path)) => {
                warn!("Replacing unreadable store file {}", path.display());
                HashMap::new()
            }
            Err(e) => return Err(e),
        };
        f(&mut entries);
        self.write_all(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.modify(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.modify(|entries| {
            entries.remove(key);
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to serialize weather payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Holds the most recent successful payload under [`WEATHER_RESPONSE_DATA`].
#[derive(Debug, Clone)]
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Replace the cached payload. The old value is removed first so nothing
    /// from an earlier schema survives next to the new one.
    pub fn save(&self, payload: &WeatherResponse) -> Result<(), CacheError> {
        let json = serde_json::to_string(payload)?;
        self.store.remove(WEATHER_RESPONSE_DATA)?;
        self.store.put(WEATHER_RESPONSE_DATA, &json)?;
        info!(location = %payload.name, "Cached weather payload");
        Ok(())
    }

    /// The cached payload, or `None` when there is nothing usable stored.
    pub fn load(&self) -> Option<WeatherResponse> {
        let raw = match self.store.get(WEATHER_RESPONSE_DATA) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => {
                debug!("No cached weather payload");
                return None;
            }
            Err(e) => {
                warn!("Cannot read cached weather payload: {e}");
                return None;
            }
        };

        let payload: WeatherResponse = match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(e) => {
                warn!("Ignoring unparsable cached weather payload: {e}");
                return None;
            }
        };

        if let Err(e) = payload.validate() {
            warn!("Ignoring invalid cached weather payload: {e}");
            return None;
        }
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::london;

    fn memory_cache() -> (Arc<MemoryStore>, ResponseCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::new(store.clone());
        (store, cache)
    }

    #[test]
    fn save_then_load_returns_equal_payload() {
        let (_, cache) = memory_cache();
        let payload = london();

        cache.save(&payload).expect("save");
        assert_eq!(cache.load(), Some(payload));
    }

    #[test]
    fn save_replaces_previous_payload() {
        let (_, cache) = memory_cache();
        let first = london();
        let mut second = london();
        second.name = "Paris".into();
        second.sys.country = "FR".into();

        cache.save(&first).expect("save first");
        cache.save(&second).expect("save second");
        assert_eq!(cache.load(), Some(second));
    }

    #[test]
    fn empty_store_loads_nothing() {
        let (_, cache) = memory_cache();
        assert_eq!(cache.load(), None);
    }

    #[test]
    fn corrupted_value_loads_nothing() {
        let (store, cache) = memory_cache();
        store.put(WEATHER_RESPONSE_DATA, "{\"main\": garbage").expect("put");
        assert_eq!(cache.load(), None);

        store.put(WEATHER_RESPONSE_DATA, "").expect("put");
        assert_eq!(cache.load(), None);
    }

    #[test]
    fn invalid_payload_loads_nothing() {
        let (store, cache) = memory_cache();
        let mut payload = london();
        payload.weather = Some(Vec::new());
        store
            .put(WEATHER_RESPONSE_DATA, &serde_json::to_string(&payload).expect("json"))
            .expect("put");
        assert_eq!(cache.load(), None);
    }

    #[test]
    fn file_store_round_trip_across_instances() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("nested").join("store.json");

        let cache = ResponseCache::new(Arc::new(FileStore::new(&path)));
        cache.save(&london()).expect("save");

        let reopened = ResponseCache::new(Arc::new(FileStore::new(&path)));
        assert_eq!(reopened.load(), Some(london()));
    }

    #[test]
    fn file_store_missing_file_is_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(tmp.path().join("store.json"));
        assert_eq!(store.get("anything").expect("get"), None);
    }

    #[test]
    fn file_store_corrupt_file_degrades_to_no_cache_and_recovers() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("store.json");
        fs::write(&path, b"\x00\x01 not json").expect("write garbage");

        let store = Arc::new(FileStore::new(&path));
        assert!(matches!(store.get(WEATHER_RESPONSE_DATA), Err(StoreError::Corrupt(_))));

        let cache = ResponseCache::new(store);
        assert_eq!(cache.load(), None);

        cache.save(&london()).expect("save over corrupt file");
        assert_eq!(cache.load(), Some(london()));
    }

    #[test]
    fn file_store_remove_keeps_other_keys() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(tmp.path().join("store.json"));
        store.put("a", "1").expect("put a");
        store.put("b", "2").expect("put b");
        store.remove("a").expect("remove");

        assert_eq!(store.get("a").expect("get a"), None);
        assert_eq!(store.get("b").expect("get b"), Some("2".to_string()));
    }
}
