//! Local persistence of single-session chat history.
//!
//! Persistence is an optimization, never a correctness requirement: every
//! storage failure is swallowed.  Writes become no-ops and reads come back
//! empty, but [`LoadStatus`] still tells the caller why.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::observability::{
    PERSISTENCE_CORRUPT_PAYLOADS, PERSISTENCE_READ_FAILURES, PERSISTENCE_WRITE_FAILURES,
};
use crate::types::{Message, MessageRole};

/// Key under which the serialized history lives.
pub const HISTORY_KEY: &str = "AIChat_history_v1";

/// Key under which the deep-think flag lives.
pub const DEEP_THINK_KEY: &str = "AIChat_deepthink_v1";

/// A string-keyed durable store.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> io::Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> io::Result<()>;

    /// Removes `key`.  Removing a missing key is not an error.
    fn remove(&self, key: &str) -> io::Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        (**self).remove(key)
    }
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `dir`.  The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding the key files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            || key.starts_with('.')
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid storage key: {key:?}"),
            ));
        }
        Ok(self.dir.join(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!(".{key}.tmp"));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// An in-process store.
///
/// `set_available(false)` makes every operation fail, which is how a disabled
/// or full storage backend looks to the caller.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    available: Mutex<bool>,
}

impl MemoryStore {
    /// Creates an empty, available store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: Mutex::new(true),
        }
    }

    /// Makes the store available or unavailable.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut guard) = self.available.lock() {
            *guard = available;
        }
    }

    fn check(&self) -> io::Result<()> {
        match self.available.lock() {
            Ok(guard) if *guard => Ok(()),
            _ => Err(io::Error::other("storage unavailable")),
        }
    }

    fn entries(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| io::Error::other("storage poisoned"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        self.check()?;
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.check()?;
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.check()?;
        self.entries()?.remove(key);
        Ok(())
    }
}

/// Why a load produced what it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// A well-formed history was found (possibly empty).
    Loaded,
    /// Nothing has been stored yet.
    Absent,
    /// Something was stored but it is not a valid history.
    Corrupt,
    /// The storage backend could not be read.
    Unavailable,
}

/// The result of [`HistoryStore::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedHistory {
    /// The messages; always empty unless `status` is `Loaded`.
    pub messages: Vec<Message>,
    /// Why `messages` looks the way it does.
    pub status: LoadStatus,
}

impl LoadedHistory {
    fn empty(status: LoadStatus) -> Self {
        Self {
            messages: Vec::new(),
            status,
        }
    }
}

/// Best-effort persistence of a single conversation and its deep-think flag.
pub struct HistoryStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> HistoryStore<S> {
    /// Wraps a key-value store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Saves the history.  Failures are counted and otherwise ignored.
    pub fn save(&self, history: &[Message]) {
        let Ok(payload) = serde_json::to_string(history) else {
            PERSISTENCE_WRITE_FAILURES.click();
            return;
        };
        if self.store.set(HISTORY_KEY, &payload).is_err() {
            PERSISTENCE_WRITE_FAILURES.click();
        }
    }

    /// Loads the history.
    ///
    /// Only a JSON array whose every element is an object with a `user` or
    /// `assistant` role and string content is accepted.  Anything else yields
    /// an empty history; there is no partial recovery.
    pub fn load(&self) -> LoadedHistory {
        let payload = match self.store.get(HISTORY_KEY) {
            Ok(Some(payload)) => payload,
            Ok(None) => return LoadedHistory::empty(LoadStatus::Absent),
            Err(_) => {
                PERSISTENCE_READ_FAILURES.click();
                return LoadedHistory::empty(LoadStatus::Unavailable);
            }
        };
        if payload.is_empty() {
            return LoadedHistory::empty(LoadStatus::Absent);
        }
        match parse_history(&payload) {
            Some(messages) => LoadedHistory {
                messages,
                status: LoadStatus::Loaded,
            },
            None => {
                PERSISTENCE_CORRUPT_PAYLOADS.click();
                LoadedHistory::empty(LoadStatus::Corrupt)
            }
        }
    }

    /// Removes the stored history.
    pub fn clear(&self) {
        if self.store.remove(HISTORY_KEY).is_err() {
            PERSISTENCE_WRITE_FAILURES.click();
        }
    }

    /// Saves the deep-think flag as `"1"` or `"0"`.
    pub fn save_flag(&self, deep_think: bool) {
        let value = if deep_think { "1" } else { "0" };
        if self.store.set(DEEP_THINK_KEY, value).is_err() {
            PERSISTENCE_WRITE_FAILURES.click();
        }
    }

    /// Loads the deep-think flag.  Only an exact `"1"` reads as enabled.
    pub fn load_flag(&self) -> bool {
        match self.store.get(DEEP_THINK_KEY) {
            Ok(value) => value.as_deref() == Some("1"),
            Err(_) => {
                PERSISTENCE_READ_FAILURES.click();
                false
            }
        }
    }
}

fn parse_history(payload: &str) -> Option<Vec<Message>> {
    let Value::Array(items) = serde_json::from_str::<Value>(payload).ok()? else {
        return None;
    };
    items.into_iter().map(parse_message).collect()
}

fn parse_message(item: Value) -> Option<Message> {
    let Value::Object(mut fields) = item else {
        return None;
    };
    let role = match fields.get("role")?.as_str()? {
        "user" => MessageRole::User,
        "assistant" => MessageRole::Assistant,
        _ => return None,
    };
    let Value::String(content) = fields.remove("content")? else {
        return None;
    };
    Some(Message { role, content })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<Message> {
        vec![
            Message::user("hello"),
            Message::assistant("Hi there"),
            Message::user("多字节 ✓"),
        ]
    }

    #[test]
    fn round_trip() {
        let store = HistoryStore::new(MemoryStore::new());
        store.save(&history());
        let loaded = store.load();
        assert_eq!(loaded.status, LoadStatus::Loaded);
        assert_eq!(loaded.messages, history());

        store.save(&[]);
        let loaded = store.load();
        assert_eq!(loaded.status, LoadStatus::Loaded);
        assert!(loaded.messages.is_empty());
    }

    #[test]
    fn missing_is_absent() {
        let store = HistoryStore::new(MemoryStore::new());
        assert_eq!(store.load(), LoadedHistory::empty(LoadStatus::Absent));
    }

    #[test]
    fn corrupt_payloads_are_discarded_whole() {
        let store = HistoryStore::new(MemoryStore::new());
        for payload in [
            "not json",
            "{\"role\": \"user\", \"content\": \"x\"}",
            "[{\"role\": \"user\", \"content\": \"ok\"}, {\"role\": \"system\", \"content\": \"x\"}]",
            "[{\"role\": \"user\", \"content\": 7}]",
            "[{\"role\": \"user\"}]",
            "[null]",
            "[\"hello\"]",
        ] {
            store.store().set(HISTORY_KEY, payload).unwrap();
            let loaded = store.load();
            assert_eq!(loaded.status, LoadStatus::Corrupt, "payload: {payload}");
            assert!(loaded.messages.is_empty(), "payload: {payload}");
        }
    }

    #[test]
    fn extra_fields_are_tolerated() {
        let store = HistoryStore::new(MemoryStore::new());
        store
            .store()
            .set(
                HISTORY_KEY,
                "[{\"role\": \"assistant\", \"content\": \"hi\", \"ts\": 1}]",
            )
            .unwrap();
        assert_eq!(store.load().messages, vec![Message::assistant("hi")]);
    }

    #[test]
    fn unavailable_storage_is_silent() {
        let store = HistoryStore::new(MemoryStore::new());
        store.save(&history());
        store.save_flag(true);
        store.store().set_available(false);

        store.save(&[Message::user("lost")]);
        store.save_flag(false);
        store.clear();
        assert_eq!(store.load(), LoadedHistory::empty(LoadStatus::Unavailable));
        assert!(!store.load_flag());

        store.store().set_available(true);
        assert_eq!(store.load().messages, history());
        assert!(store.load_flag());
    }

    #[test]
    fn flag_encoding() {
        let store = HistoryStore::new(MemoryStore::new());
        assert!(!store.load_flag());
        store.save_flag(true);
        assert_eq!(store.store().get(DEEP_THINK_KEY).unwrap().as_deref(), Some("1"));
        assert!(store.load_flag());
        store.save_flag(false);
        assert_eq!(store.store().get(DEEP_THINK_KEY).unwrap().as_deref(), Some("0"));
        assert!(!store.load_flag());
        store.store().set(DEEP_THINK_KEY, "true").unwrap();
        assert!(!store.load_flag());
    }

    #[test]
    fn file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("deepchat-store-{}", std::process::id()));
        let store = HistoryStore::new(FileStore::new(&dir));
        assert_eq!(store.load().status, LoadStatus::Absent);
        store.save(&history());
        store.save_flag(true);
        let reopened = HistoryStore::new(FileStore::new(&dir));
        assert_eq!(reopened.load().messages, history());
        assert!(reopened.load_flag());
        reopened.clear();
        assert_eq!(reopened.load().status, LoadStatus::Absent);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_store_rejects_path_keys() {
        let store = FileStore::new(std::env::temp_dir());
        assert!(store.get("../etc/passwd").is_err());
        assert!(store.set(".hidden", "x").is_err());
    }
}
