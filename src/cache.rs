use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};

const PREFIX: &str = "bug_tracker_";
const DEFAULT_TTL: i64 = 3600;

#[derive(Debug, Serialize, serde::Deserialize)]
struct Entry {
    value: Value,
    expiry: i64,
}

/// File-backed TTL key/value cache: one file per key under `dir`, named
/// by a fixed prefix plus the SHA-256 of the key, holding the JSON value
/// and its expiry timestamp. Expired entries are unlinked on read.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
    default_ttl: i64,
}

impl FileCache {
    pub fn new(dir: impl AsRef<Path>) -> io::Result<FileCache> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FileCache {
            dir,
            default_ttl: DEFAULT_TTL,
        })
    }

    pub fn set_default_ttl(&mut self, ttl: i64) {
        self.default_ttl = ttl;
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<i64>) -> io::Result<()> {
        let entry = Entry {
            value: serde_json::to_value(value).map_err(io::Error::other)?,
            expiry: chrono::Utc::now().timestamp() + ttl.unwrap_or(self.default_ttl),
        };
        let body = serde_json::to_vec(&entry).map_err(io::Error::other)?;
        fs::write(self.filename(key), body)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.filename(key);
        let body = fs::read(&path).ok()?;
        let entry: Entry = serde_json::from_slice(&body).ok()?;
        if entry.expiry < chrono::Utc::now().timestamp() {
            let _ = fs::remove_file(&path);
            return None;
        }
        serde_json::from_value(entry.value).ok()
    }

    pub fn delete(&self, key: &str) -> bool {
        fs::remove_file(self.filename(key)).is_ok()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get::<Value>(key).is_some()
    }

    /// Removes every cache file carrying our prefix; other files in the
    /// directory are left alone.
    pub fn clear(&self) -> io::Result<()> {
        for dir_entry in fs::read_dir(&self.dir)? {
            let dir_entry = dir_entry?;
            if dir_entry
                .file_name()
                .to_string_lossy()
                .starts_with(PREFIX)
            {
                fs::remove_file(dir_entry.path())?;
            }
        }
        Ok(())
    }

    /// Adds `step` to an existing numeric entry. Misses return `None`,
    /// matching the original semantics of refusing to increment absent keys.
    pub fn increment(&self, key: &str, step: i64) -> Option<i64> {
        let value: i64 = self.get(key)?;
        let value = value + step;
        self.set(key, &value, None).ok()?;
        Some(value)
    }

    pub fn decrement(&self, key: &str, step: i64) -> Option<i64> {
        self.increment(key, -step)
    }

    pub fn set_multiple<T: Serialize>(
        &self,
        values: &HashMap<String, T>,
        ttl: Option<i64>,
    ) -> io::Result<()> {
        for (key, value) in values {
            self.set(key, value, ttl)?;
        }
        Ok(())
    }

    pub fn get_multiple(&self, keys: &[&str]) -> HashMap<String, Option<Value>> {
        keys.iter()
            .map(|key| ((*key).to_string(), self.get(key)))
            .collect()
    }

    pub fn delete_multiple(&self, keys: &[&str]) -> bool {
        keys.iter().fold(true, |ok, key| self.delete(key) && ok)
    }

    fn filename(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{PREFIX}{digest:x}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, FileCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        (dir, cache)
    }

    #[test]
    fn set_get_delete() {
        let (_dir, cache) = cache();
        cache.set("greeting", &"hello", None).unwrap();
        assert_eq!(cache.get::<String>("greeting").unwrap(), "hello");
        assert!(cache.exists("greeting"));

        assert!(cache.delete("greeting"));
        assert!(cache.get::<String>("greeting").is_none());
        assert!(!cache.delete("greeting"));
    }

    #[test]
    fn expired_entries_miss_and_unlink() {
        let (_dir, cache) = cache();
        cache.set("stale", &42i64, Some(-1)).unwrap();
        assert!(cache.get::<i64>("stale").is_none());
        // The file itself is gone, not just filtered.
        assert!(!cache.filename("stale").exists());
    }

    #[test]
    fn increment_and_decrement() {
        let (_dir, cache) = cache();
        assert!(cache.increment("counter", 1).is_none());

        cache.set("counter", &10i64, None).unwrap();
        assert_eq!(cache.increment("counter", 5), Some(15));
        assert_eq!(cache.decrement("counter", 3), Some(12));
        assert_eq!(cache.get::<i64>("counter"), Some(12));
    }

    #[test]
    fn multiple_ops() {
        let (_dir, cache) = cache();
        let mut values = HashMap::new();
        values.insert("a".to_string(), 1i64);
        values.insert("b".to_string(), 2i64);
        cache.set_multiple(&values, None).unwrap();

        let fetched = cache.get_multiple(&["a", "b", "missing"]);
        assert_eq!(fetched["a"], Some(Value::from(1)));
        assert_eq!(fetched["b"], Some(Value::from(2)));
        assert_eq!(fetched["missing"], None);

        assert!(!cache.delete_multiple(&["a", "b", "missing"]));
        assert!(cache.get::<i64>("a").is_none());
    }

    #[test]
    fn clear_only_touches_prefixed_files() {
        let (dir, cache) = cache();
        cache.set("one", &1i64, None).unwrap();
        cache.set("two", &2i64, None).unwrap();
        let other = dir.path().join("unrelated.txt");
        fs::write(&other, b"keep me").unwrap();

        cache.clear().unwrap();
        assert!(cache.get::<i64>("one").is_none());
        assert!(cache.get::<i64>("two").is_none());
        assert!(other.exists());
    }

    #[test]
    fn structs_round_trip() {
        #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Point {
            x: i64,
            y: i64,
        }
        let (_dir, cache) = cache();
        cache.set("point", &Point { x: 3, y: 4 }, None).unwrap();
        assert_eq!(cache.get::<Point>("point").unwrap(), Point { x: 3, y: 4 });
    }
}
