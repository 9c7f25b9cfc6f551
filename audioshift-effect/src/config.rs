//! Configuration surface for the effect
//!
//! A small string key/value store read at initialize and by the control
//! loop, and written with telemetry. Stores:
//! - [`MemoryStore`] for tests and embedding hosts
//! - [`FileStore`], a `key=value` file with `#` comments

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use audioshift_dsp::{ratio, MAX_RATIO, MIN_RATIO};
use parking_lot::RwLock;
use tracing::warn;

use crate::error::ConfigError;

/// Well-known configuration keys
pub mod keys {
    pub const ENABLED: &str = "enabled";
    pub const PITCH_RATIO: &str = "pitch_ratio";
    pub const VOIP_MODE: &str = "voip_mode";
    pub const LATENCY_MS: &str = "latency_ms";
    pub const LATENCY_THRESHOLD_MS: &str = "latency_threshold_ms";
    pub const FAULT_COUNT: &str = "fault_count";
}

pub const DEFAULT_LATENCY_THRESHOLD_MS: f32 = 10.0;

/// External key/value store the effect reads settings from and writes
/// telemetry to
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::new();
        {
            let mut map = store.values.write();
            for (k, v) in values {
                map.insert(k.to_string(), v.to_string());
            }
        }
        store
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Modification time and length of the backing file, `None` if missing
type FileStamp = Option<(SystemTime, u64)>;

#[derive(Debug, Default)]
struct Cached {
    values: BTreeMap<String, String>,
    stamp: FileStamp,
}

/// File-backed store.
///
/// Reads are served from a cache that is refreshed whenever the file's
/// modification time or length changes. Every `set` re-reads the file,
/// merges the key and rewrites it, so edits made by other processes
/// survive.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: RwLock<Cached>,
}

impl FileStore {
    /// Open a store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let cached = Self::load(&path)?;
        Ok(Self {
            path,
            cache: RwLock::new(cached),
        })
    }

    fn stamp(path: &Path) -> FileStamp {
        let meta = fs::metadata(path).ok()?;
        Some((meta.modified().ok()?, meta.len()))
    }

    fn load(path: &Path) -> Result<Cached, ConfigError> {
        let stamp = Self::stamp(path);
        let values = match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Ok(Cached { values, stamp })
    }

    /// Reload the cache if the file changed since it was last read
    fn refresh(&self) {
        if Self::stamp(&self.path) == self.cache.read().stamp {
            return;
        }
        match Self::load(&self.path) {
            Ok(cached) => *self.cache.write() = cached,
            Err(e) => warn!("Keeping cached config: {}", e),
        }
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("audioshift")
            .join("effect.conf")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse simple key=value content
    fn parse(content: &str) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        values
    }

    fn serialize(values: &BTreeMap<String, String>) -> String {
        let mut lines = Vec::with_capacity(values.len() + 1);
        lines.push("# AudioShift effect configuration".to_string());
        for (key, value) in values {
            lines.push(format!("{}={}", key, value));
        }
        lines.push(String::new());
        lines.join("\n")
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&self.path, Self::serialize(values)).map_err(io_err)
    }
}

impl ConfigStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.refresh();
        self.cache.read().values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut cache = self.cache.write();
        *cache = Self::load(&self.path)?;
        if cache.values.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        cache.values.insert(key.to_string(), value.to_string());
        self.save(&cache.values)?;
        cache.stamp = Self::stamp(&self.path);
        Ok(())
    }
}

/// Settings read from a store, with defaults for missing or bad values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigSnapshot {
    pub enabled: bool,
    pub pitch_ratio: f64,
    pub voip_mode: bool,
    pub latency_threshold_ms: f32,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            enabled: true,
            pitch_ratio: ratio::ratio(),
            voip_mode: false,
            latency_threshold_ms: DEFAULT_LATENCY_THRESHOLD_MS,
        }
    }
}

impl ConfigSnapshot {
    /// Read every key, logging and replacing malformed values
    pub fn load(store: &dyn ConfigStore) -> Self {
        let defaults = Self::default();
        Self {
            enabled: read(store, keys::ENABLED, defaults.enabled, parse_bool),
            pitch_ratio: read(store, keys::PITCH_RATIO, defaults.pitch_ratio, |v| {
                v.parse::<f64>()
                    .ok()
                    .filter(|r| (MIN_RATIO..=MAX_RATIO).contains(r))
            }),
            voip_mode: read(store, keys::VOIP_MODE, defaults.voip_mode, parse_bool),
            latency_threshold_ms: read(
                store,
                keys::LATENCY_THRESHOLD_MS,
                defaults.latency_threshold_ms,
                |v| v.parse::<f32>().ok().filter(|t| t.is_finite() && *t > 0.0),
            ),
        }
    }
}

fn read<T: Copy>(store: &dyn ConfigStore, key: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
    match store.get(key) {
        None => default,
        Some(raw) => parse(raw.trim()).unwrap_or_else(|| {
            warn!("{}", ConfigError::Malformed { key: key.to_string(), value: raw.clone() });
            default
        }),
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("audioshift-test-{}-{}", std::process::id(), name))
            .join("effect.conf")
    }

    #[test]
    fn test_defaults_when_empty() {
        let snapshot = ConfigSnapshot::load(&MemoryStore::new());
        assert_eq!(snapshot, ConfigSnapshot::default());
        assert!(snapshot.enabled);
        assert_eq!(snapshot.pitch_ratio, 432.0 / 440.0);
        assert_eq!(snapshot.latency_threshold_ms, 10.0);
    }

    #[test]
    fn test_values_are_read() {
        let store = MemoryStore::with_values([
            (keys::ENABLED, "false"),
            (keys::PITCH_RATIO, "0.5"),
            (keys::VOIP_MODE, "1"),
            (keys::LATENCY_THRESHOLD_MS, "20"),
        ]);
        let snapshot = ConfigSnapshot::load(&store);
        assert!(!snapshot.enabled);
        assert_eq!(snapshot.pitch_ratio, 0.5);
        assert!(snapshot.voip_mode);
        assert_eq!(snapshot.latency_threshold_ms, 20.0);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let store = MemoryStore::with_values([
            (keys::ENABLED, "maybe"),
            (keys::PITCH_RATIO, "3.0"),
            (keys::LATENCY_THRESHOLD_MS, "-4"),
        ]);
        let snapshot = ConfigSnapshot::load(&store);
        assert_eq!(snapshot, ConfigSnapshot::default());

        let store = MemoryStore::with_values([(keys::PITCH_RATIO, "NaN")]);
        assert_eq!(ConfigSnapshot::load(&store).pitch_ratio, ratio::ratio());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_parse_with_comments() {
        let content = "# Comment\nenabled = false\n\n# Another comment\npitch_ratio=0.98\nbroken line";
        let values = FileStore::parse(content);
        assert_eq!(values.get("enabled").map(String::as_str), Some("false"));
        assert_eq!(values.get("pitch_ratio").map(String::as_str), Some("0.98"));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let path = temp_path("roundtrip");
        let _ = fs::remove_dir_all(path.parent().unwrap());

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(keys::ENABLED), None);
        store.set(keys::ENABLED, "false").unwrap();
        store.set(keys::LATENCY_MS, "1.25").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(keys::ENABLED).as_deref(), Some("false"));
        assert_eq!(reopened.get(keys::LATENCY_MS).as_deref(), Some("1.25"));
        assert!(!ConfigSnapshot::load(&reopened).enabled);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_file_store_sees_external_edits() {
        let path = temp_path("external");
        let _ = fs::remove_dir_all(path.parent().unwrap());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "enabled=true\n").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(ConfigSnapshot::load(&store).enabled);

        // another process flips the switch and adds a key
        fs::write(&path, "enabled=false\nlatency_threshold_ms=20\n").unwrap();
        let snapshot = ConfigSnapshot::load(&store);
        assert!(!snapshot.enabled);
        assert_eq!(snapshot.latency_threshold_ms, 20.0);

        fs::write(&path, "enabled=off\n").unwrap();
        store.set(keys::LATENCY_MS, "1.25").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("enabled=off"), "external edit lost: {content}");
        assert!(content.contains("latency_ms=1.25"));
        assert_eq!(store.get(keys::LATENCY_THRESHOLD_MS), None);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_default_path_shape() {
        let path = FileStore::default_path();
        assert!(path.ends_with("audioshift/effect.conf"));
    }
}
