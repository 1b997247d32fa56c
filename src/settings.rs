//! Persisted settings: brightness, sequencing mode and network credentials.
//!
//! Stored as typed scalars under one namespace. Nothing else survives a
//! restart; the catalog is always rebuilt from storage.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::SequenceMode;
use crate::error::SettingsError;

pub const NAMESPACE: &str = "frame";
pub const KEY_BRIGHTNESS: &str = "brightness";
pub const KEY_SEQUENCE: &str = "sequence";
pub const KEY_SSID: &str = "ssid";
pub const KEY_SECRET: &str = "secret";

pub const DEFAULT_BRIGHTNESS: u8 = 128;

/// Key/value surface of the settings store. Implementations are scoped to a
/// single namespace.
pub trait SettingsStore: Send {
    fn get_u8(&self, key: &str) -> Option<u8>;
    fn put_u8(&mut self, key: &str, value: u8) -> Result<(), SettingsError>;
    fn get_string(&self, key: &str) -> Option<String>;
    fn put_string(&mut self, key: &str, value: &str) -> Result<(), SettingsError>;
    /// Write several string keys at once. Either every key lands or none does.
    fn put_strings(&mut self, entries: &[(&str, &str)]) -> Result<(), SettingsError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Byte(u8),
    Text(String),
}

type Namespaces = BTreeMap<String, BTreeMap<String, SettingValue>>;

/// YAML-file store, rewritten atomically (temp file + rename) on every put.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    namespace: String,
    doc: Namespaces,
}

impl FileSettings {
    /// A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>, namespace: &str) -> Result<Self, SettingsError> {
        let path = path.into();
        let doc = match fs::read(&path) {
            Ok(data) if data.iter().all(u8::is_ascii_whitespace) => Namespaces::new(),
            Ok(data) => serde_yaml::from_slice(&data)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Namespaces::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), namespace, "settings opened");
        Ok(Self {
            path,
            namespace: namespace.to_string(),
            doc,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn get(&self, key: &str) -> Option<&SettingValue> {
        self.doc.get(&self.namespace)?.get(key)
    }

    fn put(&mut self, key: &str, value: SettingValue) -> Result<(), SettingsError> {
        self.put_all([(key, value)])
    }

    /// Apply `values` in memory and flush once; a failed flush restores the
    /// previous namespace so memory never runs ahead of disk.
    fn put_all<'k>(
        &mut self,
        values: impl IntoIterator<Item = (&'k str, SettingValue)>,
    ) -> Result<(), SettingsError> {
        let previous = self.doc.get(&self.namespace).cloned();
        let scope = self.doc.entry(self.namespace.clone()).or_default();
        for (key, value) in values {
            scope.insert(key.to_string(), value);
        }
        if let Err(err) = self.flush() {
            match previous {
                Some(previous) => self.doc.insert(self.namespace.clone(), previous),
                None => self.doc.remove(&self.namespace),
            };
            return Err(err);
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(&self.doc)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)?;
        file.write_all(yaml.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for FileSettings {
    fn get_u8(&self, key: &str) -> Option<u8> {
        match self.get(key)? {
            SettingValue::Byte(v) => Some(*v),
            SettingValue::Text(_) => None,
        }
    }

    fn put_u8(&mut self, key: &str, value: u8) -> Result<(), SettingsError> {
        self.put(key, SettingValue::Byte(value))
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            SettingValue::Text(v) => Some(v.clone()),
            SettingValue::Byte(_) => None,
        }
    }

    fn put_string(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.put(key, SettingValue::Text(value.to_string()))
    }

    fn put_strings(&mut self, entries: &[(&str, &str)]) -> Result<(), SettingsError> {
        self.put_all(
            entries
                .iter()
                .map(|(key, value)| (*key, SettingValue::Text((*value).to_string()))),
        )
    }
}

/// Volatile store, used when no settings file is configured and under test.
#[derive(Debug, Default, Clone)]
pub struct MemorySettings {
    values: BTreeMap<String, SettingValue>,
}

impl SettingsStore for MemorySettings {
    fn get_u8(&self, key: &str) -> Option<u8> {
        match self.values.get(key)? {
            SettingValue::Byte(v) => Some(*v),
            SettingValue::Text(_) => None,
        }
    }

    fn put_u8(&mut self, key: &str, value: u8) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), SettingValue::Byte(value));
        Ok(())
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            SettingValue::Text(v) => Some(v.clone()),
            SettingValue::Byte(_) => None,
        }
    }

    fn put_string(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values
            .insert(key.to_string(), SettingValue::Text(value.to_string()));
        Ok(())
    }

    fn put_strings(&mut self, entries: &[(&str, &str)]) -> Result<(), SettingsError> {
        for (key, value) in entries {
            self.put_string(key, value)?;
        }
        Ok(())
    }
}

/// Network name/secret pair. An empty name means "not configured".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub secret: String,
}

impl Credentials {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ssid.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &redact_ssid(&self.ssid))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Mask all but the last three characters of a network name for logs.
#[must_use]
pub fn redact_ssid(ssid: &str) -> String {
    let len = ssid.chars().count();
    if len <= 3 {
        "***".to_string()
    } else {
        let tail: String = ssid.chars().skip(len - 3).collect();
        format!("***{tail}")
    }
}

/// Snapshot of every persisted scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSettings {
    pub brightness: u8,
    pub sequence: SequenceMode,
    pub credentials: Credentials,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            brightness: DEFAULT_BRIGHTNESS,
            sequence: SequenceMode::default(),
            credentials: Credentials::default(),
        }
    }
}

impl PersistedSettings {
    /// Missing or out-of-range values fall back to defaults.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let defaults = Self::default();
        let sequence = match store.get_u8(KEY_SEQUENCE) {
            Some(code) => SequenceMode::from_code(code).unwrap_or_else(|| {
                warn!(code, "persisted sequence mode out of range; using default");
                defaults.sequence
            }),
            None => defaults.sequence,
        };
        Self {
            brightness: store.get_u8(KEY_BRIGHTNESS).unwrap_or(defaults.brightness),
            sequence,
            credentials: Credentials {
                ssid: store.get_string(KEY_SSID).unwrap_or_default(),
                secret: store.get_string(KEY_SECRET).unwrap_or_default(),
            },
        }
    }

    pub fn store_brightness(store: &mut dyn SettingsStore, level: u8) -> Result<(), SettingsError> {
        store.put_u8(KEY_BRIGHTNESS, level)
    }

    pub fn store_sequence(
        store: &mut dyn SettingsStore,
        mode: SequenceMode,
    ) -> Result<(), SettingsError> {
        store.put_u8(KEY_SEQUENCE, mode.code())
    }

    pub fn store_credentials(
        store: &mut dyn SettingsStore,
        credentials: &Credentials,
    ) -> Result<(), SettingsError> {
        store.put_strings(&[
            (KEY_SSID, credentials.ssid.as_str()),
            (KEY_SECRET, credentials.secret.as_str()),
        ])
    }
}
