//! Persistent key-value store
//!
//! Значения - serde-типы, хранятся как JSON. Ядро использует два ключевых
//! маппинга:
//! - `PersistedInventorySnapshot` под ключом owner id
//! - `AppearancePreferences` под общим ключом `APPEARANCE_KEY`

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::backend::{ItemTypeId, OwnerId, PrefabId};
use crate::error::StoreError;
use crate::logger;

/// Ключ общего маппинга owner → prefab
pub const APPEARANCE_KEY: &str = "companion_appearances";

pub trait KeyValueStore: 'static {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError>;
    fn save<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError>;
    /// true если ключ существовал
    fn delete(&mut self, key: &str) -> Result<bool, StoreError>;
    fn has(&self, key: &str) -> bool;
}

fn serialization(key: &str, source: serde_json::Error) -> StoreError {
    StoreError::Serialization {
        key: key.to_string(),
        source,
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// Store в памяти (тесты, headless demo)
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, serde_json::Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.values.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| serialization(key, err)),
            None => Ok(None),
        }
    }

    fn save<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|err| serialization(key, err))?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        Ok(self.values.remove(key).is_some())
    }

    fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

// ============================================================================
// JsonFileStore
// ============================================================================

/// Один JSON файл на ключ в директории
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Создаёт директорию, если её нет
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{file}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let text = match fs::read_to_string(self.path_for(key)) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| serialization(key, err))
    }

    fn save<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(value).map_err(|err| serialization(key, err))?;
        fs::write(self.path_for(key), text)?;
        logger::log(&format!("💾 store: saved '{}'", key));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn has(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }
}

// ============================================================================
// Typed records
// ============================================================================

/// Инвентарь тела, свёрнутый по типу предмета
///
/// Пишется при каждом изменении инвентаря и при dismiss; применяется к новому
/// телу при следующем создании и сразу удаляется.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistedInventorySnapshot(pub BTreeMap<ItemTypeId, u32>);

impl PersistedInventorySnapshot {
    pub fn key(owner: OwnerId) -> String {
        owner.to_string()
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|amount| *amount == 0)
    }

    pub fn load<S: KeyValueStore>(store: &S, owner: OwnerId) -> Result<Option<Self>, StoreError> {
        store.get(&Self::key(owner))
    }

    pub fn save<S: KeyValueStore>(&self, store: &mut S, owner: OwnerId) -> Result<(), StoreError> {
        store.save(&Self::key(owner), self)
    }

    pub fn delete<S: KeyValueStore>(store: &mut S, owner: OwnerId) -> Result<bool, StoreError> {
        store.delete(&Self::key(owner))
    }
}

impl From<BTreeMap<ItemTypeId, u32>> for PersistedInventorySnapshot {
    fn from(totals: BTreeMap<ItemTypeId, u32>) -> Self {
        Self(totals)
    }
}

/// Выбранная внешность каждого owner'а
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppearancePreferences(pub BTreeMap<OwnerId, PrefabId>);

impl AppearancePreferences {
    /// Отсутствующий ключ - пустой маппинг
    pub fn load<S: KeyValueStore>(store: &S) -> Result<Self, StoreError> {
        Ok(store.get(APPEARANCE_KEY)?.unwrap_or_default())
    }

    pub fn save<S: KeyValueStore>(&self, store: &mut S) -> Result<(), StoreError> {
        store.save(APPEARANCE_KEY, self)
    }

    pub fn get(&self, owner: OwnerId) -> Option<PrefabId> {
        self.0.get(&owner).copied()
    }

    /// Старое значение, если было
    pub fn set(&mut self, owner: OwnerId, prefab: PrefabId) -> Option<PrefabId> {
        self.0.insert(owner, prefab)
    }
}

#[cfg(test)]
mod store_tests;
