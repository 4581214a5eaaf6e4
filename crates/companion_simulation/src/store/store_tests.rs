//! Tests for key-value stores.

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("companion_store_{}_{}_{}", name, std::process::id(), nanos))
    }

    fn snapshot() -> PersistedInventorySnapshot {
        let mut totals = BTreeMap::new();
        totals.insert(ItemTypeId(10), 5);
        totals.insert(ItemTypeId(-3), 2);
        PersistedInventorySnapshot(totals)
    }

    #[test]
    fn test_memory_store_get_save_delete() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get::<u32>("missing").unwrap(), None);

        store.save("answer", &42u32).unwrap();
        assert!(store.has("answer"));
        assert_eq!(store.get::<u32>("answer").unwrap(), Some(42));

        assert!(store.delete("answer").unwrap());
        assert!(!store.delete("answer").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_type_mismatch_is_serialization_error() {
        let mut store = MemoryStore::new();
        store.save("text", &"hello").unwrap();

        let err = store.get::<u32>("text").unwrap_err();
        assert!(matches!(err, StoreError::Serialization { ref key, .. } if key == "text"));
    }

    #[test]
    fn test_inventory_snapshot_keyed_by_owner() {
        let mut store = MemoryStore::new();
        let owner = OwnerId(76561198000000001);

        snapshot().save(&mut store, owner).unwrap();
        assert!(store.has("76561198000000001"));

        let loaded = PersistedInventorySnapshot::load(&store, owner).unwrap().unwrap();
        assert_eq!(loaded, snapshot());
        assert_eq!(loaded.total(), 7);

        assert!(PersistedInventorySnapshot::delete(&mut store, owner).unwrap());
        assert_eq!(PersistedInventorySnapshot::load(&store, owner).unwrap(), None);
    }

    #[test]
    fn test_appearance_preferences_shared_key() {
        let mut store = MemoryStore::new();
        assert_eq!(AppearancePreferences::load(&store).unwrap(), AppearancePreferences::default());

        let mut prefs = AppearancePreferences::default();
        assert_eq!(prefs.set(OwnerId(1), PrefabId(100)), None);
        assert_eq!(prefs.set(OwnerId(1), PrefabId(200)), Some(PrefabId(100)));
        prefs.set(OwnerId(2), PrefabId(300));
        prefs.save(&mut store).unwrap();

        assert_eq!(store.len(), 1);
        let loaded = AppearancePreferences::load(&store).unwrap();
        assert_eq!(loaded.get(OwnerId(1)), Some(PrefabId(200)));
        assert_eq!(loaded.get(OwnerId(2)), Some(PrefabId(300)));
        assert_eq!(loaded.get(OwnerId(3)), None);
    }

    #[test]
    fn test_json_file_store_roundtrip_on_disk() {
        let dir = temp_dir("roundtrip");
        let mut store = JsonFileStore::open(&dir).unwrap();
        let owner = OwnerId(5);

        snapshot().save(&mut store, owner).unwrap();
        assert!(store.has("5"));
        assert!(dir.join("5.json").is_file());

        // Новый экземпляр видит те же данные
        let reopened = JsonFileStore::open(&dir).unwrap();
        assert_eq!(
            PersistedInventorySnapshot::load(&reopened, owner).unwrap(),
            Some(snapshot())
        );

        assert!(store.delete("5").unwrap());
        assert!(!store.delete("5").unwrap());
        assert_eq!(store.get::<u32>("5").unwrap(), None);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_json_file_store_sanitizes_keys() {
        let dir = temp_dir("sanitize");
        let mut store = JsonFileStore::open(&dir).unwrap();

        store.save("../escape/attempt", &1u8).unwrap();
        assert!(dir.join("___escape_attempt.json").is_file());
        assert_eq!(store.get::<u8>("../escape/attempt").unwrap(), Some(1));

        let _ = fs::remove_dir_all(&dir);
    }
}
