//! Flag storage with key uniqueness.
//!
//! Each flag sits behind its own `RwLock`, so override and rollout writes
//! serialize per flag while evaluations read a consistent copy.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use experiment_core::error::{EngineError, EngineResult};
use experiment_core::types::FeatureFlag;
use parking_lot::RwLock;
use uuid::Uuid;

pub trait FlagRepository: Send + Sync {
    /// Store a new flag. Fails with `DuplicateKey` if the key is taken.
    fn insert_unique_key(&self, flag: FeatureFlag) -> EngineResult<()>;

    fn get(&self, id: &Uuid) -> Option<FeatureFlag>;

    fn get_by_key(&self, key: &str) -> Option<FeatureFlag>;

    fn list(&self) -> Vec<FeatureFlag>;

    /// Mutate a flag under its write lock, returning the updated copy.
    fn update(&self, id: &Uuid, apply: &mut dyn FnMut(&mut FeatureFlag)) -> Option<FeatureFlag>;

    fn delete(&self, id: &Uuid) -> bool;
}

#[derive(Default)]
pub struct InMemoryFlagRepository {
    flags: DashMap<Uuid, Arc<RwLock<FeatureFlag>>>,
    keys: DashMap<String, Uuid>,
}

impl InMemoryFlagRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &Uuid) -> Option<Arc<RwLock<FeatureFlag>>> {
        self.flags.get(id).map(|entry| Arc::clone(entry.value()))
    }
}

impl FlagRepository for InMemoryFlagRepository {
    fn insert_unique_key(&self, flag: FeatureFlag) -> EngineResult<()> {
        // The vacant key entry stays locked until the flag is visible by id,
        // so a concurrent lookup by key never sees a dangling id.
        match self.keys.entry(flag.key.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateKey(flag.key)),
            Entry::Vacant(slot) => {
                let id = flag.id;
                self.flags.insert(id, Arc::new(RwLock::new(flag)));
                slot.insert(id);
                Ok(())
            }
        }
    }

    fn get(&self, id: &Uuid) -> Option<FeatureFlag> {
        self.slot(id).map(|flag| flag.read().clone())
    }

    fn get_by_key(&self, key: &str) -> Option<FeatureFlag> {
        let id = *self.keys.get(key)?.value();
        self.get(&id)
    }

    fn list(&self) -> Vec<FeatureFlag> {
        let slots: Vec<_> = self
            .flags
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut flags: Vec<FeatureFlag> = slots.iter().map(|f| f.read().clone()).collect();
        flags.sort_by(|a, b| a.key.cmp(&b.key));
        flags
    }

    fn update(&self, id: &Uuid, apply: &mut dyn FnMut(&mut FeatureFlag)) -> Option<FeatureFlag> {
        let slot = self.slot(id)?;
        let mut flag = slot.write();
        apply(&mut flag);
        Some(flag.clone())
    }

    fn delete(&self, id: &Uuid) -> bool {
        match self.flags.remove(id) {
            Some((_, slot)) => {
                let key = slot.read().key.clone();
                self.keys.remove_if(&key, |_, owner| owner == id);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use experiment_core::types::FlagStatus;
    use std::collections::HashMap;

    fn flag(key: &str) -> FeatureFlag {
        let now = Utc::now();
        FeatureFlag {
            id: Uuid::new_v4(),
            key: key.to_string(),
            name: key.to_string(),
            description: None,
            status: FlagStatus::Enabled,
            rollout_percentage: 100.0,
            default_value: false,
            overrides: HashMap::new(),
            target_segments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let repo = InMemoryFlagRepository::new();
        repo.insert_unique_key(flag("dark-mode")).unwrap();
        let err = repo.insert_unique_key(flag("dark-mode")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey(k) if k == "dark-mode"));
        assert_eq!(repo.list().len(), 1);
    }

    #[test]
    fn test_lookup_by_id_and_key() {
        let repo = InMemoryFlagRepository::new();
        let f = flag("beta-editor");
        repo.insert_unique_key(f.clone()).unwrap();
        assert_eq!(repo.get(&f.id), Some(f.clone()));
        assert_eq!(repo.get_by_key("beta-editor"), Some(f));
        assert!(repo.get_by_key("missing").is_none());
    }

    #[test]
    fn test_delete_frees_key() {
        let repo = InMemoryFlagRepository::new();
        let f = flag("temp");
        repo.insert_unique_key(f.clone()).unwrap();
        assert!(repo.delete(&f.id));
        assert!(!repo.delete(&f.id));
        assert!(repo.get_by_key("temp").is_none());
        assert!(repo.insert_unique_key(flag("temp")).is_ok());
    }

    #[test]
    fn test_list_sorted_by_key() {
        let repo = InMemoryFlagRepository::new();
        for key in ["zeta", "alpha", "mid"] {
            repo.insert_unique_key(flag(key)).unwrap();
        }
        let keys: Vec<String> = repo.list().into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_concurrent_inserts_keep_keys_unique() {
        let repo = Arc::new(InMemoryFlagRepository::new());
        let successes: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let repo = Arc::clone(&repo);
                    scope.spawn(move || repo.insert_unique_key(flag("contested")).is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });
        assert_eq!(successes, 1);
        assert_eq!(repo.list().len(), 1);
    }
}
