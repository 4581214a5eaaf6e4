//! CompanionRegistry - owner id → `CompanionState`
//!
//! Единственный владелец состояний. Явные `get_or_create` / `try_get`
//! вместо неявной default-вставки.

use bevy::prelude::Entity;
use std::collections::BTreeMap;

use crate::backend::OwnerId;
use crate::companion::CompanionState;
use crate::config::FollowConfig;

#[derive(Debug, Default, Clone)]
pub struct CompanionRegistry {
    entries: BTreeMap<OwnerId, CompanionState>,
}

impl CompanionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, owner: OwnerId, follow: &FollowConfig) -> &mut CompanionState {
        self.entries
            .entry(owner)
            .or_insert_with(|| CompanionState::new(owner, follow))
    }

    pub fn try_get(&self, owner: OwnerId) -> Option<&CompanionState> {
        self.entries.get(&owner)
    }

    pub fn try_get_mut(&mut self, owner: OwnerId) -> Option<&mut CompanionState> {
        self.entries.get_mut(&owner)
    }

    /// Вставить (или заменить) состояние; возвращает предыдущее
    pub fn insert(&mut self, state: CompanionState) -> Option<CompanionState> {
        self.entries.insert(state.owner_id, state)
    }

    pub fn remove(&mut self, owner: OwnerId) -> Option<CompanionState> {
        self.entries.remove(&owner)
    }

    pub fn contains(&self, owner: OwnerId) -> bool {
        self.entries.contains_key(&owner)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompanionState> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CompanionState> {
        self.entries.values_mut()
    }

    pub fn owners(&self) -> Vec<OwnerId> {
        self.entries.keys().copied().collect()
    }

    /// Чей это handle (anchor, тело или тело в процессе swap)
    pub fn find_by_handle(&self, handle: Entity) -> Option<OwnerId> {
        self.entries
            .values()
            .find(|state| state.owns(handle))
            .map(|state| state.owner_id)
    }

    /// Handle принадлежит другому owner'у
    pub fn claimed_by_other(&self, owner: OwnerId, handle: Entity) -> bool {
        self.find_by_handle(handle).is_some_and(|found| found != owner)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
