//! Смена внешности тела
//!
//! Новое тело спавнится рядом со старым; через `swap_settle_ticks` тиков
//! предметы и экипировка переезжают, старое тело уничтожается, anchor
//! перепривязывается. Любой исход сходится к одному телу.

use bevy::prelude::*;

use super::CompanionRuntime;
use crate::backend::{Equipment, OwnerId, PrefabId, WorldBackend};
use crate::companion::CommandOutcome;
use crate::config::AppearanceEntry;
use crate::error::{BackendError, CompanionError};
use crate::logger::{log, log_error, log_info, log_warning};
use crate::scheduler::StepResult;
use crate::store::{AppearancePreferences, KeyValueStore};

impl<B: WorldBackend, S: KeyValueStore> CompanionRuntime<B, S> {
    /// `variant` - имя из каталога или 1-based номер
    pub fn swap_appearance(&mut self, owner: OwnerId, variant: &str) -> Result<CommandOutcome, CompanionError> {
        self.ensure_initialized()?;
        let entry = self
            .find_appearance(variant)
            .cloned()
            .ok_or_else(|| CompanionError::UnknownAppearance(variant.to_string()))?;

        if self
            .registry
            .try_get(owner)
            .is_some_and(|state| state.pending_swap.is_some())
        {
            return Ok(CommandOutcome::AlreadyBusy);
        }

        let mut preferences = AppearancePreferences::load(&self.store)?;
        if preferences.get(owner) == Some(entry.prefab) {
            return Ok(CommandOutcome::AlreadyInState);
        }
        preferences.set(owner, entry.prefab);
        preferences.save(&mut self.store)?;
        log_info(&format!("🐾 Companion {}: appearance set to {}", owner, entry.name));

        // Живой компаньон меняется сразу, остальные - при следующем spawn
        let live_body = self
            .registry
            .try_get(owner)
            .filter(|state| state.lifecycle.is_ready())
            .and_then(|state| state.mobile);
        if let Some(mobile) = live_body {
            if self.backend.prefab_of(mobile) != Some(entry.prefab) {
                self.begin_swap(owner, entry.prefab)?;
            }
        }
        Ok(CommandOutcome::Applied)
    }

    fn find_appearance(&self, variant: &str) -> Option<&AppearanceEntry> {
        if let Ok(number) = variant.trim().parse::<usize>() {
            return self.config.appearance_by_index(number);
        }
        self.config
            .appearances
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(variant.trim()))
    }

    /// Заспавнить новое тело и запланировать перенос
    pub(super) fn begin_swap(&mut self, owner: OwnerId, prefab: PrefabId) -> Result<(), CompanionError> {
        if self.is_following(owner) {
            self.halt_follow(owner);
        }

        let state = self
            .registry
            .try_get(owner)
            .ok_or(CompanionError::NoCompanion(owner))?;
        let old = self.valid_handle(state.mobile)?;
        let character = self.resolve_owner(owner)?.character;
        let position = self
            .backend
            .read_position(old)
            .ok_or(BackendError::MissingObject(old))?;

        let replacement = self.spawn_mobile_body(character, prefab, position)?;
        // До переноса с новым телом не взаимодействуют
        self.backend.set_interactable(replacement, false)?;

        let settle = self.config.swap_settle_ticks;
        let action = self
            .scheduler
            .delay_ticks(settle, move |rt: &mut Self| rt.complete_swap(owner));
        if let Some(state) = self.registry.try_get_mut(owner) {
            state.pending_swap = Some(replacement);
            state.swap_action = Some(action);
            state.track(action);
        }

        log(&format!("Companion {}: swapping body {:?} → {:?}", owner, old, replacement));
        Ok(())
    }

    fn complete_swap(&mut self, owner: OwnerId) -> StepResult {
        let Some(state) = self.registry.try_get_mut(owner) else {
            return Ok(());
        };
        if let Some(action) = state.swap_action.take() {
            state.untrack(action);
        }
        let Some(replacement) = state.pending_swap.take() else {
            return Ok(());
        };
        let old = state.mobile;

        let old_alive = self.backend.is_valid(old);
        let replacement_alive = self.backend.exists(replacement);

        match (old, old_alive, replacement_alive) {
            (_, _, false) => {
                log_warning(&format!("Companion {}: replacement body vanished, keeping the old one", owner));
                Ok(())
            }
            (Some(old), true, true) => {
                if let Err(err) = self.move_items(old, replacement) {
                    // Откат: всё обратно в старое тело, новое уничтожаем
                    log_error(&format!("Companion {}: swap aborted: {}", owner, err));
                    self.return_items(replacement, old);
                    self.backend.destroy(replacement);
                    return Ok(());
                }
                self.backend.destroy(old);
                self.adopt_body(owner, replacement)
            }
            _ => {
                log_warning(&format!("Companion {}: old body vanished during swap, adopting replacement", owner));
                self.adopt_body(owner, replacement)
            }
        }
    }

    /// Все слоты + экипировка из `from` в `to`
    fn move_items(&mut self, from: Entity, to: Entity) -> Result<(), BackendError> {
        let before = self.backend.total_item_count(from) + self.backend.total_item_count(to);

        let slots = self.backend.inventory(from);
        for (slot, stack) in slots.iter().enumerate() {
            if stack.is_some() {
                self.backend.transfer_slot(from, to, slot)?;
            }
        }

        if let Some(equipment) = self.backend.equipment(from).filter(|e| !e.is_empty()) {
            self.backend.set_equipment(to, equipment)?;
            self.backend.set_equipment(from, Equipment::default())?;
        }

        let after = self.backend.total_item_count(to);
        debug_assert_eq!(before, after, "item count changed during swap");
        Ok(())
    }

    /// Best-effort возврат предметов при откате
    fn return_items(&mut self, from: Entity, to: Entity) {
        let slots = self.backend.inventory(from);
        for (slot, stack) in slots.iter().enumerate() {
            if stack.is_some() {
                if let Err(err) = self.backend.transfer_slot(from, to, slot) {
                    log_error(&format!("Swap rollback: slot {} of {:?} stuck: {}", slot, from, err));
                }
            }
        }
        if let Some(equipment) = self.backend.equipment(from).filter(|e| !e.is_empty()) {
            if let Err(err) = self.backend.set_equipment(to, equipment) {
                log_error(&format!("Swap rollback: equipment of {:?} stuck: {}", from, err));
            }
        }
    }

    /// Сделать `mobile` телом компаньона: связь, поведение, взгляд на owner'а
    fn adopt_body(&mut self, owner: OwnerId, mobile: Entity) -> StepResult {
        let anchor = self.registry.try_get_mut(owner).and_then(|state| {
            state.mobile = Some(mobile);
            state.anchor
        });
        if let Some(anchor) = anchor.filter(|a| self.backend.exists(*a)) {
            self.bind_pair(anchor, mobile)?;
        }

        self.backend.set_interactable(mobile, true)?;
        self.backend
            .apply_buff(mobile, self.config.buffs.spawning_state, Some(self.config.busy()))?;
        if let Some(leader) = self.backend.resolve_owner(owner) {
            self.backend.configure_companion(mobile, leader.character)?;
            self.backend.look_at(mobile, leader.position)?;
        }

        log_info(&format!("🐾 Companion {}: body swapped to {:?}", owner, mobile));
        Ok(())
    }

    /// Незавершённый swap при dismiss: остаётся ровно одно тело
    pub(super) fn abandon_swap(&mut self, owner: OwnerId) {
        let Some(state) = self.registry.try_get_mut(owner) else {
            return;
        };
        if let Some(action) = state.swap_action.take() {
            state.untrack(action);
            self.scheduler.cancel(action);
        }
        let Some(replacement) = state.pending_swap.take() else {
            return;
        };
        let old = state.mobile;

        if self.backend.is_valid(old) {
            self.backend.destroy(replacement);
            log(&format!("Companion {}: pending swap abandoned", owner));
        } else if self.backend.exists(replacement) {
            if let Err(err) = self.adopt_body(owner, replacement) {
                log_error(&format!("Companion {}: pending body not adopted: {}", owner, err));
            }
        }
    }
}
