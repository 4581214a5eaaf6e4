//! Spawn / dismiss / force_remove
//!
//! Spawn-цепочка:
//! ```text
//! wait N ticks → start phase → wait greeting_delay → repeat(lines + 1) → Idle|Following
//! ```
//! Dismiss-цепочка:
//! ```text
//! leave line → wait → end phase (no interact, despawn visual) → wait → finalize → on_complete
//! ```

use bevy::prelude::*;
use std::time::Duration;

use super::CompanionRuntime;
use crate::backend::{ItemStack, OwnerId, OwnerSnapshot, WorldBackend};
use crate::companion::{CommandOutcome, Lifecycle};
use crate::config::DismissPolicy;
use crate::error::{ActionError, CompanionError};
use crate::logger::{log, log_error, log_info, log_warning};
use crate::scheduler::StepResult;
use crate::store::{KeyValueStore, PersistedInventorySnapshot};

/// Что пришлось сделать с парой перед операцией
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PairStatus {
    Intact,
    AnchorRebuilt,
    /// Тело новое - ему нужен инвентарь из snapshot
    MobileRebuilt,
    Created,
    /// Обеих половин нет, пересоздание не запрошено
    Missing,
}

impl PairStatus {
    fn fresh_mobile(self) -> bool {
        matches!(self, PairStatus::MobileRebuilt | PairStatus::Created)
    }
}

impl<B: WorldBackend, S: KeyValueStore> CompanionRuntime<B, S> {
    // ========================================================================
    // Spawn
    // ========================================================================

    pub fn spawn(&mut self, owner: OwnerId) -> Result<CommandOutcome, CompanionError> {
        self.ensure_initialized()?;
        let snapshot = self.resolve_owner(owner)?;
        let now = self.scheduler.elapsed();

        let state = self.registry.get_or_create(owner, &self.config.follow);
        if state.is_busy(now) || state.dismiss_in_progress || matches!(state.lifecycle, Lifecycle::Spawning | Lifecycle::Leaving) {
            log(&format!("Companion {}: spawn ignored, busy ({:?})", owner, state.lifecycle));
            return Ok(CommandOutcome::AlreadyBusy);
        }
        if state.lifecycle.is_ready() {
            return Ok(CommandOutcome::AlreadyInState);
        }
        let reused = state.lifecycle == Lifecycle::Hidden;

        let status = match self.repair_pair(owner, &snapshot, true) {
            Ok(status) => status,
            Err(err) => {
                self.drop_if_empty(owner);
                return Err(err);
            }
        };
        let (anchor, mobile) = self.pair_handles(owner)?;

        let busy = self.config.busy();
        if let Some(state) = self.registry.try_get_mut(owner) {
            state.mark_busy(now, busy);
            state.lifecycle = Lifecycle::Spawning;
            state.dismiss_in_progress = false;
        }

        if let Err(err) = self.prepare_spawned_pair(&snapshot, anchor, mobile) {
            // Пара существует, но не подготовлена: следующий spawn повторит попытку
            if let Some(state) = self.registry.try_get_mut(owner) {
                state.lifecycle = Lifecycle::Hidden;
                state.busy_until = None;
            }
            return Err(err);
        }

        let restore = status.fresh_mobile();
        let greeting_delay = Duration::from_secs_f32(self.config.greeting_delay);
        let chain = self
            .scheduler
            .sequence()
            .then_wait_ticks(self.config.spawn_settle_ticks)
            .then(move |rt: &mut Self| rt.spawn_start_phase(owner, restore))
            .then_wait(greeting_delay)
            .then(move |rt: &mut Self| rt.start_greeting(owner))
            .execute();
        if let Some(state) = self.registry.try_get_mut(owner) {
            state.track(chain);
        }

        log_info(&format!(
            "🐾 Companion {}: spawning ({}, pair {:?})",
            owner,
            if reused { "re-summon" } else { "new" },
            status
        ));
        Ok(CommandOutcome::Applied)
    }

    /// Позиция, buff'ы, имя, lifetime сразу при spawn
    fn prepare_spawned_pair(&mut self, owner: &OwnerSnapshot, anchor: Entity, mobile: Entity) -> Result<(), CompanionError> {
        let buffs = self.config.buffs.clone();
        let busy = self.config.busy();
        let lifetime = self.config.lifetime();
        let position = self.spawn_position(owner);

        self.backend.remove_buff(mobile, buffs.hidden_state);
        self.backend.remove_buff(anchor, buffs.hidden_state);
        self.backend.remove_buff(mobile, buffs.leaving_state);
        self.backend.reset_lifetime(anchor, lifetime)?;
        self.backend.reset_lifetime(mobile, lifetime)?;
        self.backend.apply_buff(owner.character, buffs.owner_spawn, Some(busy))?;
        self.backend.apply_buff(mobile, buffs.spawning_state, Some(busy))?;

        self.backend.configure_companion(mobile, owner.character)?;
        self.backend.set_interactable(mobile, true)?;
        self.backend.set_seek_target(mobile, None)?;
        self.backend.teleport(mobile, position)?;
        self.backend.teleport(anchor, position + self.config.anchor_offset())?;
        self.backend.look_at(mobile, owner.position)?;

        let name = self.config.display_name(&owner.name);
        self.backend.set_display_name(anchor, &name)?;
        Ok(())
    }

    /// Точка прицела owner'а, не дальше `max_spawn_distance`, на высоте owner'а
    fn spawn_position(&self, owner: &OwnerSnapshot) -> Vec3 {
        let mut offset = owner.aim - owner.position;
        offset.y = 0.0;
        let offset = offset.clamp_length_max(self.config.max_spawn_distance);
        owner.position + offset
    }

    fn spawn_start_phase(&mut self, owner: OwnerId, restore: bool) -> StepResult {
        let (_anchor, mobile) = self.spawning_pair(owner)?;

        if restore {
            self.restore_inventory(owner, mobile);
        } else if let Err(err) = PersistedInventorySnapshot::delete(&mut self.store, owner) {
            // Тело живо и несёт свои предметы; snapshot устарел
            log_warning(&format!("Companion {}: stale snapshot not deleted: {}", owner, err));
        }

        self.backend.cast_ability(mobile, self.config.abilities.spawn)?;
        if let Some(snapshot) = self.backend.resolve_owner(owner) {
            self.backend.look_at(mobile, snapshot.position)?;
        }

        let preferred = self.preferred_prefab(owner);
        if self.backend.prefab_of(mobile) != Some(preferred) {
            log(&format!("Companion {}: appearance drifted, swapping to {}", owner, preferred));
            self.begin_swap(owner, preferred)?;
        }
        Ok(())
    }

    /// Применить snapshot к новому телу и удалить его
    fn restore_inventory(&mut self, owner: OwnerId, mobile: Entity) {
        let snapshot = match PersistedInventorySnapshot::load(&self.store, owner) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(err) => {
                log_error(&format!("Companion {}: inventory snapshot unreadable: {}", owner, err));
                return;
            }
        };

        for (item, amount) in snapshot.0.iter().filter(|(_, amount)| **amount > 0) {
            if let Err(err) = self.backend.add_item(mobile, ItemStack::new(*item, *amount)) {
                log_error(&format!("Companion {}: failed to restore {}x{:?}: {}", owner, amount, item, err));
            }
        }
        log(&format!("Companion {}: restored {} items", owner, snapshot.total()));

        if let Err(err) = PersistedInventorySnapshot::delete(&mut self.store, owner) {
            log_warning(&format!("Companion {}: consumed snapshot not deleted: {}", owner, err));
        }
    }

    fn start_greeting(&mut self, owner: OwnerId) -> StepResult {
        let lines = self.config.greeting_lines.clone();
        let count = lines.len() as u32 + 1;
        let interval = Duration::from_secs_f32(self.config.greeting_line_interval);

        let greeting = self.scheduler.repeat(interval, count, move |rt: &mut Self, index| {
            match lines.get(index as usize) {
                Some(line) => rt.show_line(owner, line),
                None => rt.finish_spawn(owner),
            }
        });
        if let Some(state) = self.registry.try_get_mut(owner) {
            state.track(greeting);
        }
        Ok(())
    }

    fn show_line(&mut self, owner: OwnerId, line: &str) -> StepResult {
        let (anchor, _mobile) = self.spawning_pair(owner)?;
        self.backend.set_display_name(anchor, line)?;
        Ok(())
    }

    fn finish_spawn(&mut self, owner: OwnerId) -> StepResult {
        let (anchor, _mobile) = self.spawning_pair(owner)?;
        let name = self
            .backend
            .resolve_owner(owner)
            .map(|snapshot| self.config.display_name(&snapshot.name))
            .unwrap_or_else(|| self.config.display_name(&owner.to_string()));
        self.backend.set_display_name(anchor, &name)?;

        let Some(state) = self.registry.try_get_mut(owner) else {
            return Ok(());
        };
        if state.lifecycle != Lifecycle::Spawning {
            return Ok(());
        }
        state.lifecycle = if state.follow.active {
            Lifecycle::Following
        } else {
            Lifecycle::Idle
        };
        // Цепочка и приветствие отработали
        state.active_actions.clear();
        log_info(&format!("🐾 Companion {}: ready ({:?})", owner, state.lifecycle));
        Ok(())
    }

    /// Пара для шага spawn-цепочки
    ///
    /// Половину, пропавшую за время цепочки, пересобираем на месте. Если
    /// не вышло - цепочка снимается, компаньон уходит в Hidden, и следующий
    /// spawn чинит пару с нуля.
    fn spawning_pair(&mut self, owner: OwnerId) -> Result<(Entity, Entity), ActionError> {
        match self.repair_spawning_pair(owner) {
            Ok(pair) => Ok(pair),
            Err(err) => {
                log_error(&format!("Companion {}: spawn aborted: {}", owner, err));
                self.abort_spawn(owner);
                Err(err.into())
            }
        }
    }

    fn repair_spawning_pair(&mut self, owner: OwnerId) -> Result<(Entity, Entity), CompanionError> {
        let snapshot = self.resolve_owner(owner)?;
        let status = self.repair_pair(owner, &snapshot, true)?;
        let (anchor, mobile) = self.pair_handles(owner)?;
        if status == PairStatus::Intact {
            return Ok((anchor, mobile));
        }

        log_warning(&format!("Companion {}: pair lost mid-spawn, repaired ({:?})", owner, status));
        let lifetime = self.config.lifetime();
        let busy = self.config.busy();
        self.backend.reset_lifetime(anchor, lifetime)?;
        self.backend.reset_lifetime(mobile, lifetime)?;
        if status.fresh_mobile() {
            self.backend
                .apply_buff(mobile, self.config.buffs.spawning_state, Some(busy))?;
            self.backend.set_interactable(mobile, true)?;
            self.backend.look_at(mobile, snapshot.position)?;
            self.restore_inventory(owner, mobile);
        }
        Ok((anchor, mobile))
    }

    fn abort_spawn(&mut self, owner: OwnerId) {
        // Отмена из собственного шага безопасна: scheduler снимет слот после возврата
        self.cancel_actions(owner);
        if let Some(state) = self.registry.try_get_mut(owner) {
            if state.lifecycle == Lifecycle::Spawning {
                state.lifecycle = Lifecycle::Hidden;
            }
            state.busy_until = None;
        }
    }

    // ========================================================================
    // Dismiss
    // ========================================================================

    pub fn dismiss(&mut self, owner: OwnerId) -> Result<CommandOutcome, CompanionError> {
        self.dismiss_with(owner, |_, _| {})
    }

    /// Dismiss с callback'ом, который вызывается после успешного finalize
    pub fn dismiss_with(
        &mut self,
        owner: OwnerId,
        on_complete: impl FnOnce(&mut Self, OwnerId) + 'static,
    ) -> Result<CommandOutcome, CompanionError> {
        self.ensure_initialized()?;
        let snapshot = self.resolve_owner(owner)?;

        let state = self
            .registry
            .try_get(owner)
            .ok_or(CompanionError::NoCompanion(owner))?;
        if state.dismiss_in_progress || state.lifecycle == Lifecycle::Leaving {
            log(&format!("Companion {}: dismiss already in progress", owner));
            return Ok(CommandOutcome::AlreadyBusy);
        }
        if !state.lifecycle.is_present() {
            return Ok(CommandOutcome::AlreadyInState);
        }

        // Spawn-цепочка, приветствие, follow tick
        self.cancel_actions(owner);
        self.abandon_swap(owner);

        if self.repair_pair(owner, &snapshot, false)? == PairStatus::Missing {
            log_warning(&format!("Companion {}: both objects gone, dropping entry", owner));
            self.registry.remove(owner);
            return Ok(CommandOutcome::AlreadyInState);
        }
        let (anchor, mobile) = self.pair_handles(owner)?;

        let now = self.scheduler.elapsed();
        let busy = self.config.busy();
        if let Some(state) = self.registry.try_get_mut(owner) {
            state.lifecycle = Lifecycle::Leaving;
            state.dismiss_in_progress = true;
            state.mark_busy(now, busy);
        }

        self.backend.set_seek_target(mobile, None)?;
        self.backend.apply_buff(mobile, self.config.buffs.leaving_state, None)?;
        let leave_line = self.config.leave_line.clone();
        self.backend.set_display_name(anchor, &leave_line)?;

        let wait = Duration::from_secs_f32(self.config.dismiss_step_wait);
        let chain = self
            .scheduler
            .sequence()
            .then_wait(wait)
            .then(move |rt: &mut Self| rt.dismiss_end_phase(owner))
            .then_wait(wait)
            .then(move |rt: &mut Self| {
                rt.finish_dismiss(owner)?;
                on_complete(rt, owner);
                Ok(())
            })
            .execute();
        if let Some(state) = self.registry.try_get_mut(owner) {
            state.track(chain);
        }

        log_info(&format!("🐾 Companion {}: leaving", owner));
        Ok(CommandOutcome::Applied)
    }

    fn dismiss_end_phase(&mut self, owner: OwnerId) -> StepResult {
        let (anchor, mobile) = self.live_pair(owner)?;
        let wait = Duration::from_secs_f32(self.config.dismiss_step_wait);

        self.backend.set_interactable(mobile, false)?;
        self.backend
            .apply_buff(mobile, self.config.buffs.despawn_visual, Some(wait))?;
        self.backend.cast_ability(mobile, self.config.abilities.despawn)?;
        let farewell = self.config.farewell_line.clone();
        self.backend.set_display_name(anchor, &farewell)?;
        Ok(())
    }

    fn finish_dismiss(&mut self, owner: OwnerId) -> StepResult {
        let Some(state) = self.registry.try_get(owner) else {
            return Ok(());
        };
        if !state.dismiss_in_progress {
            // force_remove / shutdown успели раньше
            return Ok(());
        }
        let anchor = state.anchor.filter(|h| self.backend.exists(*h));
        let mobile = state.mobile.filter(|h| self.backend.exists(*h));

        if let Some(mobile) = mobile {
            if let Err(err) = self.save_inventory_snapshot(owner, mobile) {
                log_error(&format!("Companion {}: snapshot not saved on dismiss: {}", owner, err));
            }
            self.backend.remove_buff(mobile, self.config.buffs.leaving_state);
            self.backend.remove_buff(mobile, self.config.buffs.despawn_visual);
        }

        match self.config.dismiss_policy {
            DismissPolicy::Hide => {
                // Не валим шаг: иначе dismiss_in_progress останется навсегда
                if let Err(err) = self.hide_pair(anchor, mobile) {
                    log_error(&format!("Companion {}: hide incomplete: {}", owner, err));
                }
            }
            DismissPolicy::Destroy => {
                for handle in [mobile, anchor].into_iter().flatten() {
                    self.backend.clear_inventory(handle);
                    self.backend.destroy(handle);
                }
            }
        }

        let policy = self.config.dismiss_policy;
        if let Some(state) = self.registry.try_get_mut(owner) {
            state.dismiss_in_progress = false;
            state.busy_until = None;
            state.active_actions.clear();
            state.follow.reset();
            match policy {
                DismissPolicy::Hide => state.lifecycle = Lifecycle::Hidden,
                DismissPolicy::Destroy => {
                    state.lifecycle = Lifecycle::Absent;
                    state.anchor = None;
                    state.mobile = None;
                }
            }
        }
        self.evict_if_absent(owner);

        log_info(&format!("🐾 Companion {}: dismissed ({:?})", owner, policy));
        Ok(())
    }

    /// Увести пару в hidden position
    fn hide_pair(&mut self, anchor: Option<Entity>, mobile: Option<Entity>) -> Result<(), CompanionError> {
        let hidden = self.config.hidden_position();
        if let Some(mobile) = mobile {
            self.backend.release_follower(mobile);
            self.backend.set_seek_target(mobile, None)?;
            self.backend.teleport(mobile, hidden)?;
            self.backend.apply_buff(mobile, self.config.buffs.hidden_state, None)?;
        }
        if let Some(anchor) = anchor {
            self.backend.teleport(anchor, hidden + self.config.anchor_offset())?;
        }
        Ok(())
    }

    fn evict_if_absent(&mut self, owner: OwnerId) {
        if self.lifecycle(owner) == Lifecycle::Absent {
            self.registry.remove(owner);
        }
    }

    // ========================================================================
    // Forced removal
    // ========================================================================

    /// Административное удаление: объекты уничтожаются сразу
    pub fn force_remove(&mut self, owner: OwnerId) -> Result<CommandOutcome, CompanionError> {
        if !self.registry.contains(owner) {
            return Ok(CommandOutcome::AlreadyInState);
        }

        self.cancel_actions(owner);
        if let Some(state) = self.registry.remove(owner) {
            for handle in state.handles() {
                self.backend.destroy(handle);
            }
        }

        log_info(&format!("🐾 Companion {}: force removed", owner));
        Ok(CommandOutcome::Applied)
    }

    // ========================================================================
    // Pair repair
    // ========================================================================

    /// Проверить обе половины; восстановить недостающую
    ///
    /// Handle, который уже числится за другим owner'ом, считается потерянным.
    pub(super) fn repair_pair(
        &mut self,
        owner: OwnerId,
        snapshot: &OwnerSnapshot,
        recreate: bool,
    ) -> Result<PairStatus, CompanionError> {
        let Some(state) = self.registry.try_get(owner) else {
            return Err(CompanionError::NoCompanion(owner));
        };
        let anchor = state.anchor.filter(|h| self.usable_handle(owner, *h));
        let mobile = state.mobile.filter(|h| self.usable_handle(owner, *h));

        let (anchor, mobile, status) = match (anchor, mobile) {
            (Some(anchor), Some(mobile)) => {
                if self.backend.linked_mobile(anchor) == Some(mobile)
                    && self.backend.linked_anchor(mobile) == Some(anchor)
                {
                    return Ok(PairStatus::Intact);
                }
                (anchor, mobile, PairStatus::Intact)
            }
            (Some(anchor), None) => {
                let position = self
                    .backend
                    .read_position(anchor)
                    .map_or(snapshot.position, |p| p - self.config.anchor_offset());
                let prefab = self.preferred_prefab(owner);
                let mobile = self.spawn_mobile_body(snapshot.character, prefab, position)?;
                log_warning(&format!("Companion {}: body lost, rebuilt {:?}", owner, mobile));
                (anchor, mobile, PairStatus::MobileRebuilt)
            }
            (None, Some(mobile)) => {
                let position = self.backend.read_position(mobile).unwrap_or(snapshot.position);
                let name = self.config.display_name(&snapshot.name);
                let anchor = self.spawn_anchor(Some(snapshot.character), position, &name)?;
                log_warning(&format!("Companion {}: anchor lost, rebuilt {:?}", owner, anchor));
                (anchor, mobile, PairStatus::AnchorRebuilt)
            }
            (None, None) if !recreate => return Ok(PairStatus::Missing),
            (None, None) => {
                let position = self.spawn_position(snapshot);
                let prefab = self.preferred_prefab(owner);
                let mobile = self.spawn_mobile_body(snapshot.character, prefab, position)?;
                let name = self.config.display_name(&snapshot.name);
                let anchor = self.spawn_anchor(Some(snapshot.character), position, &name)?;
                (anchor, mobile, PairStatus::Created)
            }
        };

        self.bind_pair(anchor, mobile)?;
        if let Some(state) = self.registry.try_get_mut(owner) {
            state.anchor = Some(anchor);
            state.mobile = Some(mobile);
        }
        Ok(status)
    }

    /// Handle жив и не принадлежит другому owner'у
    fn usable_handle(&self, owner: OwnerId, handle: Entity) -> bool {
        if !self.backend.exists(handle) {
            return false;
        }
        if self.registry.claimed_by_other(owner, handle) {
            log_error(&format!("Companion {}: handle {:?} is owned by another companion", owner, handle));
            return false;
        }
        true
    }

    /// Пустое свежее состояние после неудачного spawn не держим
    fn drop_if_empty(&mut self, owner: OwnerId) {
        let empty = self
            .registry
            .try_get(owner)
            .is_some_and(|state| state.lifecycle == Lifecycle::Absent && state.handles().next().is_none());
        if empty {
            self.registry.remove(owner);
        }
    }
}
