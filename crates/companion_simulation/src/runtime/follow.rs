//! Follow: команды + every-tick callback
//!
//! Тело идёт не к owner'у, а по хвосту его прошлых позиций
//! (`PositionHistoryBuffer`). При большом отрыве - телепорт к owner'у.

use super::CompanionRuntime;
use crate::backend::{OwnerId, WorldBackend};
use crate::companion::{CommandOutcome, Lifecycle};
use crate::error::{ActionError, CompanionError};
use crate::logger::{log, log_info};
use crate::scheduler::{ActionId, TickFlow};
use crate::store::KeyValueStore;

impl<B: WorldBackend, S: KeyValueStore> CompanionRuntime<B, S> {
    pub fn start_follow(&mut self, owner: OwnerId) -> Result<CommandOutcome, CompanionError> {
        self.ensure_initialized()?;
        let state = self
            .registry
            .try_get(owner)
            .ok_or(CompanionError::NoCompanion(owner))?;

        match state.lifecycle {
            Lifecycle::Leaving => return Ok(CommandOutcome::AlreadyBusy),
            Lifecycle::Absent | Lifecycle::Hidden => return Err(CompanionError::NoCompanion(owner)),
            _ if state.dismiss_in_progress => return Ok(CommandOutcome::AlreadyBusy),
            _ if state.follow.active => return Ok(CommandOutcome::AlreadyInState),
            _ => {}
        }
        self.valid_handle(state.mobile)?;

        let tick = self
            .scheduler
            .every_tick(move |rt: &mut Self, id| rt.follow_tick(owner, id));

        if let Some(state) = self.registry.try_get_mut(owner) {
            state.follow.history.clear();
            state.follow.current_target = None;
            state.follow.active = true;
            state.follow.action = Some(tick);
            if state.lifecycle == Lifecycle::Idle {
                state.lifecycle = Lifecycle::Following;
            }
        }

        log_info(&format!("🐾 Companion {}: following", owner));
        Ok(CommandOutcome::Applied)
    }

    pub fn stop_follow(&mut self, owner: OwnerId) -> Result<CommandOutcome, CompanionError> {
        self.ensure_initialized()?;
        let state = self
            .registry
            .try_get(owner)
            .ok_or(CompanionError::NoCompanion(owner))?;
        if !state.follow.active {
            return Ok(CommandOutcome::AlreadyInState);
        }

        self.halt_follow(owner);
        log_info(&format!("🐾 Companion {}: stopped following", owner));
        Ok(CommandOutcome::Applied)
    }

    pub fn toggle_follow(&mut self, owner: OwnerId) -> Result<CommandOutcome, CompanionError> {
        if self.is_following(owner) {
            self.stop_follow(owner)
        } else {
            self.start_follow(owner)
        }
    }

    /// Сбросить follow-состояние, отменить tick, остановить тело
    pub(super) fn halt_follow(&mut self, owner: OwnerId) {
        let Some(state) = self.registry.try_get_mut(owner) else {
            return;
        };
        let tick = state.follow.reset();
        if state.lifecycle == Lifecycle::Following {
            state.lifecycle = Lifecycle::Idle;
        }
        let mobile = state.mobile;

        if let Some(tick) = tick {
            self.scheduler.cancel(tick);
        }
        if let Some(mobile) = mobile.filter(|m| self.backend.exists(*m)) {
            // Тело на месте, ошибка невозможна
            let _ = self.backend.set_seek_target(mobile, None);
        }
    }

    /// Провалившийся tick будет снят scheduler'ом: follow-состояние сбрасываем сразу
    fn follow_tick(&mut self, owner: OwnerId, id: ActionId) -> Result<TickFlow, ActionError> {
        let result = self.follow_step(owner, id);
        if result.is_err() {
            self.halt_follow(owner);
        }
        result
    }

    fn follow_step(&mut self, owner: OwnerId, id: ActionId) -> Result<TickFlow, ActionError> {
        let Some(state) = self.registry.try_get(owner) else {
            return Ok(TickFlow::Stop);
        };
        if state.follow.action != Some(id) {
            // Устаревший tick (follow перезапущен)
            return Ok(TickFlow::Stop);
        }

        let stopped = !state.follow.active
            || matches!(state.lifecycle, Lifecycle::Hidden | Lifecycle::Absent | Lifecycle::Leaving);
        let mobile = state.mobile.filter(|m| self.backend.exists(*m));
        let anchor = state.anchor.filter(|a| self.backend.exists(*a));
        let (Some(mobile), false) = (mobile, stopped) else {
            log(&format!("Companion {}: follow tick stopped", owner));
            self.halt_follow(owner);
            return Ok(TickFlow::Stop);
        };

        // Owner offline / без позиции - ждём
        let Some(leader) = self.backend.resolve_owner(owner) else {
            return Ok(TickFlow::Continue);
        };
        let Some(body) = self.backend.read_position(mobile) else {
            return Ok(TickFlow::Continue);
        };

        let follow = self.config.follow.clone();
        let anchor_offset = self.config.anchor_offset();
        let mounted_buff = self.config.buffs.mounted;

        // 1. Слишком далеко или другой этаж - телепорт к owner'у
        let gap = leader.position - body;
        if gap.length() > follow.max_teleport_distance || gap.y.abs() > follow.max_height_delta {
            self.backend.teleport(mobile, leader.position)?;
            self.backend.set_seek_target(mobile, None)?;
            if let Some(anchor) = anchor {
                self.backend.teleport(anchor, leader.position + anchor_offset)?;
            }
            if let Some(state) = self.registry.try_get_mut(owner) {
                state.follow.history.clear();
                state.follow.current_target = None;
            }
            log(&format!(
                "Companion {}: caught up by teleport ({:.1}m behind)",
                owner,
                gap.length()
            ));
            return Ok(TickFlow::Continue);
        }

        // 2. Хвост позиций → цель
        let Some(state) = self.registry.try_get_mut(owner) else {
            return Ok(TickFlow::Stop);
        };
        state.follow.history.sample(leader.position);
        let target = state
            .follow
            .history
            .resolve_target(body, leader.position, follow.merge_distance);
        let retarget = state
            .follow
            .current_target
            .map_or(true, |previous| previous.distance(target) > follow.retarget_epsilon);
        if retarget {
            state.follow.current_target = Some(target);
            self.backend.set_seek_target(mobile, Some(target))?;
        }

        // 3. Скорость от owner'а (верхом быстрее)
        let mounted = self.backend.has_buff(leader.character, mounted_buff);
        let mount_factor = if mounted { follow.mounted_multiplier } else { 1.0 };
        let speed = leader.speed.max(follow.min_speed) * mount_factor * follow.speed_multiplier;
        self.backend.set_move_speed(mobile, speed)?;

        // 4. Anchor висит над телом
        if let Some(anchor) = anchor {
            self.backend.teleport(anchor, body + anchor_offset)?;
        }

        Ok(TickFlow::Continue)
    }
}
