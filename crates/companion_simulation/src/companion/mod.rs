//! Состояние одного компаньона + lifecycle state machine
//!
//! Переходы (все запускает `CompanionRuntime`):
//! ```text
//! Absent ──spawn──▶ Spawning ──sequence done──▶ Idle ⇄ Following
//!                      ▲                          │        │
//!                      │ spawn (reuse handles)    └─dismiss┘
//!                      │                               ▼
//!                   Hidden ◀──────finalize (Hide)── Leaving ──finalize (Destroy)──▶ Absent
//! ```
//! `force_remove` из любого состояния → Absent (entry удаляется из реестра).

use bevy::prelude::*;
use std::collections::BTreeSet;
use std::time::Duration;

use crate::backend::OwnerId;
use crate::config::FollowConfig;
use crate::follow::FollowState;
use crate::scheduler::ActionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Ни одного объекта в мире
    Absent,
    /// Spawn-цепочка идёт (settle → start → приветствие)
    Spawning,
    Idle,
    Following,
    /// Dismiss-цепочка идёт
    Leaving,
    /// Объекты живы, но спрятаны в hidden position
    Hidden,
}

impl Lifecycle {
    /// Компаньон "есть" для игрока
    pub fn is_present(self) -> bool {
        matches!(
            self,
            Lifecycle::Spawning | Lifecycle::Idle | Lifecycle::Following | Lifecycle::Leaving
        )
    }

    /// Живой и готов к командам (swap, follow)
    pub fn is_ready(self) -> bool {
        matches!(self, Lifecycle::Idle | Lifecycle::Following)
    }
}

/// Результат команды, которая не упала
///
/// `AlreadyBusy` / `AlreadyInState` - ожидаемые no-op'ы, не ошибки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    AlreadyBusy,
    AlreadyInState,
}

impl CommandOutcome {
    pub fn is_applied(self) -> bool {
        self == CommandOutcome::Applied
    }
}

#[derive(Debug, Clone)]
pub struct CompanionState {
    pub owner_id: OwnerId,
    /// Стационарный объект (имя, диалог)
    pub anchor: Option<Entity>,
    /// Тело (движение, инвентарь)
    pub mobile: Option<Entity>,
    pub lifecycle: Lifecycle,
    /// Debounce для spawn (scheduler time)
    pub busy_until: Option<Duration>,
    /// Guard от двойного dismiss (отдельно от busy)
    pub dismiss_in_progress: bool,
    pub follow: FollowState,
    /// Handles цепочек этого компаньона (follow tick хранится в `follow.action`)
    pub active_actions: BTreeSet<ActionId>,
    /// Новое тело, ожидающее завершения смены внешности
    pub pending_swap: Option<Entity>,
    /// Отложенное завершение swap (тоже лежит в `active_actions`)
    pub swap_action: Option<ActionId>,
}

impl CompanionState {
    pub fn new(owner_id: OwnerId, follow: &FollowConfig) -> Self {
        Self {
            owner_id,
            anchor: None,
            mobile: None,
            lifecycle: Lifecycle::Absent,
            busy_until: None,
            dismiss_in_progress: false,
            follow: FollowState::new(follow),
            active_actions: BTreeSet::new(),
            pending_swap: None,
            swap_action: None,
        }
    }

    /// Состояние для пары, найденной в мире при reconciliation
    pub fn hidden(owner_id: OwnerId, anchor: Option<Entity>, mobile: Option<Entity>, follow: &FollowConfig) -> Self {
        Self {
            anchor,
            mobile,
            lifecycle: Lifecycle::Hidden,
            ..Self::new(owner_id, follow)
        }
    }

    pub fn is_busy(&self, now: Duration) -> bool {
        self.busy_until.is_some_and(|until| now < until)
    }

    pub fn mark_busy(&mut self, now: Duration, busy: Duration) {
        self.busy_until = Some(now + busy);
    }

    pub fn track(&mut self, action: ActionId) {
        self.active_actions.insert(action);
    }

    pub fn untrack(&mut self, action: ActionId) {
        self.active_actions.remove(&action);
    }

    /// Забрать все handles для отмены (включая follow tick)
    pub fn take_actions(&mut self) -> Vec<ActionId> {
        self.swap_action = None;
        let mut actions: Vec<ActionId> = std::mem::take(&mut self.active_actions).into_iter().collect();
        actions.extend(self.follow.reset());
        actions
    }

    /// Все world handles, которыми владеет состояние
    pub fn handles(&self) -> impl Iterator<Item = Entity> + '_ {
        [self.anchor, self.mobile, self.pending_swap].into_iter().flatten()
    }

    pub fn owns(&self, handle: Entity) -> bool {
        self.handles().any(|owned| owned == handle)
    }
}

#[cfg(test)]
mod state_tests;
