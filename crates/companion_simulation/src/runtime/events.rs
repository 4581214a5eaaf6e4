//! Реакции на события хоста
//!
//! Хост сам ловит эмоуты, касты, изменения инвентаря и попытки
//! взаимодействия, и передаёт их сюда как `HostEvent`.

use bevy::prelude::*;

use super::CompanionRuntime;
use crate::backend::{AbilityId, EmoteId, OwnerId, WorldBackend};
use crate::companion::CommandOutcome;
use crate::error::CompanionError;
use crate::logger::log;
use crate::store::KeyValueStore;

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Owner использовал эмоут (привязанные: spawn / dismiss / toggle follow)
    EmoteUsed { owner: OwnerId, emote: EmoteId },
    /// Owner начал каст способности
    AbilityCastStarted { owner: OwnerId, ability: AbilityId },
    /// Инвентарь объекта изменился; `moved` - перестановка внутри инвентаря
    InventoryChanged { inventory_owner: Entity, moved: bool },
    /// Персонаж owner'а `actor` пытается открыть/использовать `target`
    InteractAttempt { actor: OwnerId, target: Entity },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractVerdict {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResponse {
    /// Событие не касается компаньонов
    Ignored,
    Command(CommandOutcome),
    SnapshotSaved,
    Interact(InteractVerdict),
}

impl<B: WorldBackend, S: KeyValueStore> CompanionRuntime<B, S> {
    pub fn handle_event(&mut self, event: HostEvent) -> Result<EventResponse, CompanionError> {
        match event {
            HostEvent::EmoteUsed { owner, emote } => {
                let emotes = self.config.emotes.clone();
                let outcome = if emote == emotes.spawn {
                    self.spawn(owner)?
                } else if emote == emotes.dismiss {
                    self.dismiss(owner)?
                } else if emote == emotes.toggle_follow {
                    self.toggle_follow(owner)?
                } else {
                    return Ok(EventResponse::Ignored);
                };
                Ok(EventResponse::Command(outcome))
            }

            HostEvent::AbilityCastStarted { owner, ability } => {
                // Полёт: компаньон не успевает, уходит
                if ability != self.config.abilities.flight || !self.has_companion(owner) {
                    return Ok(EventResponse::Ignored);
                }
                log(&format!("Companion {}: owner took flight", owner));
                Ok(EventResponse::Command(self.dismiss(owner)?))
            }

            HostEvent::InventoryChanged { inventory_owner, moved } => {
                let Some(owner) = self.companion_of_body(inventory_owner) else {
                    return Ok(EventResponse::Ignored);
                };
                if moved {
                    return Ok(EventResponse::Ignored);
                }
                self.save_inventory_snapshot(owner, inventory_owner)?;
                Ok(EventResponse::SnapshotSaved)
            }

            HostEvent::InteractAttempt { actor, target } => {
                let verdict = match self.companion_of_body(target) {
                    Some(owner) if owner != actor => {
                        log(&format!("Companion {}: interaction by {} denied", owner, actor));
                        InteractVerdict::Deny
                    }
                    _ => InteractVerdict::Allow,
                };
                Ok(EventResponse::Interact(verdict))
            }
        }
    }

    /// Owner, чьим телом является `handle`
    fn companion_of_body(&self, handle: Entity) -> Option<OwnerId> {
        self.registry
            .iter()
            .find(|state| state.mobile == Some(handle))
            .map(|state| state.owner_id)
    }
}
