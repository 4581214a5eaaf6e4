//! CompanionRuntime - точка входа для хоста
//!
//! Держит backend, store, конфиг, реестр и scheduler. Публичные операции
//! разнесены по подмодулям:
//! - lifecycle: spawn / dismiss / force_remove
//! - follow: start / stop / toggle + follow tick
//! - appearance: смена внешности тела
//! - reconcile: восстановление реестра из мира при старте
//! - events: реакции на события хоста (эмоуты, касты, инвентарь)
//!
//! Все запланированные шаги захватывают только `OwnerId` и на каждом шаге
//! заново ищут состояние в реестре.

use bevy::prelude::*;
use std::time::Duration;

use crate::backend::{CompanionTag, ObjectRole, OwnerId, OwnerSnapshot, PrefabId, SpawnRequest, WorldBackend};
use crate::companion::{CompanionState, Lifecycle};
use crate::config::CompanionConfig;
use crate::error::{ActionError, CompanionError};
use crate::logger::{log, log_info, log_warning};
use crate::registry::CompanionRegistry;
use crate::scheduler::{ActionScheduler, SchedulerHost};
use crate::store::{AppearancePreferences, KeyValueStore, PersistedInventorySnapshot};

mod appearance;
mod events;
mod follow;
mod lifecycle;
mod reconcile;

pub use events::{EventResponse, HostEvent, InteractVerdict};
pub use reconcile::ReconcileReport;

pub struct CompanionRuntime<B: WorldBackend, S: KeyValueStore> {
    backend: B,
    store: S,
    config: CompanionConfig,
    registry: CompanionRegistry,
    scheduler: ActionScheduler<Self>,
    initialized: bool,
}

impl<B: WorldBackend, S: KeyValueStore> SchedulerHost for CompanionRuntime<B, S> {
    fn scheduler(&mut self) -> &mut ActionScheduler<Self> {
        &mut self.scheduler
    }
}

impl<B: WorldBackend, S: KeyValueStore> CompanionRuntime<B, S> {
    pub fn new(backend: B, store: S, config: CompanionConfig) -> Self {
        Self {
            backend,
            store,
            config,
            registry: CompanionRegistry::new(),
            scheduler: ActionScheduler::new(),
            initialized: false,
        }
    }

    // === Accessors ===

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn config(&self) -> &CompanionConfig {
        &self.config
    }

    pub fn registry(&self) -> &CompanionRegistry {
        &self.registry
    }

    pub fn actions(&self) -> &ActionScheduler<Self> {
        &self.scheduler
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    // === Process lifecycle ===

    /// Reconciliation, после которого принимаются команды
    pub fn initialize(&mut self) -> ReconcileReport {
        let report = self.reconcile();
        self.initialized = true;
        log_info(&format!(
            "🐾 Companions initialized: {} adopted, {} anchors rebuilt, {} legacy objects purged, {} skipped",
            report.adopted, report.anchors_rebuilt, report.legacy_purged, report.skipped
        ));
        report
    }

    /// Отменить все действия; `destroy_live` - ещё и уничтожить все пары
    pub fn shutdown(&mut self, destroy_live: bool) {
        let cancelled = self.scheduler.cancel_all();

        for state in self.registry.iter_mut() {
            state.take_actions();
            state.dismiss_in_progress = false;
            state.pending_swap = None;
            // Цепочек больше нет: переходное состояние никто не завершит
            state.lifecycle = match state.lifecycle {
                Lifecycle::Spawning | Lifecycle::Leaving => Lifecycle::Hidden,
                Lifecycle::Following => Lifecycle::Idle,
                settled => settled,
            };
            state.busy_until = None;
        }

        if destroy_live {
            let handles: Vec<Entity> = self.registry.iter().flat_map(|state| state.handles()).collect();
            for handle in handles {
                self.backend.destroy(handle);
            }
            self.registry.clear();
        }

        self.initialized = false;
        log_info(&format!(
            "🐾 Companions shut down ({} actions cancelled, destroy_live: {})",
            cancelled, destroy_live
        ));
    }

    /// Один тик хоста: сначала мир, потом scheduler
    pub fn tick(&mut self, dt: Duration) {
        self.backend.on_tick(dt);
        ActionScheduler::run_tick(self, dt);
    }

    /// Тикать с частотой из конфига, пока не пройдёт `duration`; возвращает число тиков
    pub fn run_for(&mut self, duration: Duration) -> u32 {
        let dt = self.config.tick_duration();
        let mut elapsed = Duration::ZERO;
        let mut ticks = 0;
        while elapsed < duration {
            self.tick(dt);
            elapsed += dt;
            ticks += 1;
        }
        ticks
    }

    // === Queries ===

    pub fn has_companion(&self, owner: OwnerId) -> bool {
        self.registry
            .try_get(owner)
            .is_some_and(|state| state.lifecycle.is_present())
    }

    pub fn is_following(&self, owner: OwnerId) -> bool {
        self.registry
            .try_get(owner)
            .is_some_and(|state| state.follow.active)
    }

    pub fn get_companion(&self, owner: OwnerId) -> Option<&CompanionState> {
        self.registry.try_get(owner)
    }

    pub fn lifecycle(&self, owner: OwnerId) -> Lifecycle {
        self.registry
            .try_get(owner)
            .map_or(Lifecycle::Absent, |state| state.lifecycle)
    }

    // === Shared helpers ===

    fn ensure_initialized(&self) -> Result<(), CompanionError> {
        if self.initialized {
            Ok(())
        } else {
            Err(CompanionError::NotInitialized)
        }
    }

    fn resolve_owner(&self, owner: OwnerId) -> Result<OwnerSnapshot, CompanionError> {
        self.backend
            .resolve_owner(owner)
            .ok_or(CompanionError::OwnerNotFound(owner))
    }

    /// Обе половины живы
    fn pair_handles(&self, owner: OwnerId) -> Result<(Entity, Entity), CompanionError> {
        let state = self
            .registry
            .try_get(owner)
            .ok_or(CompanionError::NoCompanion(owner))?;
        let anchor = self.valid_handle(state.anchor)?;
        let mobile = self.valid_handle(state.mobile)?;
        Ok((anchor, mobile))
    }

    /// `pair_handles` для шагов scheduler'а
    fn live_pair(&self, owner: OwnerId) -> Result<(Entity, Entity), ActionError> {
        Ok(self.pair_handles(owner)?)
    }

    fn valid_handle(&self, handle: Option<Entity>) -> Result<Entity, CompanionError> {
        match handle {
            Some(handle) if self.backend.exists(handle) => Ok(handle),
            Some(handle) => Err(CompanionError::InvalidWorldHandle(handle)),
            None => Err(CompanionError::InvalidWorldHandle(Entity::PLACEHOLDER)),
        }
    }

    /// Prefab тела по сохранённому выбору owner'а (только из каталога)
    fn preferred_prefab(&self, owner: OwnerId) -> PrefabId {
        let default = self.config.prefabs.default_mobile;
        match AppearancePreferences::load(&self.store) {
            Ok(preferences) => preferences
                .get(owner)
                .filter(|prefab| self.config.appearance_for(*prefab).is_some())
                .unwrap_or(default),
            Err(err) => {
                log_warning(&format!("Companion {}: appearance preferences unreadable: {}", owner, err));
                default
            }
        }
    }

    /// Новое тело: prefab, владелец, lifetime, поведение, постоянные buff'ы
    ///
    /// Тег и связь с anchor ставит `bind_pair`.
    fn spawn_mobile_body(&mut self, character: Entity, prefab: PrefabId, position: Vec3) -> Result<Entity, CompanionError> {
        let mobile = self.backend.spawn(SpawnRequest {
            prefab,
            position,
            owner: Some(character),
            lifetime: Some(self.config.lifetime()),
        });
        self.backend.configure_companion(mobile, character)?;
        for buff in self.config.buffs.mobile_permanent.clone() {
            self.backend.apply_buff(mobile, buff, None)?;
        }
        log(&format!("Companion: spawned body {:?} (prefab {})", mobile, prefab));
        Ok(mobile)
    }

    /// Новый anchor над телом
    fn spawn_anchor(&mut self, character: Option<Entity>, mobile_position: Vec3, name: &str) -> Result<Entity, CompanionError> {
        let anchor = self.backend.spawn(SpawnRequest {
            prefab: self.config.prefabs.anchor,
            position: mobile_position + self.config.anchor_offset(),
            owner: character,
            lifetime: Some(self.config.lifetime()),
        });
        if let Some(character) = character {
            self.backend.set_team(anchor, character)?;
        }
        self.backend.set_display_name(anchor, name)?;
        log(&format!("Companion: spawned anchor {:?}", anchor));
        Ok(anchor)
    }

    /// Теги текущего формата + двусторонняя связь
    fn bind_pair(&mut self, anchor: Entity, mobile: Entity) -> Result<(), CompanionError> {
        let marker = self.config.companion_tag.clone();
        self.backend
            .set_tag(anchor, CompanionTag::new(marker.clone(), ObjectRole::Anchor))?;
        self.backend
            .set_tag(mobile, CompanionTag::new(marker, ObjectRole::Mobile))?;
        self.backend.link(anchor, mobile)?;
        Ok(())
    }

    /// Сохранить инвентарь тела (по типам предметов) для owner'а
    fn save_inventory_snapshot(&mut self, owner: OwnerId, mobile: Entity) -> Result<(), CompanionError> {
        let snapshot = PersistedInventorySnapshot::from(self.backend.inventory_totals(mobile));
        snapshot.save(&mut self.store, owner)?;
        log(&format!("Companion {}: inventory snapshot saved ({} items)", owner, snapshot.total()));
        Ok(())
    }

    /// Отменить все действия компаньона
    fn cancel_actions(&mut self, owner: OwnerId) {
        let actions = self
            .registry
            .try_get_mut(owner)
            .map(CompanionState::take_actions)
            .unwrap_or_default();
        for action in actions {
            self.scheduler.cancel(action);
        }
    }
}
