//! Companion Simulation Core
//!
//! Оркестратор компаньонов: у каждого owner'а может быть один компаньон
//! (anchor + тело), который появляется, здоровается, следует за owner'ом,
//! уходит и прячется/уничтожается по цепочкам отложенных действий.
//!
//! Слои:
//! - scheduler: cooperative отложенные действия (один тик хоста = один `run_tick`)
//! - follow: хвост позиций owner'а для плавного следования
//! - companion + registry: state machine и owner → состояние
//! - runtime: публичные операции, reconciliation, события хоста
//! - backend / store: мир и persistent store за трейтами
//!   (`EcsWorldBackend` на bevy `World`, `MemoryStore` / `JsonFileStore`)

use bevy::prelude::*;

// Публичные модули
pub mod backend;
pub mod companion;
pub mod components;
pub mod config;
pub mod error;
pub mod follow;
pub mod logger;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod store;

// Re-export для удобства
pub use backend::{
    AbilityId, BuffId, CompanionTag, EcsWorldBackend, EmoteId, Equipment, ItemStack, ItemTypeId, ObjectRole,
    OwnerId, OwnerSnapshot, PrefabId, SpawnRequest, WorldBackend,
};
pub use companion::{CommandOutcome, CompanionState, Lifecycle};
pub use config::{AppearanceEntry, CompanionConfig, DismissPolicy, FollowConfig};
pub use error::{ActionError, BackendError, CompanionError, ConfigError, StoreError};
pub use follow::{FollowState, PositionHistoryBuffer};
pub use logger::{
    init_logger, log, log_error, log_info, log_level, log_warning, log_with_level, set_log_level, set_logger,
    set_logger_if_needed, ConsoleLogger, LogLevel, LogPrinter, MemoryLogger,
};
pub use registry::CompanionRegistry;
pub use runtime::{CompanionRuntime, EventResponse, HostEvent, InteractVerdict, ReconcileReport};
pub use scheduler::{ActionId, ActionScheduler, SchedulerHost, SequenceBuilder, StepResult, TickFlow};
pub use store::{AppearancePreferences, JsonFileStore, KeyValueStore, MemoryStore, PersistedInventorySnapshot};

/// Runtime для headless симуляции: in-memory мир + in-memory store
pub type HeadlessRuntime = CompanionRuntime<EcsWorldBackend, MemoryStore>;

/// Создаёт headless runtime (без reconciliation - хост вызывает `initialize`)
pub fn create_headless_runtime(config: CompanionConfig) -> HeadlessRuntime {
    init_logger();
    CompanionRuntime::new(EcsWorldBackend::new(), MemoryStore::new(), config)
}

/// Snapshot реестра для сравнения (детерминизм, idempotence reconciliation)
///
/// Только то, что видно снаружи: owner, handles, lifecycle, follow.
pub fn registry_snapshot<B: WorldBackend, S: KeyValueStore>(runtime: &CompanionRuntime<B, S>) -> Vec<String> {
    runtime
        .registry()
        .iter()
        .map(|state| {
            format!(
                "{}:{:?}:{:?}:{:?}:{}",
                state.owner_id,
                state.anchor.map(Entity::to_bits),
                state.mobile.map(Entity::to_bits),
                state.lifecycle,
                state.follow.active
            )
        })
        .collect()
}
