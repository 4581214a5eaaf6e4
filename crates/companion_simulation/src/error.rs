//! Ошибки ядра компаньонов
//!
//! Ожидаемые no-op ситуации (busy, уже в нужном состоянии) - НЕ ошибки,
//! они возвращаются как `CommandOutcome`.

use bevy::prelude::Entity;
use thiserror::Error;

use crate::backend::OwnerId;

/// Ошибки публичных операций `CompanionRuntime`
#[derive(Debug, Error)]
pub enum CompanionError {
    /// Owner id не резолвится в живого персонажа
    #[error("owner {0} not found")]
    OwnerNotFound(OwnerId),

    /// Операция вызвана до `initialize()` (reconciliation ещё не прошёл)
    #[error("companion runtime is not initialized")]
    NotInitialized,

    /// У owner нет компаньона в реестре
    #[error("owner {0} has no companion")]
    NoCompanion(OwnerId),

    /// Handle компаньона исчез и не может быть восстановлен для этой операции
    #[error("world handle {0:?} is no longer valid")]
    InvalidWorldHandle(Entity),

    /// Вариант внешности отсутствует в каталоге
    #[error("appearance {0} is not in the catalog")]
    UnknownAppearance(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Отказы world backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("object {0:?} does not exist")]
    MissingObject(Entity),

    #[error("inventory of {0:?} is full")]
    InventoryFull(Entity),

    #[error("slot {slot} of {entity:?} is empty")]
    EmptySlot { entity: Entity, slot: usize },
}

/// Ошибки persistent store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("store value for key '{key}' is malformed: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Ошибки загрузки конфигурации
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse failure: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Провал одного шага scheduler'а (логируется, дальше не всплывает)
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("step failed: {0}")]
    Failed(String),

    #[error("step panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Companion(#[from] CompanionError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
