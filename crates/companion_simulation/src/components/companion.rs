//! Компоненты пары компаньона: маркер, связи, имя, поведение

use bevy::prelude::*;

use crate::backend::ObjectRole;

/// Маркер формата + роль объекта в паре
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct CompanionMarker {
    pub marker: String,
    pub role: ObjectRole,
}

/// Anchor → тело
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedMobile(pub Entity);

/// Тело → anchor
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedAnchor(pub Entity);

/// Имя/реплика, которую показывает anchor
#[derive(Component, Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayName(pub String);

/// Можно ли взаимодействовать с объектом (открыть инвентарь)
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interactable {
    pub disabled: bool,
}

/// Тело следует за персонажем (мировая follower-связь)
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Follower {
    pub followed: Entity,
}

/// Боевой профиль тела
///
/// Компаньон нейтрален: не агрит и не является целью аггро.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BehaviorProfile {
    pub neutral_faction: bool,
    pub aggro_consumer: bool,
    pub aggroable: bool,
}

impl BehaviorProfile {
    pub fn passive() -> Self {
        Self {
            neutral_faction: true,
            aggro_consumer: false,
            aggroable: false,
        }
    }
}

impl Default for BehaviorProfile {
    fn default() -> Self {
        Self {
            neutral_faction: false,
            aggro_consumer: true,
            aggroable: true,
        }
    }
}
