//! World компоненты: prefab, владение, команда, время жизни

use bevy::prelude::*;

use crate::backend::PrefabId;

/// Prefab, из которого заспавнен объект
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefabRef(pub PrefabId);

/// Персонаж, которому принадлежит объект
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityOwner(pub Entity);

/// Команда (team) - объект дружественен команде этого персонажа
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Team(pub Entity);

/// Время жизни объекта в мире (секунды)
///
/// Когда `age >= duration`, объект уничтожается системой `expire_lifetimes`.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct LifeTime {
    pub duration: f32,
    pub age: f32,
}

impl LifeTime {
    pub fn new(duration: f32) -> Self {
        Self { duration, age: 0.0 }
    }

    pub fn is_expired(&self) -> bool {
        self.age >= self.duration
    }
}

/// Позиция объекта в мире (authoritative для in-memory backend)
#[derive(Component, Debug, Clone, Copy, Default, PartialEq)]
pub struct WorldPosition(pub Vec3);
