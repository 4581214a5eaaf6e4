//! Персонаж owner'а

use bevy::prelude::*;

use crate::backend::OwnerId;

/// Персонаж игрока, которому может принадлежать компаньон
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct OwnerCharacter {
    pub owner_id: OwnerId,
    pub name: String,
}

/// Модуль скорости движения персонажа (м/с)
#[derive(Component, Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveVelocity {
    pub magnitude: f32,
}

/// Точка прицела персонажа
#[derive(Component, Debug, Clone, Copy, Default, PartialEq)]
pub struct AimPosition(pub Vec3);
