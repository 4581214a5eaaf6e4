//! Movement компоненты: seek-цель, скорость, взгляд

use bevy::prelude::*;

/// Цель, к которой тело идёт само (AI seek)
///
/// `None` - стоять на месте.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq)]
pub struct SeekGoal {
    pub target: Option<Vec3>,
}

/// Скорость движения тела (метры/сек)
#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub struct MovementSpeed {
    pub speed: f32,
}

impl Default for MovementSpeed {
    fn default() -> Self {
        Self { speed: 2.0 } // 2 m/s - базовая скорость ходьбы
    }
}

/// Куда смотрит тело
#[derive(Component, Debug, Clone, Copy, Default, PartialEq)]
pub struct LookAt(pub Vec3);
