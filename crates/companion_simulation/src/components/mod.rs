//! ECS компоненты in-memory мира (`EcsWorldBackend`)
//!
//! Организация по доменам:
//! - world: prefab, владение, команда, время жизни
//! - actor: персонаж owner'а (id, имя, скорость, прицел)
//! - companion: маркер пары, связи anchor ↔ mobile, имя, поведение
//! - movement: seek-цель, скорость, look-at
//! - inventory: слоты предметов, экипировка, buff'ы, журнал кастов

pub mod actor;
pub mod companion;
pub mod inventory;
pub mod movement;
pub mod world;

pub use actor::*;
pub use companion::*;
pub use inventory::*;
pub use movement::*;
pub use world::*;
