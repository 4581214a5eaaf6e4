//! World backend - всё, что ядро знает о мире
//!
//! Handle объекта - `bevy::prelude::Entity` (generational arena index).
//! Ядро не трогает компоненты напрямую: только типизированные accessor'ы
//! ниже. Хост реализует трейт поверх своего движка; `EcsWorldBackend` -
//! in-memory реализация на bevy `World` (headless demo, тесты).

use bevy::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::BackendError;

mod ecs;
mod ids;

pub use ecs::EcsWorldBackend;
pub use ids::{AbilityId, BuffId, EmoteId, ItemStack, ItemTypeId, OwnerId, PrefabId};

/// Роль объекта в паре компаньона
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectRole {
    /// Стационарный объект: имя + диалог
    Anchor,
    /// Тело: двигается, держит инвентарь
    Mobile,
}

/// Маркер "этот объект - часть компаньона"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionTag {
    /// Идентификатор формата (текущий или legacy)
    pub marker: String,
    pub role: ObjectRole,
}

impl CompanionTag {
    pub fn new(marker: impl Into<String>, role: ObjectRole) -> Self {
        Self {
            marker: marker.into(),
            role,
        }
    }
}

/// Что backend знает о персонаже owner'а
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerSnapshot {
    pub owner_id: OwnerId,
    pub character: Entity,
    pub name: String,
    /// Последняя валидная позиция
    pub position: Vec3,
    /// Модуль скорости движения
    pub speed: f32,
    /// Куда owner целится (точка спавна компаньона)
    pub aim: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub prefab: PrefabId,
    pub position: Vec3,
    /// Персонаж-владелец объекта
    pub owner: Option<Entity>,
    pub lifetime: Option<Duration>,
}

/// Экипировка тела (копируется при смене внешности)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Equipment {
    pub slots: Vec<Option<ItemStack>>,
}

impl Equipment {
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

pub trait WorldBackend: 'static {
    // === Owners ===

    fn resolve_owner(&self, owner: OwnerId) -> Option<OwnerSnapshot>;

    /// Owner объекта (через владеющего персонажа)
    fn owner_of(&self, handle: Entity) -> Option<OwnerId>;

    // === Objects ===

    fn spawn(&mut self, request: SpawnRequest) -> Entity;
    fn destroy(&mut self, handle: Entity);
    fn exists(&self, handle: Entity) -> bool;
    fn prefab_of(&self, handle: Entity) -> Option<PrefabId>;
    fn read_position(&self, handle: Entity) -> Option<Vec3>;
    fn teleport(&mut self, handle: Entity, position: Vec3) -> Result<(), BackendError>;

    // === Tagging / linkage ===

    fn tag(&self, handle: Entity) -> Option<CompanionTag>;
    fn set_tag(&mut self, handle: Entity, tag: CompanionTag) -> Result<(), BackendError>;
    /// Все объекты с любым `CompanionTag` (детерминированный порядок)
    fn tagged_objects(&self) -> Vec<Entity>;
    /// Двусторонняя связь anchor ↔ mobile
    fn link(&mut self, anchor: Entity, mobile: Entity) -> Result<(), BackendError>;
    fn linked_mobile(&self, anchor: Entity) -> Option<Entity>;
    fn linked_anchor(&self, mobile: Entity) -> Option<Entity>;
    fn set_display_name(&mut self, anchor: Entity, name: &str) -> Result<(), BackendError>;
    fn display_name(&self, anchor: Entity) -> Option<String>;

    // === Behavior ===

    /// Нейтральная фракция, без аггро, follower = owner, команда owner'а
    fn configure_companion(&mut self, mobile: Entity, owner_character: Entity) -> Result<(), BackendError>;
    /// Снять follower-связь (тело больше не "принадлежит" owner'у в мире)
    fn release_follower(&mut self, mobile: Entity);
    fn set_interactable(&mut self, handle: Entity, enabled: bool) -> Result<(), BackendError>;
    fn is_interactable(&self, handle: Entity) -> bool;
    fn set_seek_target(&mut self, mobile: Entity, target: Option<Vec3>) -> Result<(), BackendError>;
    fn set_move_speed(&mut self, mobile: Entity, speed: f32) -> Result<(), BackendError>;
    fn look_at(&mut self, mobile: Entity, target: Vec3) -> Result<(), BackendError>;
    fn reset_lifetime(&mut self, handle: Entity, lifetime: Duration) -> Result<(), BackendError>;
    fn set_team(&mut self, handle: Entity, owner_character: Entity) -> Result<(), BackendError>;

    // === Abilities / buffs ===

    fn cast_ability(&mut self, caster: Entity, ability: AbilityId) -> Result<(), BackendError>;
    /// `duration: None` - бессрочно
    fn apply_buff(&mut self, target: Entity, buff: BuffId, duration: Option<Duration>) -> Result<(), BackendError>;
    fn remove_buff(&mut self, target: Entity, buff: BuffId) -> bool;
    fn has_buff(&self, target: Entity, buff: BuffId) -> bool;
    fn buffs(&self, target: Entity) -> Vec<BuffId>;

    // === Inventory ===

    fn inventory(&self, handle: Entity) -> Vec<Option<ItemStack>>;
    fn add_item(&mut self, handle: Entity, stack: ItemStack) -> Result<(), BackendError>;
    /// Перенести содержимое слота `slot` из `from` в `to`
    fn transfer_slot(&mut self, from: Entity, to: Entity, slot: usize) -> Result<(), BackendError>;
    fn clear_inventory(&mut self, handle: Entity);
    fn equipment(&self, handle: Entity) -> Option<Equipment>;
    fn set_equipment(&mut self, handle: Entity, equipment: Equipment) -> Result<(), BackendError>;

    /// Хук тика хоста (in-memory backend двигает тела, тикает buff'ы)
    fn on_tick(&mut self, _dt: Duration) {}

    // === Provided ===

    fn is_valid(&self, handle: Option<Entity>) -> bool {
        handle.is_some_and(|h| self.exists(h))
    }

    /// Инвентарь, свёрнутый по типу предмета
    fn inventory_totals(&self, handle: Entity) -> BTreeMap<ItemTypeId, u32> {
        let mut totals = BTreeMap::new();
        for stack in self.inventory(handle).into_iter().flatten() {
            *totals.entry(stack.item).or_insert(0) += stack.amount;
        }
        totals
    }

    fn total_item_count(&self, handle: Entity) -> u32 {
        self.inventory(handle)
            .into_iter()
            .flatten()
            .map(|stack| stack.amount)
            .sum()
    }
}
