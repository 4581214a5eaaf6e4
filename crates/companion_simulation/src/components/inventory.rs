//! Inventory компоненты: слоты, экипировка, buff'ы, журнал кастов

use bevy::prelude::*;

use crate::backend::{AbilityId, BuffId, ItemStack};

/// Инвентарь фиксированного размера
///
/// Одинаковые предметы складываются в один стак.
#[derive(Component, Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    pub slots: Vec<Option<ItemStack>>,
}

impl Inventory {
    pub fn with_slots(count: usize) -> Self {
        Self {
            slots: vec![None; count],
        }
    }

    /// Добавить стак; false если места нет
    pub fn add(&mut self, stack: ItemStack) -> bool {
        if let Some(existing) = self
            .slots
            .iter_mut()
            .flatten()
            .find(|existing| existing.item == stack.item)
        {
            existing.amount += stack.amount;
            return true;
        }

        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(empty) => {
                *empty = Some(stack);
                true
            }
            None => false,
        }
    }

    pub fn take(&mut self, slot: usize) -> Option<ItemStack> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}

/// Экипировка тела
#[derive(Component, Debug, Clone, Default, PartialEq)]
pub struct ServantEquipment {
    pub slots: Vec<Option<ItemStack>>,
}

/// Активный buff: `remaining: None` - бессрочный
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveBuff {
    pub id: BuffId,
    pub remaining: Option<f32>,
}

#[derive(Component, Debug, Clone, Default, PartialEq)]
pub struct Buffs {
    pub active: Vec<ActiveBuff>,
}

impl Buffs {
    pub fn has(&self, id: BuffId) -> bool {
        self.active.iter().any(|buff| buff.id == id)
    }

    /// Повторный apply обновляет длительность
    pub fn apply(&mut self, id: BuffId, remaining: Option<f32>) {
        match self.active.iter_mut().find(|buff| buff.id == id) {
            Some(buff) => buff.remaining = remaining,
            None => self.active.push(ActiveBuff { id, remaining }),
        }
    }

    pub fn remove(&mut self, id: BuffId) -> bool {
        let before = self.active.len();
        self.active.retain(|buff| buff.id != id);
        before != self.active.len()
    }
}

/// Журнал кастов (анимации/визуалы хоста)
#[derive(Component, Debug, Clone, Default, PartialEq)]
pub struct AbilityCasts {
    pub casts: Vec<AbilityId>,
}
