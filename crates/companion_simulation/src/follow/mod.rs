//! Trailing-waypoint следование
//!
//! Компаньон идёт не к текущей позиции owner'а, а по следу из недавних
//! позиций (`PositionHistoryBuffer`). Так движение плавное: цель не
//! дёргается каждый тик вместе с owner'ом.

use bevy::prelude::Vec3;
use std::collections::VecDeque;

use crate::config::FollowConfig;
use crate::scheduler::ActionId;

/// Bounded FIFO позиций owner'а
#[derive(Debug, Clone, PartialEq)]
pub struct PositionHistoryBuffer {
    samples: VecDeque<Vec3>,
    capacity: usize,
    motion_threshold: f32,
    arrival_tolerance: f32,
}

impl PositionHistoryBuffer {
    pub fn new(capacity: usize, motion_threshold: f32, arrival_tolerance: f32) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            motion_threshold,
            arrival_tolerance,
        }
    }

    pub fn from_config(config: &FollowConfig) -> Self {
        Self::new(
            config.history_capacity,
            config.motion_threshold,
            config.arrival_tolerance,
        )
    }

    /// Добавить позицию, если owner сдвинулся дальше motion threshold
    ///
    /// Возвращает true, если сэмпл записан.
    pub fn sample(&mut self, position: Vec3) -> bool {
        if let Some(last) = self.samples.back() {
            if last.distance(position) <= self.motion_threshold {
                return false;
            }
        }

        self.samples.push_back(position);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        true
    }

    /// Текущая цель следования
    ///
    /// - история пуста или компаньон уже в `merge_distance` от owner'а →
    ///   история сбрасывается, цель = owner
    /// - иначе отбрасываем waypoint'ы, до которых компаньон уже дошёл,
    ///   и возвращаем самый старый оставшийся
    pub fn resolve_target(&mut self, companion: Vec3, owner: Vec3, merge_distance: f32) -> Vec3 {
        if self.samples.is_empty() || companion.distance(owner) <= merge_distance {
            self.samples.clear();
            return owner;
        }

        while let Some(front) = self.samples.front() {
            if front.distance(companion) > self.arrival_tolerance {
                break;
            }
            self.samples.pop_front();
        }

        self.samples.front().copied().unwrap_or(owner)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<Vec3> {
        self.samples.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec3> {
        self.samples.iter()
    }
}

impl Default for PositionHistoryBuffer {
    fn default() -> Self {
        Self::from_config(&FollowConfig::default())
    }
}

/// Follow-состояние одного компаньона
#[derive(Debug, Clone, Default)]
pub struct FollowState {
    pub active: bool,
    pub history: PositionHistoryBuffer,
    /// Последняя цель, отправленная телу как seek-команда
    pub current_target: Option<Vec3>,
    /// Handle every-tick действия
    pub action: Option<ActionId>,
}

impl FollowState {
    pub fn new(config: &FollowConfig) -> Self {
        Self {
            active: false,
            history: PositionHistoryBuffer::from_config(config),
            current_target: None,
            action: None,
        }
    }

    /// Сбросить всё, кроме конфигурации буфера; возвращает handle для отмены
    pub fn reset(&mut self) -> Option<ActionId> {
        self.active = false;
        self.history.clear();
        self.current_target = None;
        self.action.take()
    }
}
