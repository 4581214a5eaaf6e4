//! Конфигурация компаньонов
//!
//! Все длительности - секунды (f32), как и остальные тайминги симуляции.
//! Значения по умолчанию откалиброваны под 60Hz тик хоста.

use bevy::prelude::Vec3;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::{AbilityId, BuffId, EmoteId, PrefabId};
use crate::error::ConfigError;

/// Что делать с объектами после завершения dismiss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DismissPolicy {
    /// Телепорт обоих объектов в hidden position, handles переиспользуются
    #[default]
    Hide,
    /// Полное уничтожение, запись в реестре удаляется
    Destroy,
}

/// Пороги trailing-waypoint следования
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowConfig {
    /// Максимум waypoint'ов в истории
    pub history_capacity: usize,
    /// Минимальный сдвиг owner'а для новой записи в историю
    pub motion_threshold: f32,
    /// Waypoint ближе этого к компаньону считается достигнутым
    pub arrival_tolerance: f32,
    /// Ближе этого к owner'у - история сбрасывается, цель = owner
    pub merge_distance: f32,
    /// Дальше этого - телепорт прямо к owner'у
    pub max_teleport_distance: f32,
    /// Разница по высоте для телепорта (лестницы, обрывы)
    pub max_height_delta: f32,
    /// Новая seek-команда только если цель сдвинулась больше epsilon
    pub retarget_epsilon: f32,
    pub min_speed: f32,
    pub speed_multiplier: f32,
    /// Множитель скорости, когда owner верхом
    pub mounted_multiplier: f32,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            history_capacity: 8,
            motion_threshold: 0.5,
            arrival_tolerance: 0.2,
            merge_distance: 3.0,
            max_teleport_distance: 15.0,
            max_height_delta: 4.0,
            retarget_epsilon: 0.1,
            min_speed: 2.0,
            speed_multiplier: 0.95,
            mounted_multiplier: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefabConfig {
    /// Стационарный anchor (имя + диалог)
    pub anchor: PrefabId,
    /// Тело по умолчанию, если у owner'а нет сохранённой внешности
    pub default_mobile: PrefabId,
}

impl Default for PrefabConfig {
    fn default() -> Self {
        Self {
            anchor: PrefabId(723455393),
            default_mobile: PrefabId(2142021685),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuffConfig {
    pub spawning_state: BuffId,
    pub leaving_state: BuffId,
    pub hidden_state: BuffId,
    /// Визуал призыва на owner'е
    pub owner_spawn: BuffId,
    /// Owner верхом (ускоряет follow)
    pub mounted: BuffId,
    pub despawn_visual: BuffId,
    /// Неуязвимость, без аггро, immaterial - вешаются на тело навсегда
    pub mobile_permanent: Vec<BuffId>,
}

impl Default for BuffConfig {
    fn default() -> Self {
        Self {
            spawning_state: BuffId(1497959076),
            leaving_state: BuffId(826269213),
            hidden_state: BuffId(-1144825660),
            owner_spawn: BuffId(-1879665573),
            mounted: BuffId(-978792376),
            despawn_visual: BuffId(1185694153),
            mobile_permanent: vec![BuffId(-480024072), BuffId(1934061152), BuffId(1360141727)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityConfig {
    pub spawn: AbilityId,
    pub despawn: AbilityId,
    /// Каст полёта owner'ом автоматически отпускает компаньона
    pub flight: AbilityId,
}

impl Default for AbilityConfig {
    fn default() -> Self {
        Self {
            spawn: AbilityId(2072201164),
            despawn: AbilityId(-597709516),
            flight: AbilityId(-104327922),
        }
    }
}

/// Эмоуты, привязанные к командам
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmoteBindings {
    pub spawn: EmoteId,
    pub dismiss: EmoteId,
    pub toggle_follow: EmoteId,
}

impl Default for EmoteBindings {
    fn default() -> Self {
        Self {
            spawn: EmoteId(-1525577000),
            dismiss: EmoteId(-53273186),
            toggle_follow: EmoteId(-452406649),
        }
    }
}

/// Вариант внешности из каталога
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppearanceEntry {
    pub name: String,
    pub prefab: PrefabId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Частота тика хоста (для перевода тиков ↔ секунд)
    pub tick_rate_hz: f32,
    /// Debounce повторного spawn
    pub busy_duration: f32,
    /// Тики ожидания после spawn (визуал успевает осесть)
    pub spawn_settle_ticks: u32,
    /// Пауза между start-phase и приветствием
    pub greeting_delay: f32,
    pub greeting_line_interval: f32,
    pub greeting_lines: Vec<String>,
    /// `{owner}` заменяется на имя владельца
    pub name_format: String,
    pub leave_line: String,
    pub farewell_line: String,
    /// Пауза между шагами dismiss
    pub dismiss_step_wait: f32,
    pub dismiss_policy: DismissPolicy,
    pub hidden_position: [f32; 3],
    /// Anchor висит над телом на этой высоте
    pub anchor_height: f32,
    /// Высота anchor'а в старом формате (миграция)
    pub legacy_anchor_height: f32,
    pub companion_tag: String,
    pub legacy_tag: String,
    pub max_spawn_distance: f32,
    pub swap_settle_ticks: u32,
    /// Время жизни объектов в мире
    pub expire_days: u32,
    pub follow: FollowConfig,
    pub prefabs: PrefabConfig,
    pub buffs: BuffConfig,
    pub abilities: AbilityConfig,
    pub emotes: EmoteBindings,
    pub appearances: Vec<AppearanceEntry>,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60.0,
            busy_duration: 1.5,
            spawn_settle_ticks: 5,
            greeting_delay: 2.0,
            greeting_line_interval: 1.5,
            greeting_lines: vec![
                "Hi, I'm your companion.".to_string(),
                "You can give me your items to store them.".to_string(),
                "Once you are done, please dismiss me.".to_string(),
            ],
            name_format: "{owner}'s Companion".to_string(),
            leave_line: "All right, I'm about to head out.".to_string(),
            farewell_line: "See you later!".to_string(),
            dismiss_step_wait: 2.0,
            dismiss_policy: DismissPolicy::Hide,
            hidden_position: [-359.0, 15.0, -280.0],
            anchor_height: 215.0,
            legacy_anchor_height: 221.0,
            companion_tag: "__companion_v2__".to_string(),
            legacy_tag: "__companion__".to_string(),
            max_spawn_distance: 3.0,
            swap_settle_ticks: 5,
            expire_days: 7,
            follow: FollowConfig::default(),
            prefabs: PrefabConfig::default(),
            buffs: BuffConfig::default(),
            abilities: AbilityConfig::default(),
            emotes: EmoteBindings::default(),
            appearances: vec![AppearanceEntry {
                name: "Servant".to_string(),
                prefab: PrefabConfig::default().default_mobile,
            }],
        }
    }
}

impl CompanionConfig {
    /// Загрузить из TOML (отсутствующие поля - default)
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_rate_hz > 0.0) {
            return Err(invalid("tick_rate_hz", "must be positive"));
        }
        if !(self.greeting_line_interval > 0.0) {
            return Err(invalid("greeting_line_interval", "must be positive"));
        }
        if self.busy_duration < 0.0 || self.greeting_delay < 0.0 || self.dismiss_step_wait < 0.0 {
            return Err(invalid("durations", "must not be negative"));
        }
        if self.follow.history_capacity == 0 {
            return Err(invalid("follow.history_capacity", "must hold at least one waypoint"));
        }
        if self.follow.merge_distance < 0.0 || self.follow.max_teleport_distance <= self.follow.merge_distance {
            return Err(invalid(
                "follow.max_teleport_distance",
                "must exceed follow.merge_distance",
            ));
        }
        if self.companion_tag.is_empty() || self.companion_tag == self.legacy_tag {
            return Err(invalid("companion_tag", "must be non-empty and differ from legacy_tag"));
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.tick_rate_hz)
    }

    pub fn busy(&self) -> Duration {
        Duration::from_secs_f32(self.busy_duration)
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(u64::from(self.expire_days) * 24 * 60 * 60)
    }

    pub fn hidden_position(&self) -> Vec3 {
        Vec3::from_array(self.hidden_position)
    }

    pub fn anchor_offset(&self) -> Vec3 {
        Vec3::new(0.0, self.anchor_height, 0.0)
    }

    pub fn display_name(&self, owner_name: &str) -> String {
        self.name_format.replace("{owner}", owner_name)
    }

    /// Полная длительность spawn-цепочки (settle + пауза + все строки приветствия)
    pub fn spawn_sequence_duration(&self) -> Duration {
        let settle = self.tick_duration() * self.spawn_settle_ticks;
        let lines = self.greeting_lines.len() as f32 + 1.0;
        settle + Duration::from_secs_f32(self.greeting_delay + self.greeting_line_interval * lines)
    }

    pub fn dismiss_sequence_duration(&self) -> Duration {
        Duration::from_secs_f32(self.dismiss_step_wait * 2.0)
    }

    /// Appearance по 1-based номеру в каталоге
    pub fn appearance_by_index(&self, number: usize) -> Option<&AppearanceEntry> {
        number.checked_sub(1).and_then(|index| self.appearances.get(index))
    }

    pub fn appearance_for(&self, prefab: PrefabId) -> Option<&AppearanceEntry> {
        self.appearances.iter().find(|entry| entry.prefab == prefab)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
