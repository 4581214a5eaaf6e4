//! Reconciliation - восстановление реестра из мира при старте
//!
//! Порядок:
//! 1. Объекты с legacy-маркером уничтожаются (buff'ы снимаются до destroy)
//! 2. Anchor'ы текущего формата: пара с legacy-высотой уничтожается,
//!    взаимно связанная пара (или anchor без тела) принимается как Hidden
//! 3. Тела текущего формата без живого anchor'а получают новый anchor
//!
//! Ничего не паникует и не прерывает проход: проблемный объект логируется
//! и пропускается. Повторный проход без изменений мира реестр не меняет.

use bevy::prelude::*;

use super::CompanionRuntime;
use crate::backend::{ObjectRole, OwnerId, WorldBackend};
use crate::companion::CompanionState;
use crate::error::CompanionError;
use crate::logger::{log, log_warning};
use crate::store::KeyValueStore;

/// Допуск при сравнении высоты anchor'а над телом
const HEIGHT_TOLERANCE: f32 = 0.5;

/// Итог прохода reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Новые записи реестра (Hidden)
    pub adopted: usize,
    /// Тела, которым построен новый anchor
    pub anchors_rebuilt: usize,
    pub legacy_purged: usize,
    /// Объекты, оставленные как есть (owner не найден, несвязанная пара, конфликт)
    pub skipped: usize,
}

impl<B: WorldBackend, S: KeyValueStore> CompanionRuntime<B, S> {
    pub(super) fn reconcile(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let tagged = self.backend.tagged_objects();

        // 1. Legacy формат
        let legacy_tag = self.config.legacy_tag.clone();
        for handle in tagged.iter().copied() {
            let is_legacy = self
                .backend
                .tag(handle)
                .is_some_and(|tag| tag.marker == legacy_tag);
            if is_legacy && self.backend.exists(handle) {
                self.purge_object(handle);
                report.legacy_purged += 1;
            }
        }

        // 2. Anchor'ы
        for anchor in self.current_objects(&tagged, ObjectRole::Anchor) {
            if !self.backend.exists(anchor) {
                // Уничтожен раньше как часть legacy-пары
                continue;
            }
            let Some(owner) = self.backend.owner_of(anchor) else {
                log_warning(&format!("Reconcile: anchor {:?} has no resolvable owner, skipped", anchor));
                report.skipped += 1;
                continue;
            };

            let mobile = self
                .backend
                .linked_mobile(anchor)
                .filter(|mobile| self.backend.exists(*mobile));
            match mobile {
                Some(mobile) if self.is_legacy_height(anchor, mobile) => {
                    log(&format!("Reconcile: legacy-height pair {:?}/{:?} purged", anchor, mobile));
                    self.purge_object(mobile);
                    self.purge_object(anchor);
                    report.legacy_purged += 2;
                }
                Some(mobile) if self.backend.linked_anchor(mobile) != Some(anchor) => {
                    log_warning(&format!(
                        "Reconcile: {:?} → {:?} is not linked back, skipped",
                        anchor, mobile
                    ));
                    report.skipped += 1;
                }
                _ => self.adopt(owner, Some(anchor), mobile, &mut report),
            }
        }

        // 3. Тела без anchor'а: anchor строим заново, тело с предметами не трогаем
        for mobile in self.current_objects(&tagged, ObjectRole::Mobile) {
            if !self.backend.exists(mobile) || self.registry.find_by_handle(mobile).is_some() {
                continue;
            }
            let anchored = self
                .backend
                .linked_anchor(mobile)
                .filter(|anchor| self.backend.exists(*anchor))
                .is_some_and(|anchor| self.backend.linked_mobile(anchor) == Some(mobile));
            if anchored {
                // Пара уже разобрана в шаге 2 (пропущена)
                continue;
            }
            let Some(owner) = self.backend.owner_of(mobile) else {
                log_warning(&format!("Reconcile: body {:?} has no resolvable owner, skipped", mobile));
                report.skipped += 1;
                continue;
            };
            if self.registry.contains(owner) {
                log_warning(&format!(
                    "Reconcile: owner {} already has a companion, orphan body {:?} skipped",
                    owner, mobile
                ));
                report.skipped += 1;
                continue;
            }

            match self.rebuild_anchor(owner, mobile) {
                Ok(anchor) => {
                    report.anchors_rebuilt += 1;
                    self.adopt(owner, Some(anchor), Some(mobile), &mut report);
                }
                Err(err) => {
                    log_warning(&format!("Reconcile: anchor for body {:?} not rebuilt: {}", mobile, err));
                    report.skipped += 1;
                }
            }
        }

        report
    }

    /// Объекты текущего формата с ролью `role`
    fn current_objects(&self, tagged: &[Entity], role: ObjectRole) -> Vec<Entity> {
        tagged
            .iter()
            .copied()
            .filter(|handle| {
                self.backend
                    .tag(*handle)
                    .is_some_and(|tag| tag.marker == self.config.companion_tag && tag.role == role)
            })
            .collect()
    }

    /// Anchor висит на legacy-высоте над телом
    fn is_legacy_height(&self, anchor: Entity, mobile: Entity) -> bool {
        match (self.backend.read_position(anchor), self.backend.read_position(mobile)) {
            (Some(anchor), Some(mobile)) => {
                let height = anchor.y - mobile.y;
                (height - self.config.legacy_anchor_height).abs() < HEIGHT_TOLERANCE
            }
            _ => false,
        }
    }

    /// Снять buff'ы и уничтожить
    fn purge_object(&mut self, handle: Entity) {
        for buff in self.backend.buffs(handle) {
            self.backend.remove_buff(handle, buff);
        }
        self.backend.destroy(handle);
    }

    fn rebuild_anchor(&mut self, owner: OwnerId, mobile: Entity) -> Result<Entity, CompanionError> {
        let leader = self.backend.resolve_owner(owner);
        let character = leader.as_ref().map(|leader| leader.character);
        let name = leader
            .as_ref()
            .map_or_else(|| self.config.display_name(&owner.to_string()), |leader| self.config.display_name(&leader.name));
        let position = self
            .backend
            .read_position(mobile)
            .unwrap_or_else(|| self.config.hidden_position());

        let anchor = self.spawn_anchor(character, position, &name)?;
        self.bind_pair(anchor, mobile)?;
        log(&format!("Reconcile: rebuilt anchor {:?} for body {:?}", anchor, mobile));
        Ok(anchor)
    }

    /// Принять пару как Hidden (idempotent для уже известных handles)
    fn adopt(&mut self, owner: OwnerId, anchor: Option<Entity>, mobile: Option<Entity>, report: &mut ReconcileReport) {
        if let Some(existing) = self.registry.try_get(owner) {
            if existing.anchor == anchor && existing.mobile == mobile {
                return;
            }
            log_warning(&format!(
                "Reconcile: owner {} already has a companion, pair {:?}/{:?} skipped",
                owner, anchor, mobile
            ));
            report.skipped += 1;
            return;
        }

        let conflict = [anchor, mobile]
            .into_iter()
            .flatten()
            .any(|handle| self.registry.claimed_by_other(owner, handle));
        if conflict {
            log_warning(&format!("Reconcile: pair of owner {} shares handles with another companion, skipped", owner));
            report.skipped += 1;
            return;
        }

        self.registry
            .insert(CompanionState::hidden(owner, anchor, mobile, &self.config.follow));
        report.adopted += 1;
        log(&format!("Reconcile: adopted companion of owner {} ({:?}/{:?})", owner, anchor, mobile));
    }
}
