//! In-memory world backend на bevy `World`
//!
//! Объекты - entity с компонентами из `crate::components`. Тик мира
//! (`on_tick`) гоняет single-threaded `Schedule`:
//! 1. tick_buffs - истечение временных buff'ов
//! 2. move_seeking_bodies - тела идут к `SeekGoal`
//! 3. expire_lifetimes - уничтожение объектов с истёкшим `LifeTime`

use bevy::ecs::schedule::ExecutorKind;
use bevy::prelude::*;
use std::collections::HashMap;
use std::time::Duration;

use super::{
    AbilityId, BuffId, CompanionTag, Equipment, ItemStack, ObjectRole, OwnerId, OwnerSnapshot,
    PrefabId, SpawnRequest, WorldBackend,
};
use crate::components::*;
use crate::error::BackendError;

/// Сколько слотов инвентаря получает каждый заспавненный объект
pub const DEFAULT_INVENTORY_SLOTS: usize = 24;

/// dt текущего тика мира (секунды)
#[derive(Resource, Default)]
struct SimDelta(f32);

pub struct EcsWorldBackend {
    world: World,
    schedule: Schedule,
    owners: HashMap<OwnerId, Entity>,
    inventory_slots: usize,
}

impl Default for EcsWorldBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EcsWorldBackend {
    pub fn new() -> Self {
        Self::with_inventory_slots(DEFAULT_INVENTORY_SLOTS)
    }

    pub fn with_inventory_slots(inventory_slots: usize) -> Self {
        let mut world = World::new();
        world.init_resource::<SimDelta>();

        let mut schedule = Schedule::default();
        // Host tick model однопоточный - executor тоже
        schedule.set_executor_kind(ExecutorKind::SingleThreaded);
        schedule.add_systems((tick_buffs, move_seeking_bodies, expire_lifetimes).chain());

        Self {
            world,
            schedule,
            owners: HashMap::new(),
            inventory_slots,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    // === Host helpers (персонажи игроков) ===

    pub fn spawn_owner(&mut self, owner_id: OwnerId, name: &str, position: Vec3) -> Entity {
        let character = self
            .world
            .spawn((
                OwnerCharacter {
                    owner_id,
                    name: name.to_string(),
                },
                WorldPosition(position),
                MoveVelocity::default(),
                AimPosition(position),
                Buffs::default(),
                AbilityCasts::default(),
            ))
            .id();
        self.owners.insert(owner_id, character);
        character
    }

    /// Owner вышел из игры
    pub fn remove_owner(&mut self, owner_id: OwnerId) {
        if let Some(character) = self.owners.remove(&owner_id) {
            self.destroy(character);
        }
    }

    pub fn move_owner(&mut self, owner_id: OwnerId, position: Vec3) {
        if let Some(character) = self.character(owner_id) {
            self.world.entity_mut(character).insert(WorldPosition(position));
        }
    }

    pub fn set_owner_speed(&mut self, owner_id: OwnerId, magnitude: f32) {
        if let Some(character) = self.character(owner_id) {
            self.world.entity_mut(character).insert(MoveVelocity { magnitude });
        }
    }

    pub fn set_owner_aim(&mut self, owner_id: OwnerId, aim: Vec3) {
        if let Some(character) = self.character(owner_id) {
            self.world.entity_mut(character).insert(AimPosition(aim));
        }
    }

    pub fn character(&self, owner_id: OwnerId) -> Option<Entity> {
        self.owners
            .get(&owner_id)
            .copied()
            .filter(|character| self.exists(*character))
    }

    // === Inspection ===

    pub fn ability_casts(&self, handle: Entity) -> Vec<AbilityId> {
        self.world
            .get::<AbilityCasts>(handle)
            .map(|log| log.casts.clone())
            .unwrap_or_default()
    }

    pub fn seek_target(&self, handle: Entity) -> Option<Vec3> {
        self.world.get::<SeekGoal>(handle).and_then(|goal| goal.target)
    }

    pub fn move_speed(&self, handle: Entity) -> Option<f32> {
        self.world.get::<MovementSpeed>(handle).map(|speed| speed.speed)
    }

    pub fn look_target(&self, handle: Entity) -> Option<Vec3> {
        self.world.get::<LookAt>(handle).map(|look| look.0)
    }

    pub fn lifetime(&self, handle: Entity) -> Option<LifeTime> {
        self.world.get::<LifeTime>(handle).copied()
    }

    pub fn behavior(&self, handle: Entity) -> Option<BehaviorProfile> {
        self.world.get::<BehaviorProfile>(handle).copied()
    }

    pub fn followed(&self, handle: Entity) -> Option<Entity> {
        self.world.get::<Follower>(handle).map(|follower| follower.followed)
    }

    /// Объекты с данным маркером (и ролью, если задана)
    pub fn count_tagged(&self, marker: &str, role: Option<ObjectRole>) -> usize {
        self.tagged_objects()
            .into_iter()
            .filter_map(|handle| self.tag(handle))
            .filter(|tag| tag.marker == marker && role.map_or(true, |r| r == tag.role))
            .count()
    }

    fn require(&self, handle: Entity) -> Result<(), BackendError> {
        if self.exists(handle) {
            Ok(())
        } else {
            Err(BackendError::MissingObject(handle))
        }
    }
}

impl WorldBackend for EcsWorldBackend {
    fn resolve_owner(&self, owner: OwnerId) -> Option<OwnerSnapshot> {
        let character = self.character(owner)?;
        let info = self.world.get::<OwnerCharacter>(character)?;
        let position = self.world.get::<WorldPosition>(character)?.0;
        let speed = self
            .world
            .get::<MoveVelocity>(character)
            .map(|v| v.magnitude)
            .unwrap_or_default();
        let aim = self
            .world
            .get::<AimPosition>(character)
            .map(|a| a.0)
            .unwrap_or(position);

        Some(OwnerSnapshot {
            owner_id: info.owner_id,
            character,
            name: info.name.clone(),
            position,
            speed,
            aim,
        })
    }

    fn owner_of(&self, handle: Entity) -> Option<OwnerId> {
        let character = self.world.get::<EntityOwner>(handle)?.0;
        self.world
            .get::<OwnerCharacter>(character)
            .map(|info| info.owner_id)
    }

    fn spawn(&mut self, request: SpawnRequest) -> Entity {
        let mut entity = self.world.spawn((
            PrefabRef(request.prefab),
            WorldPosition(request.position),
            Inventory::with_slots(self.inventory_slots),
            ServantEquipment::default(),
            Buffs::default(),
            AbilityCasts::default(),
            Interactable::default(),
            SeekGoal::default(),
            MovementSpeed::default(),
        ));

        if let Some(owner) = request.owner {
            entity.insert(EntityOwner(owner));
        }
        if let Some(lifetime) = request.lifetime {
            entity.insert(LifeTime::new(lifetime.as_secs_f32()));
        }

        entity.id()
    }

    fn destroy(&mut self, handle: Entity) {
        if self.exists(handle) {
            self.world.despawn(handle);
        }
    }

    fn exists(&self, handle: Entity) -> bool {
        self.world.entities().contains(handle)
    }

    fn prefab_of(&self, handle: Entity) -> Option<PrefabId> {
        self.world.get::<PrefabRef>(handle).map(|prefab| prefab.0)
    }

    fn read_position(&self, handle: Entity) -> Option<Vec3> {
        self.world.get::<WorldPosition>(handle).map(|p| p.0)
    }

    fn teleport(&mut self, handle: Entity, position: Vec3) -> Result<(), BackendError> {
        self.require(handle)?;
        self.world.entity_mut(handle).insert(WorldPosition(position));
        Ok(())
    }

    fn tag(&self, handle: Entity) -> Option<CompanionTag> {
        self.world
            .get::<CompanionMarker>(handle)
            .map(|marker| CompanionTag::new(marker.marker.clone(), marker.role))
    }

    fn set_tag(&mut self, handle: Entity, tag: CompanionTag) -> Result<(), BackendError> {
        self.require(handle)?;
        self.world.entity_mut(handle).insert(CompanionMarker {
            marker: tag.marker,
            role: tag.role,
        });
        Ok(())
    }

    fn tagged_objects(&self) -> Vec<Entity> {
        let Some(mut query) = self.world.try_query::<(Entity, &CompanionMarker)>() else {
            return Vec::new();
        };

        let mut handles: Vec<Entity> = query.iter(&self.world).map(|(entity, _)| entity).collect();
        // Сортируем по Entity для детерминизма
        handles.sort_by_key(|entity| (entity.index(), entity.generation()));
        handles
    }

    fn link(&mut self, anchor: Entity, mobile: Entity) -> Result<(), BackendError> {
        self.require(anchor)?;
        self.require(mobile)?;
        self.world.entity_mut(anchor).insert(ConnectedMobile(mobile));
        self.world.entity_mut(mobile).insert(ConnectedAnchor(anchor));
        Ok(())
    }

    fn linked_mobile(&self, anchor: Entity) -> Option<Entity> {
        self.world.get::<ConnectedMobile>(anchor).map(|link| link.0)
    }

    fn linked_anchor(&self, mobile: Entity) -> Option<Entity> {
        self.world.get::<ConnectedAnchor>(mobile).map(|link| link.0)
    }

    fn set_display_name(&mut self, anchor: Entity, name: &str) -> Result<(), BackendError> {
        self.require(anchor)?;
        self.world.entity_mut(anchor).insert(DisplayName(name.to_string()));
        Ok(())
    }

    fn display_name(&self, anchor: Entity) -> Option<String> {
        self.world.get::<DisplayName>(anchor).map(|name| name.0.clone())
    }

    fn configure_companion(&mut self, mobile: Entity, owner_character: Entity) -> Result<(), BackendError> {
        self.require(mobile)?;
        self.world.entity_mut(mobile).insert((
            BehaviorProfile::passive(),
            Follower {
                followed: owner_character,
            },
            Team(owner_character),
        ));
        Ok(())
    }

    fn release_follower(&mut self, mobile: Entity) {
        if self.exists(mobile) {
            self.world.entity_mut(mobile).remove::<Follower>();
        }
    }

    fn set_interactable(&mut self, handle: Entity, enabled: bool) -> Result<(), BackendError> {
        self.require(handle)?;
        self.world
            .entity_mut(handle)
            .insert(Interactable { disabled: !enabled });
        Ok(())
    }

    fn is_interactable(&self, handle: Entity) -> bool {
        self.world
            .get::<Interactable>(handle)
            .is_some_and(|interactable| !interactable.disabled)
    }

    fn set_seek_target(&mut self, mobile: Entity, target: Option<Vec3>) -> Result<(), BackendError> {
        self.require(mobile)?;
        self.world.entity_mut(mobile).insert(SeekGoal { target });
        Ok(())
    }

    fn set_move_speed(&mut self, mobile: Entity, speed: f32) -> Result<(), BackendError> {
        self.require(mobile)?;
        self.world.entity_mut(mobile).insert(MovementSpeed { speed });
        Ok(())
    }

    fn look_at(&mut self, mobile: Entity, target: Vec3) -> Result<(), BackendError> {
        self.require(mobile)?;
        self.world.entity_mut(mobile).insert(LookAt(target));
        Ok(())
    }

    fn reset_lifetime(&mut self, handle: Entity, lifetime: Duration) -> Result<(), BackendError> {
        self.require(handle)?;
        self.world
            .entity_mut(handle)
            .insert(LifeTime::new(lifetime.as_secs_f32()));
        Ok(())
    }

    fn set_team(&mut self, handle: Entity, owner_character: Entity) -> Result<(), BackendError> {
        self.require(handle)?;
        self.world.entity_mut(handle).insert(Team(owner_character));
        Ok(())
    }

    fn cast_ability(&mut self, caster: Entity, ability: AbilityId) -> Result<(), BackendError> {
        let mut casts = self
            .world
            .get_mut::<AbilityCasts>(caster)
            .ok_or(BackendError::MissingObject(caster))?;
        casts.casts.push(ability);
        Ok(())
    }

    fn apply_buff(&mut self, target: Entity, buff: BuffId, duration: Option<Duration>) -> Result<(), BackendError> {
        let mut buffs = self
            .world
            .get_mut::<Buffs>(target)
            .ok_or(BackendError::MissingObject(target))?;
        buffs.apply(buff, duration.map(|d| d.as_secs_f32()));
        Ok(())
    }

    fn remove_buff(&mut self, target: Entity, buff: BuffId) -> bool {
        self.world
            .get_mut::<Buffs>(target)
            .is_some_and(|mut buffs| buffs.remove(buff))
    }

    fn has_buff(&self, target: Entity, buff: BuffId) -> bool {
        self.world
            .get::<Buffs>(target)
            .is_some_and(|buffs| buffs.has(buff))
    }

    fn buffs(&self, target: Entity) -> Vec<BuffId> {
        self.world
            .get::<Buffs>(target)
            .map(|buffs| buffs.active.iter().map(|buff| buff.id).collect())
            .unwrap_or_default()
    }

    fn inventory(&self, handle: Entity) -> Vec<Option<ItemStack>> {
        self.world
            .get::<Inventory>(handle)
            .map(|inventory| inventory.slots.clone())
            .unwrap_or_default()
    }

    fn add_item(&mut self, handle: Entity, stack: ItemStack) -> Result<(), BackendError> {
        let mut inventory = self
            .world
            .get_mut::<Inventory>(handle)
            .ok_or(BackendError::MissingObject(handle))?;
        if inventory.add(stack) {
            Ok(())
        } else {
            Err(BackendError::InventoryFull(handle))
        }
    }

    fn transfer_slot(&mut self, from: Entity, to: Entity, slot: usize) -> Result<(), BackendError> {
        self.require(to)?;
        let stack = self
            .world
            .get_mut::<Inventory>(from)
            .ok_or(BackendError::MissingObject(from))?
            .take(slot)
            .ok_or(BackendError::EmptySlot { entity: from, slot })?;

        if let Err(err) = self.add_item(to, stack) {
            // Не теряем предмет: возвращаем в исходный слот
            if let Some(mut inventory) = self.world.get_mut::<Inventory>(from) {
                if let Some(original) = inventory.slots.get_mut(slot) {
                    *original = Some(stack);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    fn clear_inventory(&mut self, handle: Entity) {
        if let Some(mut inventory) = self.world.get_mut::<Inventory>(handle) {
            inventory.clear();
        }
    }

    fn equipment(&self, handle: Entity) -> Option<Equipment> {
        self.world
            .get::<ServantEquipment>(handle)
            .map(|equipment| Equipment {
                slots: equipment.slots.clone(),
            })
    }

    fn set_equipment(&mut self, handle: Entity, equipment: Equipment) -> Result<(), BackendError> {
        self.require(handle)?;
        self.world.entity_mut(handle).insert(ServantEquipment {
            slots: equipment.slots,
        });
        Ok(())
    }

    fn on_tick(&mut self, dt: Duration) {
        self.world.insert_resource(SimDelta(dt.as_secs_f32()));
        self.schedule.run(&mut self.world);
    }
}

// ============================================================================
// Systems
// ============================================================================

fn tick_buffs(delta: Res<SimDelta>, mut query: Query<&mut Buffs>) {
    for mut buffs in query.iter_mut() {
        for buff in buffs.active.iter_mut() {
            if let Some(remaining) = buff.remaining.as_mut() {
                *remaining -= delta.0;
            }
        }
        buffs
            .active
            .retain(|buff| buff.remaining.map_or(true, |remaining| remaining > 0.0));
    }
}

fn move_seeking_bodies(
    delta: Res<SimDelta>,
    mut bodies: Query<(&mut WorldPosition, &SeekGoal, &MovementSpeed)>,
) {
    for (mut position, goal, speed) in bodies.iter_mut() {
        let Some(target) = goal.target else {
            continue;
        };

        let to_target = target - position.0;
        let distance = to_target.length();
        let step = speed.speed * delta.0;

        if distance <= step {
            position.0 = target;
        } else {
            position.0 += to_target / distance * step;
        }
    }
}

fn expire_lifetimes(
    mut commands: Commands,
    delta: Res<SimDelta>,
    mut query: Query<(Entity, &mut LifeTime)>,
) {
    for (entity, mut lifetime) in query.iter_mut() {
        lifetime.age += delta.0;
        if lifetime.is_expired() {
            commands.entity(entity).despawn();
        }
    }
}
