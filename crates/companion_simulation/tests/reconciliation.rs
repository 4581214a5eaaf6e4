//! Reconciliation integration test
//!
//! Мир собирается вручную (как его оставил прошлый процесс), потом
//! `initialize` восстанавливает реестр.

use bevy::prelude::*;
use companion_simulation::*;
use std::collections::BTreeMap;
use std::time::Duration;

const P1: OwnerId = OwnerId(1);
const P2: OwnerId = OwnerId(2);

fn runtime_with_owners() -> HeadlessRuntime {
    let mut runtime = CompanionRuntime::new(EcsWorldBackend::new(), MemoryStore::new(), CompanionConfig::default());
    runtime.backend_mut().spawn_owner(P1, "Alice", Vec3::ZERO);
    runtime.backend_mut().spawn_owner(P2, "Bob", Vec3::new(20.0, 0.0, 0.0));
    runtime
}

/// Объект с тегом, владельцем и позицией, как после прошлого процесса
fn leftover(
    runtime: &mut HeadlessRuntime,
    owner: Option<OwnerId>,
    marker: &str,
    role: ObjectRole,
    position: Vec3,
) -> Entity {
    let character = owner.and_then(|owner| runtime.backend().character(owner));
    let prefab = match role {
        ObjectRole::Anchor => runtime.config().prefabs.anchor,
        ObjectRole::Mobile => runtime.config().prefabs.default_mobile,
    };
    let backend = runtime.backend_mut();
    let handle = backend.spawn(SpawnRequest {
        prefab,
        position,
        owner: character,
        lifetime: None,
    });
    backend.set_tag(handle, CompanionTag::new(marker, role)).unwrap();
    handle
}

/// Связанная пара текущего формата; anchor на высоте `height` над телом
fn leftover_pair(runtime: &mut HeadlessRuntime, owner: OwnerId, body: Vec3, height: f32) -> (Entity, Entity) {
    let marker = runtime.config().companion_tag.clone();
    let mobile = leftover(runtime, Some(owner), &marker, ObjectRole::Mobile, body);
    let anchor = leftover(
        runtime,
        Some(owner),
        &marker,
        ObjectRole::Anchor,
        body + Vec3::new(0.0, height, 0.0),
    );
    runtime.backend_mut().link(anchor, mobile).unwrap();
    (anchor, mobile)
}

fn finish_spawn(runtime: &mut HeadlessRuntime) {
    let duration = runtime.config().spawn_sequence_duration() + Duration::from_millis(250);
    runtime.run_for(duration);
}

#[test]
fn test_linked_pair_adopted_as_hidden_and_reused() {
    let mut runtime = runtime_with_owners();
    let hidden = runtime.config().hidden_position();
    let (anchor, mobile) = leftover_pair(&mut runtime, P1, hidden, 215.0);

    let report = runtime.initialize();
    assert_eq!(report.adopted, 1);
    assert_eq!(report.skipped, 0);

    let state = runtime.get_companion(P1).unwrap();
    assert_eq!(state.lifecycle, Lifecycle::Hidden);
    assert_eq!((state.anchor, state.mobile), (Some(anchor), Some(mobile)));
    assert!(!runtime.has_companion(P1));

    runtime.spawn(P1).unwrap();
    finish_spawn(&mut runtime);

    let state = runtime.get_companion(P1).unwrap();
    assert_eq!((state.anchor, state.mobile), (Some(anchor), Some(mobile)));
    let marker = runtime.config().companion_tag.clone();
    assert_eq!(runtime.backend().count_tagged(&marker, None), 2);
}

#[test]
fn test_orphan_body_gets_new_anchor_and_keeps_items() {
    let mut runtime = runtime_with_owners();
    let marker = runtime.config().companion_tag.clone();
    let body = Vec3::new(4.0, 0.0, 4.0);
    let mobile = leftover(&mut runtime, Some(P1), &marker, ObjectRole::Mobile, body);
    runtime
        .backend_mut()
        .add_item(mobile, ItemStack::new(ItemTypeId(11), 5))
        .unwrap();

    let report = runtime.initialize();
    assert_eq!(report.anchors_rebuilt, 1);
    assert_eq!(report.adopted, 1);

    let state = runtime.get_companion(P1).unwrap();
    let anchor = state.anchor.unwrap();
    assert_eq!(state.mobile, Some(mobile));
    assert_eq!(runtime.backend().linked_mobile(anchor), Some(mobile));
    assert_eq!(runtime.backend().linked_anchor(mobile), Some(anchor));
    assert_eq!(
        runtime.backend().read_position(anchor),
        Some(body + Vec3::new(0.0, 215.0, 0.0))
    );
    assert_eq!(
        runtime.backend().display_name(anchor).as_deref(),
        Some("Alice's Companion")
    );
    assert_eq!(runtime.backend().total_item_count(mobile), 5);
}

#[test]
fn test_anchor_without_body_rebuilds_body_on_spawn() {
    let mut runtime = runtime_with_owners();
    let marker = runtime.config().companion_tag.clone();
    let anchor = leftover(
        &mut runtime,
        Some(P1),
        &marker,
        ObjectRole::Anchor,
        Vec3::new(0.0, 215.0, 0.0),
    );
    let saved = PersistedInventorySnapshot::from(BTreeMap::from([(ItemTypeId(3), 6)]));
    saved.save(runtime.store_mut(), P1).unwrap();

    let report = runtime.initialize();
    assert_eq!(report.adopted, 1);
    let state = runtime.get_companion(P1).unwrap();
    assert_eq!(state.anchor, Some(anchor));
    assert_eq!(state.mobile, None);

    runtime.spawn(P1).unwrap();
    finish_spawn(&mut runtime);

    let mobile = runtime.get_companion(P1).and_then(|state| state.mobile).unwrap();
    assert_eq!(runtime.backend().linked_mobile(anchor), Some(mobile));
    assert_eq!(runtime.backend().total_item_count(mobile), 6);
    assert!(PersistedInventorySnapshot::load(runtime.store(), P1).unwrap().is_none());
}

#[test]
fn test_legacy_objects_are_purged() {
    let mut runtime = runtime_with_owners();
    let legacy = runtime.config().legacy_tag.clone();
    let old_anchor = leftover(&mut runtime, Some(P1), &legacy, ObjectRole::Anchor, Vec3::ZERO);
    let old_body = leftover(&mut runtime, None, &legacy, ObjectRole::Mobile, Vec3::ZERO);
    let hidden_buff = runtime.config().buffs.hidden_state;
    runtime.backend_mut().apply_buff(old_body, hidden_buff, None).unwrap();

    // Текущий тег, но anchor на старой высоте
    let (tall_anchor, tall_body) = leftover_pair(&mut runtime, P2, Vec3::new(20.0, 0.0, 0.0), 221.0);

    let report = runtime.initialize();
    assert_eq!(report.legacy_purged, 4);
    assert_eq!(report.adopted, 0);

    for handle in [old_anchor, old_body, tall_anchor, tall_body] {
        assert!(!runtime.backend().exists(handle), "{:?} survived", handle);
    }
    assert!(runtime.registry().is_empty());
    assert!(runtime.backend().tagged_objects().is_empty());
}

#[test]
fn test_unresolvable_owner_and_broken_links_are_skipped() {
    let mut runtime = runtime_with_owners();
    let marker = runtime.config().companion_tag.clone();

    // Anchor без владельца
    let ownerless = leftover(&mut runtime, None, &marker, ObjectRole::Anchor, Vec3::ZERO);

    // Anchor P1 указывает на тело, которое связано с другим anchor'ом
    let (_, body) = leftover_pair(&mut runtime, P2, Vec3::new(20.0, 0.0, 0.0), 215.0);
    let stray = leftover(
        &mut runtime,
        Some(P1),
        &marker,
        ObjectRole::Anchor,
        Vec3::new(0.0, 215.0, 0.0),
    );
    runtime.backend_mut().link(stray, body).unwrap();
    let other = runtime.backend_mut().spawn(SpawnRequest {
        prefab: PrefabId(1),
        position: Vec3::ZERO,
        owner: None,
        lifetime: None,
    });
    runtime.backend_mut().link(other, body).unwrap();

    let report = runtime.initialize();
    assert!(report.skipped >= 2, "{:?}", report);
    assert!(runtime.registry().try_get(P1).is_none());
    assert!(runtime.backend().exists(ownerless));
    assert!(runtime.backend().exists(stray));
    assert!(runtime.backend().exists(body));
}

#[test]
fn test_reconciliation_is_idempotent() {
    let mut runtime = runtime_with_owners();
    let hidden = runtime.config().hidden_position();
    leftover_pair(&mut runtime, P1, hidden, 215.0);
    let marker = runtime.config().companion_tag.clone();
    leftover(&mut runtime, Some(P2), &marker, ObjectRole::Mobile, Vec3::new(20.0, 0.0, 0.0));

    let first = runtime.initialize();
    assert_eq!(first.adopted, 2);
    let before = registry_snapshot(&runtime);
    let objects = runtime.backend().tagged_objects().len();

    let second = runtime.initialize();
    assert_eq!(second.adopted, 0);
    assert_eq!(second.anchors_rebuilt, 0);
    assert_eq!(registry_snapshot(&runtime), before);
    assert_eq!(runtime.backend().tagged_objects().len(), objects);
}
