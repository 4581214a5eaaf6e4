//! Host events integration test
//!
//! Эмоуты, каст полёта, изменения инвентаря, чужие попытки взаимодействия.

use bevy::prelude::*;
use companion_simulation::*;
use std::time::Duration;

const P1: OwnerId = OwnerId(1);
const P2: OwnerId = OwnerId(2);

fn setup() -> HeadlessRuntime {
    let mut runtime = CompanionRuntime::new(EcsWorldBackend::new(), MemoryStore::new(), CompanionConfig::default());
    runtime.backend_mut().spawn_owner(P1, "Alice", Vec3::ZERO);
    runtime.backend_mut().spawn_owner(P2, "Bob", Vec3::new(2.0, 0.0, 0.0));
    runtime.initialize();
    runtime
}

fn emote(runtime: &mut HeadlessRuntime, owner: OwnerId, emote: EmoteId) -> EventResponse {
    runtime
        .handle_event(HostEvent::EmoteUsed { owner, emote })
        .unwrap()
}

fn finish_spawn(runtime: &mut HeadlessRuntime) {
    let duration = runtime.config().spawn_sequence_duration() + Duration::from_millis(250);
    runtime.run_for(duration);
}

fn body(runtime: &HeadlessRuntime, owner: OwnerId) -> Entity {
    runtime.get_companion(owner).and_then(|state| state.mobile).unwrap()
}

#[test]
fn test_bound_emotes_drive_commands() {
    let mut runtime = setup();
    let emotes = runtime.config().emotes.clone();

    assert_eq!(
        emote(&mut runtime, P1, EmoteId(12345)),
        EventResponse::Ignored
    );
    assert_eq!(
        emote(&mut runtime, P1, emotes.spawn),
        EventResponse::Command(CommandOutcome::Applied)
    );
    finish_spawn(&mut runtime);

    assert_eq!(
        emote(&mut runtime, P1, emotes.toggle_follow),
        EventResponse::Command(CommandOutcome::Applied)
    );
    assert!(runtime.is_following(P1));

    assert_eq!(
        emote(&mut runtime, P1, emotes.dismiss),
        EventResponse::Command(CommandOutcome::Applied)
    );
    assert_eq!(runtime.lifecycle(P1), Lifecycle::Leaving);
    assert!(!runtime.is_following(P1));
}

#[test]
fn test_flight_dismisses_companion() {
    let mut runtime = setup();
    let flight = runtime.config().abilities.flight;

    // Без компаньона - не наше событие
    let response = runtime
        .handle_event(HostEvent::AbilityCastStarted { owner: P1, ability: flight })
        .unwrap();
    assert_eq!(response, EventResponse::Ignored);

    runtime.spawn(P1).unwrap();
    finish_spawn(&mut runtime);

    let response = runtime
        .handle_event(HostEvent::AbilityCastStarted {
            owner: P1,
            ability: AbilityId(7),
        })
        .unwrap();
    assert_eq!(response, EventResponse::Ignored);

    let response = runtime
        .handle_event(HostEvent::AbilityCastStarted { owner: P1, ability: flight })
        .unwrap();
    assert_eq!(response, EventResponse::Command(CommandOutcome::Applied));
    assert_eq!(runtime.lifecycle(P1), Lifecycle::Leaving);
}

#[test]
fn test_inventory_change_saves_snapshot() {
    let mut runtime = setup();
    runtime.spawn(P1).unwrap();
    finish_spawn(&mut runtime);
    let mobile = body(&runtime, P1);
    runtime
        .backend_mut()
        .add_item(mobile, ItemStack::new(ItemTypeId(5), 2))
        .unwrap();

    // Перестановка внутри инвентаря снапшот не трогает
    let response = runtime
        .handle_event(HostEvent::InventoryChanged {
            inventory_owner: mobile,
            moved: true,
        })
        .unwrap();
    assert_eq!(response, EventResponse::Ignored);
    assert!(!runtime.store().has("1"));

    let response = runtime
        .handle_event(HostEvent::InventoryChanged {
            inventory_owner: mobile,
            moved: false,
        })
        .unwrap();
    assert_eq!(response, EventResponse::SnapshotSaved);
    let saved = PersistedInventorySnapshot::load(runtime.store(), P1).unwrap().unwrap();
    assert_eq!(saved.0.get(&ItemTypeId(5)), Some(&2));

    // Чужой объект
    let character = runtime.backend().character(P1).unwrap();
    let response = runtime
        .handle_event(HostEvent::InventoryChanged {
            inventory_owner: character,
            moved: false,
        })
        .unwrap();
    assert_eq!(response, EventResponse::Ignored);
}

#[test]
fn test_only_owner_may_interact_with_body() {
    let mut runtime = setup();
    runtime.spawn(P1).unwrap();
    finish_spawn(&mut runtime);
    let mobile = body(&runtime, P1);

    let attempt = |runtime: &mut HeadlessRuntime, actor: OwnerId, target: Entity| {
        runtime
            .handle_event(HostEvent::InteractAttempt { actor, target })
            .unwrap()
    };

    assert_eq!(
        attempt(&mut runtime, P2, mobile),
        EventResponse::Interact(InteractVerdict::Deny)
    );
    assert_eq!(
        attempt(&mut runtime, P1, mobile),
        EventResponse::Interact(InteractVerdict::Allow)
    );

    let stranger = runtime.backend().character(P2).unwrap();
    assert_eq!(
        attempt(&mut runtime, P1, stranger),
        EventResponse::Interact(InteractVerdict::Allow)
    );
}
